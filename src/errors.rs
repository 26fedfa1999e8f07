//! Error types for the join engine and its collaborators.
//!
//! Receive timeouts are errors at the source boundary only. The
//! engine absorbs them to advance its watermarks, so they never reach
//! [`JoinError`].

/// Errors a [`crate::inputs::Source`] can return from a receive.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RecvError {
    /// Nothing arrived within the receive timeout.
    #[error("receive timed out")]
    Timeout,
    /// The upstream position is no longer valid and the source must be
    /// recreated from a fallback position.
    #[error("source position is no longer valid: {0}")]
    InvalidPosition(String),
    /// Any other failure of the underlying transport.
    #[error("source fault: {0}")]
    Fault(String),
}

/// Errors a sink can return from a send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SinkError {
    /// [`crate::outputs::OutputSink::complete`] was already called.
    #[error("sink was already completed")]
    Completed,
    /// The receiving side of the sink went away.
    #[error("sink receiver was dropped")]
    Closed,
    /// A best-effort sink had no room for the item.
    #[error("sink is full")]
    Full,
}

/// Errors loading or validating a [`crate::config::JoinConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
    #[error("missing required setting {0}")]
    Missing(&'static str),
    #[error("unable to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("unable to read config file: {0}")]
    Io(#[from] std::io::Error),
}

/// Faults that stop a [`crate::join::JoinEngine`].
///
/// A clean cancellation is not represented here; the engine returns
/// `Ok` in that case.
#[derive(Debug, thiserror::Error)]
pub enum JoinError {
    /// Handled one layer up by recreating the source, see
    /// [`crate::run::supervise`].
    #[error("{source_name} source position is no longer valid: {reason}")]
    InvalidPosition {
        source_name: &'static str,
        reason: String,
    },
    #[error("{source_name} source failed: {reason}")]
    Source {
        source_name: &'static str,
        reason: String,
    },
    #[error("output sink failed: {0}")]
    Sink(#[from] SinkError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl JoinError {
    /// Classify a non-timeout [`RecvError`] for the named source.
    ///
    /// Timeouts are mapped to a source fault here because a caller
    /// that reaches this point has already decided not to absorb them.
    pub(crate) fn from_recv(source_name: &'static str, err: RecvError) -> Self {
        match err {
            RecvError::InvalidPosition(reason) => Self::InvalidPosition {
                source_name,
                reason,
            },
            RecvError::Timeout => Self::Source {
                source_name,
                reason: "unexpected timeout".to_string(),
            },
            RecvError::Fault(reason) => Self::Source {
                source_name,
                reason,
            },
        }
    }

    pub fn is_invalid_position(&self) -> bool {
        matches!(self, Self::InvalidPosition { .. })
    }
}

#[test]
fn recv_errors_classify() {
    let err = JoinError::from_recv("interaction", RecvError::InvalidPosition("gone".into()));
    assert!(err.is_invalid_position());
    assert_eq!(
        err.to_string(),
        "interaction source position is no longer valid: gone"
    );

    let err = JoinError::from_recv("observation", RecvError::Fault("boom".into()));
    assert!(!err.is_invalid_position());
    assert_eq!(err.to_string(), "observation source failed: boom");
}
