//! Event-time window decisions for the join.
//!
//! Architecture
//! ------------
//!
//! [`WindowPolicy`] answers two questions and holds no state:
//!
//! 1. May this interaction and this observation be joined? See
//!    [`WindowPolicy::is_match`]. Both window bounds are exclusive: a
//!    gap exactly equal to a window is not a match.
//!
//! 2. After a receive timeout, how far may a watermark be pushed
//!    before we stop waiting? See [`advance_watermark`] and
//!    [`SlackMode`].
//!
//! The wall clock consulted for the second question lives in
//! [`clock`] so tests can replace it.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

pub mod clock;

/// How punctuation slack is applied when a source stays idle.
///
/// Has no `Default`. Configuration must name one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SlackMode {
    /// `min(now - slack, candidate + slack)`.
    ///
    /// Never runs ahead of the wall clock minus slack, but can lag
    /// behind it while catching up through a historical backlog.
    Additive,
    /// `now - slack`.
    ///
    /// Jumps straight to the wall clock, which may skip data if a
    /// source stalls and then resumes with a burst of old events.
    Subtractive,
}

impl std::str::FromStr for SlackMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "additive" => Ok(Self::Additive),
            "subtractive" => Ok(Self::Subtractive),
            other => Err(format!("unknown slack mode {other:?}")),
        }
    }
}

/// `time - by`, clamped to the representable range.
pub(crate) fn saturating_sub(time: DateTime<Utc>, by: Duration) -> DateTime<Utc> {
    time.checked_sub_signed(by).unwrap_or(if by > Duration::zero() {
        DateTime::<Utc>::MIN_UTC
    } else {
        DateTime::<Utc>::MAX_UTC
    })
}

/// `time + by`, clamped to the representable range.
pub(crate) fn saturating_add(time: DateTime<Utc>, by: Duration) -> DateTime<Utc> {
    time.checked_add_signed(by).unwrap_or(if by > Duration::zero() {
        DateTime::<Utc>::MAX_UTC
    } else {
        DateTime::<Utc>::MIN_UTC
    })
}

/// Compute the new "can't wait any longer" time after a receive
/// timeout.
pub fn advance_watermark(
    candidate: DateTime<Utc>,
    now: DateTime<Utc>,
    slack: Duration,
    mode: SlackMode,
) -> DateTime<Utc> {
    let wall = saturating_sub(now, slack);
    match mode {
        SlackMode::Additive => wall.min(saturating_add(candidate, slack)),
        SlackMode::Subtractive => wall,
    }
}

/// Forward and backward join windows plus punctuation settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowPolicy {
    forward: Duration,
    backward: Duration,
    slack: Duration,
    mode: SlackMode,
}

impl WindowPolicy {
    pub fn new(forward: Duration, backward: Duration, slack: Duration, mode: SlackMode) -> Self {
        Self {
            forward,
            backward,
            slack,
            mode,
        }
    }

    pub fn forward(&self) -> Duration {
        self.forward
    }

    pub fn backward(&self) -> Duration {
        self.backward
    }

    /// Is `observation_time` within the join window of
    /// `interaction_time`?
    ///
    /// False if either time is absent, if the observation is
    /// `forward` or more after the interaction, or if it is
    /// `backward` or more before it.
    pub fn is_match(
        &self,
        interaction_time: Option<DateTime<Utc>>,
        observation_time: Option<DateTime<Utc>>,
    ) -> bool {
        let (Some(interaction_time), Some(observation_time)) = (interaction_time, observation_time)
        else {
            return false;
        };
        let delay = observation_time.signed_duration_since(interaction_time);
        if delay >= self.forward {
            return false;
        }
        let lead = interaction_time.signed_duration_since(observation_time);
        lead < self.backward
    }

    /// Latest observation time that can still join an interaction at
    /// `interaction_time`.
    pub fn ready_time(&self, interaction_time: DateTime<Utc>) -> DateTime<Utc> {
        saturating_add(interaction_time, self.forward)
    }

    /// Observations before this can no longer join anything once
    /// interactions have reached `last_interaction`.
    pub fn eviction_cutoff(&self, last_interaction: DateTime<Utc>) -> DateTime<Utc> {
        saturating_sub(last_interaction, self.backward)
    }

    /// [`advance_watermark`] with this policy's slack and mode.
    pub fn punctuate(&self, candidate: DateTime<Utc>, now: DateTime<Utc>) -> DateTime<Utc> {
        advance_watermark(candidate, now, self.slack, self.mode)
    }
}
