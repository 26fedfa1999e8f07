//! Sinks the join engine writes to.
//!
//! Architecture
//! ------------
//!
//! Output is based around two traits. [`OutputSink`] receives every
//! [`JoinedBatch`] and is the pipeline's backpressure point: a full
//! sink blocks the engine. [`InvalidSink`] receives observations that
//! could not be joined; it is best-effort and a failing send never
//! stops the join.

use async_trait::async_trait;

use crate::errors::SinkError;
use crate::message::{InvalidMessage, JoinedBatch};

pub(crate) mod channel_output;
pub(crate) mod std_output;

pub use channel_output::{ChannelInvalidSink, ChannelSink};
pub use std_output::StdOutput;

/// Downstream consumer of joined batches.
#[async_trait]
pub trait OutputSink: Send {
    /// Write one joined batch, waiting while the sink is full.
    async fn send(&mut self, batch: JoinedBatch) -> Result<(), SinkError>;

    /// Signal that no further batches will be sent.
    ///
    /// Must be idempotent.
    fn complete(&mut self);
}

#[async_trait]
impl<S> OutputSink for Box<S>
where
    S: OutputSink + ?Sized,
{
    async fn send(&mut self, batch: JoinedBatch) -> Result<(), SinkError> {
        (**self).send(batch).await
    }

    fn complete(&mut self) {
        (**self).complete()
    }
}

/// Best-effort consumer of observations that were not joined.
pub trait InvalidSink: Send {
    /// Write one invalid message without waiting.
    fn send(&mut self, message: InvalidMessage) -> Result<(), SinkError>;
}

impl<S> InvalidSink for Box<S>
where
    S: InvalidSink + ?Sized,
{
    fn send(&mut self, message: InvalidMessage) -> Result<(), SinkError> {
        (**self).send(message)
    }
}

/// Discard every invalid message.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopInvalidSink;

impl InvalidSink for NoopInvalidSink {
    fn send(&mut self, _message: InvalidMessage) -> Result<(), SinkError> {
        Ok(())
    }
}
