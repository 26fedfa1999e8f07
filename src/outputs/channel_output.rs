use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{InvalidSink, OutputSink};
use crate::errors::SinkError;
use crate::message::{InvalidMessage, JoinedBatch};

/// Write joined batches into a bounded tokio channel.
///
/// Completing the sink drops the sender, so the receiving side sees
/// the channel close once every batch is read.
#[derive(Debug)]
pub struct ChannelSink {
    tx: Option<mpsc::Sender<JoinedBatch>>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<JoinedBatch>) -> Self {
        Self { tx: Some(tx) }
    }

    /// Create a sink and the receiver draining it.
    pub fn bounded(capacity: usize) -> (Self, mpsc::Receiver<JoinedBatch>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(tx), rx)
    }

    pub fn is_complete(&self) -> bool {
        self.tx.is_none()
    }
}

#[async_trait]
impl OutputSink for ChannelSink {
    async fn send(&mut self, batch: JoinedBatch) -> Result<(), SinkError> {
        let tx = self.tx.as_ref().ok_or(SinkError::Completed)?;
        tx.send(batch).await.map_err(|_| SinkError::Closed)
    }

    fn complete(&mut self) {
        if self.tx.take().is_some() {
            tracing::debug!("Output sink completed");
        }
    }
}

/// Write invalid messages into a bounded tokio channel without
/// waiting.
///
/// A full channel drops the message.
#[derive(Debug, Clone)]
pub struct ChannelInvalidSink {
    tx: mpsc::Sender<InvalidMessage>,
}

impl ChannelInvalidSink {
    pub fn new(tx: mpsc::Sender<InvalidMessage>) -> Self {
        Self { tx }
    }

    pub fn bounded(capacity: usize) -> (Self, mpsc::Receiver<InvalidMessage>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(tx), rx)
    }
}

impl InvalidSink for ChannelInvalidSink {
    fn send(&mut self, message: InvalidMessage) -> Result<(), SinkError> {
        self.tx.try_send(message).map_err(|err| match err {
            mpsc::error::TrySendError::Full(_) => SinkError::Full,
            mpsc::error::TrySendError::Closed(_) => SinkError::Closed,
        })
    }
}
