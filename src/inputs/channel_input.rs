use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::Source;
use crate::errors::RecvError;

/// Read items from a bounded tokio channel.
///
/// Dropping every sender closes the source once buffered items are
/// drained.
#[derive(Debug)]
pub struct ChannelSource<T> {
    rx: mpsc::Receiver<T>,
}

impl<T> ChannelSource<T> {
    pub fn new(rx: mpsc::Receiver<T>) -> Self {
        Self { rx }
    }

    /// Create a source and the sender feeding it.
    pub fn bounded(capacity: usize) -> (mpsc::Sender<T>, Self) {
        let (tx, rx) = mpsc::channel(capacity);
        (tx, Self::new(rx))
    }

    /// A closed source that yields `items` in order.
    ///
    /// Useful to replay a pre-recorded stream.
    pub fn from_items(items: impl IntoIterator<Item = T>) -> Self {
        let items: Vec<T> = items.into_iter().collect();
        let (tx, rx) = mpsc::channel(items.len().max(1));
        for item in items {
            if tx.try_send(item).is_err() {
                tracing::warn!("Recorded item did not fit its replay channel");
            }
        }
        Self::new(rx)
    }
}

#[async_trait]
impl<T> Source for ChannelSource<T>
where
    T: Send,
{
    type Item = T;

    async fn recv(&mut self, timeout: Duration) -> Result<Option<T>, RecvError> {
        tokio::time::timeout(timeout, self.rx.recv())
            .await
            .map_err(|_elapsed| RecvError::Timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn replays_then_closes() {
        let mut source = ChannelSource::from_items([1, 2]);
        let timeout = Duration::from_millis(10);
        assert_eq!(source.recv(timeout).await, Ok(Some(1)));
        assert_eq!(source.recv(timeout).await, Ok(Some(2)));
        assert_eq!(source.recv(timeout).await, Ok(None));
    }

    #[tokio::test(start_paused = true)]
    async fn idle_source_times_out() {
        let (tx, mut source) = ChannelSource::<u8>::bounded(1);
        assert_eq!(
            source.recv(Duration::from_secs(1)).await,
            Err(RecvError::Timeout)
        );
        tx.send(3).await.unwrap();
        assert_eq!(source.recv(Duration::from_secs(1)).await, Ok(Some(3)));
    }
}
