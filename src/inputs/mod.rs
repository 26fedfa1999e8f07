//! Sources the join engine pulls from.
//!
//! Architecture
//! ------------
//!
//! Input is based around the core trait of [`Source`]. The engine
//! holds one source of [`crate::message::MessageBatch`] for
//! interactions and one of [`crate::message::Message`] for
//! observations.
//!
//! A receive that times out is not a failure for the engine: it is
//! how watermarks move while a source is idle. [`receive_with_retries`]
//! wraps the bounded retry policy both sources share.

use std::time::Duration;

use async_trait::async_trait;

use crate::errors::RecvError;

pub(crate) mod channel_input;

pub use channel_input::ChannelSource;

/// A single-consumer stream of items with a bounded receive.
#[async_trait]
pub trait Source: Send {
    type Item: Send;

    /// Wait at most `timeout` for the next item.
    ///
    /// Returns `Ok(None)` once the stream is closed and will never
    /// produce again, and [`RecvError::Timeout`] if nothing arrived in
    /// time.
    async fn recv(&mut self, timeout: Duration) -> Result<Option<Self::Item>, RecvError>;
}

#[async_trait]
impl<S> Source for Box<S>
where
    S: Source + ?Sized,
{
    type Item = S::Item;

    async fn recv(&mut self, timeout: Duration) -> Result<Option<Self::Item>, RecvError> {
        (**self).recv(timeout).await
    }
}

/// What a receive returned after the timeout retry policy ran.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Received<T> {
    Item(T),
    /// Every attempt timed out.
    Exhausted,
    Closed,
}

/// Receive with `timeout`, retrying up to `max_retries` more times on
/// timeout.
pub(crate) async fn receive_with_retries<S>(
    source: &mut S,
    timeout: Duration,
    max_retries: u32,
) -> Result<Received<S::Item>, RecvError>
where
    S: Source + ?Sized,
{
    let mut attempt = 0;
    loop {
        match source.recv(timeout).await {
            Ok(Some(item)) => return Ok(Received::Item(item)),
            Ok(None) => return Ok(Received::Closed),
            Err(RecvError::Timeout) if attempt < max_retries => {
                attempt += 1;
                tracing::trace!("Receive timed out, retry {attempt} of {max_retries}");
            }
            Err(RecvError::Timeout) => return Ok(Received::Exhausted),
            Err(err) => return Err(err),
        }
    }
}
