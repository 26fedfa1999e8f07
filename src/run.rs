//! Running join engines.
//!
//! [`spawn_join_engine`] is the entry point for a single engine on a
//! tokio runtime. [`supervise`] is the layer above it: it recreates
//! engines after a fault, from a fallback position when the upstream
//! position went invalid. The engine itself never retries.
//!
//! Cancellation is cooperative through [`Shutdown`]. It is checked at
//! every loop iteration and raced against every receive and send.

use std::future::Future;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::errors::JoinError;
use crate::join::JoinEngine;
use crate::metrics::DiagnosticsSnapshot;

/// Receiving half of a cancellation token.
#[derive(Debug, Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

/// Sending half of a cancellation token.
#[derive(Debug)]
pub struct ShutdownHandle {
    tx: watch::Sender<bool>,
}

/// Create a connected cancellation token pair.
pub fn shutdown_pair() -> (ShutdownHandle, Shutdown) {
    let (tx, rx) = watch::channel(false);
    (ShutdownHandle { tx }, Shutdown { rx })
}

impl ShutdownHandle {
    /// Request shutdown. Idempotent.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> Shutdown {
        Shutdown {
            rx: self.tx.subscribe(),
        }
    }
}

impl Shutdown {
    /// A token that is never cancelled.
    pub fn never() -> Self {
        let (_handle, shutdown) = shutdown_pair();
        shutdown
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once shutdown was requested.
    ///
    /// Never resolves if every [`ShutdownHandle`] was dropped without
    /// cancelling.
    pub async fn cancelled(&mut self) {
        loop {
            if *self.rx.borrow_and_update() {
                return;
            }
            if self.rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

/// Run `engine` on the current tokio runtime.
///
/// The handle resolves to the engine's result: `Ok` after a clean
/// shutdown or a closed interaction source, `Err` on a fault.
pub fn spawn_join_engine(
    engine: JoinEngine,
) -> JoinHandle<Result<DiagnosticsSnapshot, JoinError>> {
    tokio::spawn(engine.run())
}

/// Where a supervised engine's sources should start reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartPosition {
    /// Resume from the last upstream checkpoint.
    Checkpoint,
    /// The checkpoint position was invalid; start from the source's
    /// fallback position instead.
    Fallback,
}

/// Build and run engines until one finishes cleanly.
///
/// `factory` is called with [`StartPosition::Checkpoint`] for the
/// first engine. An engine failing with
/// [`JoinError::InvalidPosition`] is recreated from
/// [`StartPosition::Fallback`]; any other fault restarts from the
/// checkpoint. After `max_restarts` restarts the last fault is
/// returned.
#[tracing::instrument(name = "supervise", skip_all)]
pub async fn supervise<F, Fut>(
    mut factory: F,
    shutdown: Shutdown,
    max_restarts: usize,
) -> Result<DiagnosticsSnapshot, JoinError>
where
    F: FnMut(StartPosition) -> Fut,
    Fut: Future<Output = Result<JoinEngine, JoinError>>,
{
    let mut restarts = 0;
    let mut position = StartPosition::Checkpoint;
    loop {
        let engine = factory(position).await?;
        let res = engine.with_shutdown(shutdown.clone()).run().await;
        let err = match res {
            Ok(snapshot) => return Ok(snapshot),
            Err(err) => err,
        };

        if shutdown.is_cancelled() {
            tracing::info!("Not restarting after shutdown");
            return Err(err);
        }
        if restarts >= max_restarts {
            tracing::error!(
                "Join engine failed {} times, giving up: {err}",
                restarts + 1
            );
            return Err(err);
        }
        restarts += 1;
        position = if err.is_invalid_position() {
            StartPosition::Fallback
        } else {
            StartPosition::Checkpoint
        };
        tracing::warn!("Restarting join engine from {position:?} after fault: {err}");
    }
}
