//! Wall clocks consulted when punctuating an idle source.
//!
//! Event times always come from the messages themselves. A [`Clock`]
//! is only asked for "now" after a receive timeout, to bound how far
//! [`super::advance_watermark`] may move a watermark.

use chrono::{DateTime, Utc};

pub(crate) mod system_clock;
pub(crate) mod testing_clock;

pub use system_clock::SystemClock;
pub use testing_clock::TestingClock;

/// Defines "now" for the join engine.
pub trait Clock: Send {
    /// Return the current wall-clock time.
    ///
    /// This can mutate internal state so simulated clocks can move
    /// forward on every call.
    fn now(&mut self) -> DateTime<Utc>;
}
