use chrono::{DateTime, Utc};

use super::Clock;

/// Use the current system time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock {}

impl SystemClock {
    pub fn new() -> Self {
        Self {}
    }
}

impl Clock for SystemClock {
    fn now(&mut self) -> DateTime<Utc> {
        Utc::now()
    }
}
