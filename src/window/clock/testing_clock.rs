use chrono::{DateTime, Duration, Utc};

use super::Clock;

/// Simulate system time for tests. Increment "now" after each call.
///
/// With a zero increment the clock is frozen at `start_at`.
#[derive(Debug, Clone)]
pub struct TestingClock {
    item_incr: Duration,
    current_time: DateTime<Utc>,
}

impl TestingClock {
    pub fn new(start_at: DateTime<Utc>, item_incr: Duration) -> Self {
        Self {
            item_incr,
            current_time: start_at,
        }
    }

    pub fn frozen(at: DateTime<Utc>) -> Self {
        Self::new(at, Duration::zero())
    }
}

impl Clock for TestingClock {
    fn now(&mut self) -> DateTime<Utc> {
        let now = self.current_time;
        self.current_time = crate::window::saturating_add(self.current_time, self.item_incr);
        now
    }
}

#[test]
fn test_testing_clock() {
    use chrono::TimeZone;

    let start = Utc.with_ymd_and_hms(2022, 1, 1, 0, 0, 0).unwrap();
    let mut clock = TestingClock::new(start, Duration::seconds(1));
    assert_eq!(clock.now(), start);
    assert_eq!(clock.now(), start + Duration::seconds(1));
    assert_eq!(clock.now(), start + Duration::seconds(2));

    let mut frozen = TestingClock::frozen(start);
    assert_eq!(frozen.now(), start);
    assert_eq!(frozen.now(), start);
}
