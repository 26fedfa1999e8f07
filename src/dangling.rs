//! Store of observations waiting for their interaction.
//!
//! Observations are keyed by event id. The store is owned by a
//! single [`crate::join::JoinEngine`] and is never shared, so it does
//! no locking.
//!
//! [`DanglingObservations::count`] is cumulative: it is the number of
//! observations currently held plus every observation ever removed,
//! whether matched or evicted. Monitoring reads it as a
//! monotonically non-decreasing counter, not as a queue depth.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::message::Message;
use crate::window::WindowPolicy;

#[derive(Debug, Default)]
pub struct DanglingObservations {
    db: HashMap<String, Vec<Message>>,
    /// Observations currently held across all keys.
    held: usize,
    /// Observations ever removed from the store.
    removed: u64,
}

impl DanglingObservations {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hold an observation until an interaction with `event_id`
    /// arrives or it is evicted.
    pub fn add(&mut self, event_id: impl Into<String>, observation: Message) {
        self.db.entry(event_id.into()).or_default().push(observation);
        self.held += 1;
    }

    /// Remove every observation held for `event_id` and split them
    /// into those that join an interaction at `interaction_time` and
    /// those that never can.
    ///
    /// The whole key is removed, since event ids are unique per
    /// interaction. Both partitions keep arrival order.
    pub fn take_matches(
        &mut self,
        event_id: &str,
        interaction_time: Option<DateTime<Utc>>,
        policy: &WindowPolicy,
    ) -> (Vec<Message>, Vec<Message>) {
        let Some(observations) = self.db.remove(event_id) else {
            return (Vec::new(), Vec::new());
        };
        self.held -= observations.len();
        self.removed += observations.len() as u64;

        observations
            .into_iter()
            .partition(|obs| policy.is_match(interaction_time, obs.enqueued_time_utc))
    }

    /// Remove every observation with an event time before `cutoff`.
    ///
    /// Observations without an event time can never match and are
    /// always removed. Evictions are returned in event-time order so
    /// reporting is deterministic.
    pub fn evict_older_than(&mut self, cutoff: DateTime<Utc>) -> Vec<Message> {
        let mut evicted = Vec::new();
        let mut empty_keys = Vec::new();

        for (key, observations) in self.db.iter_mut() {
            let (keep, stale): (Vec<_>, Vec<_>) = std::mem::take(observations)
                .into_iter()
                .partition(|obs| obs.enqueued_time_utc.map_or(false, |t| t >= cutoff));
            *observations = keep;
            evicted.extend(stale);

            if observations.is_empty() {
                empty_keys.push(key.clone());
            }
        }

        // Clean up any keys that aren't seen again.
        for key in empty_keys {
            self.db.remove(&key);
        }

        self.held -= evicted.len();
        self.removed += evicted.len() as u64;
        evicted.sort_by(|a, b| {
            a.enqueued_time_utc
                .cmp(&b.enqueued_time_utc)
                .then_with(|| a.event_id.cmp(&b.event_id))
        });
        evicted
    }

    /// Cumulative count: held plus ever removed.
    pub fn count(&self) -> u64 {
        self.held as u64 + self.removed
    }

    /// Observations currently held.
    pub fn len(&self) -> usize {
        self.held
    }

    pub fn is_empty(&self) -> bool {
        self.held == 0
    }

    /// Number of distinct event ids currently held.
    pub fn keys(&self) -> usize {
        self.db.len()
    }
}
