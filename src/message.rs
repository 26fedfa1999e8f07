//! Data model flowing through the join.
//!
//! Interactions arrive as [`MessageBatch`]es, observations as single
//! [`Message`]s. The engine emits one [`JoinedBatch`] per interaction
//! batch and reports unjoinable observations as [`InvalidMessage`]s.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single interaction sub-event or observation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Correlation key shared by an interaction and its observations.
    pub event_id: String,
    /// Event time assigned by the upstream transport.
    pub enqueued_time_utc: Option<DateTime<Utc>>,
    /// Opaque payload.
    pub data: Vec<u8>,
    /// Malformed or control events are passed through unmatched and
    /// never looked up in the dangling store.
    pub is_joinable_event: bool,
}

impl Message {
    pub fn new(event_id: impl Into<String>, enqueued_time_utc: DateTime<Utc>, data: Vec<u8>) -> Self {
        Self {
            event_id: event_id.into(),
            enqueued_time_utc: Some(enqueued_time_utc),
            data,
            is_joinable_event: true,
        }
    }

    /// A control or malformed event which must not be joined.
    pub fn not_joinable(mut self) -> Self {
        self.is_joinable_event = false;
        self
    }
}

/// Interactions sharing one arrival timestamp, e.g. a multi-slot
/// decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageBatch {
    pub enqueued_time_utc: DateTime<Utc>,
    /// Source position, carried through to [`JoinedBatch`] for
    /// downstream checkpointing.
    pub offset: String,
    pub partition_id: String,
    pub sequence_number: i64,
    pub messages: Vec<Message>,
}

impl MessageBatch {
    /// Time to join a sub-event at. Sub-events without their own
    /// timestamp use the batch time.
    pub(crate) fn event_time(&self, message: &Message) -> DateTime<Utc> {
        message.enqueued_time_utc.unwrap_or(self.enqueued_time_utc)
    }
}

/// The joined form of one [`MessageBatch`].
///
/// `messages` holds one group per interaction sub-event, in arrival
/// order. Every group starts with the interaction followed by zero or
/// more matched observations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinedBatch {
    pub enqueued_time_utc: DateTime<Utc>,
    pub offset: String,
    pub partition_id: String,
    pub sequence_number: i64,
    pub messages: Vec<Vec<Message>>,
}

impl JoinedBatch {
    /// Start an empty joined batch at the position of `batch`.
    pub(crate) fn for_batch(batch: &MessageBatch) -> Self {
        Self {
            enqueued_time_utc: batch.enqueued_time_utc,
            offset: batch.offset.clone(),
            partition_id: batch.partition_id.clone(),
            sequence_number: batch.sequence_number,
            messages: Vec::with_capacity(batch.messages.len()),
        }
    }

    /// Number of observations joined across all groups.
    pub fn joined_observations(&self) -> usize {
        self.messages
            .iter()
            .map(|group| group.len().saturating_sub(1))
            .sum()
    }
}

/// Why an observation was reported to the invalid sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InvalidReason {
    /// Could not be joined within its allowed window.
    EvictedObservation,
    /// Non-joinable or missing an event time.
    NotJoinable,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvalidMessage {
    pub message: Message,
    pub reason: InvalidReason,
}

impl InvalidMessage {
    pub(crate) fn evicted(message: Message) -> Self {
        Self {
            message,
            reason: InvalidReason::EvictedObservation,
        }
    }

    pub(crate) fn not_joinable(message: Message) -> Self {
        Self {
            message,
            reason: InvalidReason::NotJoinable,
        }
    }
}
