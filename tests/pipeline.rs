use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};

use joiner::inputs::{ChannelSource, Source};
use joiner::metrics::Diagnostics;
use joiner::outputs::{ChannelInvalidSink, ChannelSink, StdOutput};
use joiner::window::clock::TestingClock;
use joiner::{
    shutdown_pair, spawn_join_engine, supervise, InvalidReason, JoinConfig, JoinEngine,
    JoinError, Message, MessageBatch, RecvError, StartPosition,
};

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2022, 6, 1, 12, 0, 0).unwrap()
}

fn config() -> JoinConfig {
    JoinConfig::from_json_str(
        r#"{
            "engine_id": "pipeline",
            "forward_window_ms": 10000,
            "backward_window_ms": 4000,
            "punctuation_timeout_ms": 5,
            "punctuation_slack_ms": 1000,
            "slack_mode": "subtractive",
            "max_receive_timeout_retries": 0
        }"#,
    )
    .unwrap()
}

fn msg(id: &str, offset_s: i64) -> Message {
    Message::new(id, t0() + Duration::seconds(offset_s), vec![])
}

fn batch(seq: i64, offset_s: i64, ids: &[&str]) -> MessageBatch {
    MessageBatch {
        enqueued_time_utc: t0() + Duration::seconds(offset_s),
        offset: seq.to_string(),
        partition_id: "0".to_string(),
        sequence_number: seq,
        messages: ids.iter().map(|id| msg(id, offset_s)).collect(),
    }
}

#[tokio::test]
async fn spawned_engine_joins_live_streams() {
    let (interactions_tx, interactions) = ChannelSource::bounded(8);
    let (observations_tx, observations) = ChannelSource::bounded(8);
    let (sink, mut output) = ChannelSink::bounded(8);
    let (invalid_sink, mut invalid) = ChannelInvalidSink::bounded(8);
    let (handle, shutdown) = shutdown_pair();
    let diagnostics = Diagnostics::new();

    // A clock that never passes the data, so only observations move
    // the observation watermark.
    let engine = JoinEngine::new(config(), interactions, observations, sink)
        .unwrap()
        .with_invalid_sink(invalid_sink)
        .with_clock(TestingClock::frozen(t0()))
        .with_shutdown(shutdown)
        .with_diagnostics(diagnostics.clone());

    for observation in [
        msg("early", 0),
        msg("late", 3),
        msg("tick", 12),
        msg("stray", 2),
        msg("tick", 41),
    ] {
        observations_tx.send(observation).await.unwrap();
    }
    interactions_tx
        .send(batch(1, 1, &["early", "late"]))
        .await
        .unwrap();
    interactions_tx.send(batch(2, 30, &["next"])).await.unwrap();

    let task = spawn_join_engine(engine);

    let joined = output.recv().await.unwrap();
    assert_eq!(joined.sequence_number, 1);
    assert_eq!(joined.messages.len(), 2);
    assert_eq!(joined.messages[0].len(), 2);
    assert_eq!(joined.messages[1].len(), 2);

    let joined = output.recv().await.unwrap();
    assert_eq!(joined.sequence_number, 2);
    assert_eq!(joined.messages[0].len(), 1);

    // Both fall behind 30s minus the backward window.
    let evicted = invalid.recv().await.unwrap();
    assert_eq!(evicted.reason, InvalidReason::EvictedObservation);
    assert_eq!(evicted.message, msg("stray", 2));
    let evicted = invalid.recv().await.unwrap();
    assert_eq!(evicted.message, msg("tick", 12));

    handle.cancel();
    let snapshot = task.await.unwrap().unwrap();
    assert_eq!(snapshot.batches_emitted, 2);
    assert_eq!(snapshot.observations_joined, 2);
    assert_eq!(snapshot.observations_evicted, 2);
    assert_eq!(snapshot.observations_out_of_order, 1);
    assert_eq!(diagnostics.snapshot(), snapshot);
    assert!(output.recv().await.is_none());
}

#[tokio::test]
async fn closed_interactions_finish_cleanly() {
    let (sink, mut output) = ChannelSink::bounded(8);
    let engine = JoinEngine::new(
        config(),
        ChannelSource::from_items([batch(1, 0, &["a"]), batch(2, 1, &["b"])]),
        ChannelSource::from_items([msg("b", 2), msg("a", 1)]),
        sink,
    )
    .unwrap();

    let snapshot = spawn_join_engine(engine).await.unwrap().unwrap();
    assert_eq!(snapshot.batches_emitted, 2);
    assert_eq!(snapshot.interactions_received, 2);

    let mut sizes = Vec::new();
    while let Some(joined) = output.recv().await {
        sizes.push(joined.messages[0].len());
    }
    assert_eq!(sizes, vec![2, 2]);
}

#[tokio::test]
async fn std_output_writes_json_lines() {
    let engine = JoinEngine::new(
        config(),
        ChannelSource::from_items([batch(1, 0, &["a"])]),
        ChannelSource::from_items([msg("a", 1)]),
        StdOutput::with_writer(Vec::new()),
    )
    .unwrap();
    let snapshot = engine.run().await.unwrap();
    assert_eq!(snapshot.batches_emitted, 1);
}

/// An observation source that reports an expired position until it
/// is recreated from the fallback position.
struct Expiring {
    position: StartPosition,
    items: Vec<Message>,
}

#[async_trait]
impl Source for Expiring {
    type Item = Message;

    async fn recv(&mut self, _timeout: StdDuration) -> Result<Option<Message>, RecvError> {
        match self.position {
            StartPosition::Checkpoint => Err(RecvError::InvalidPosition("expired".to_string())),
            StartPosition::Fallback => Ok(self.items.pop()),
        }
    }
}

#[tokio::test]
async fn supervisor_restarts_from_fallback() {
    let (sink, mut output) = ChannelSink::bounded(8);
    let fallback_sink = Arc::new(Mutex::new(Some(sink)));
    let attempts = Arc::new(AtomicUsize::new(0));
    let (_handle, shutdown) = shutdown_pair();

    let factory = {
        let attempts = attempts.clone();
        move |position: StartPosition| {
            attempts.fetch_add(1, Ordering::SeqCst);
            let engine_sink = match position {
                StartPosition::Fallback => fallback_sink.lock().unwrap().take(),
                StartPosition::Checkpoint => None,
            }
            .unwrap_or_else(|| ChannelSink::bounded(1).0);
            async move {
                JoinEngine::new(
                    config(),
                    ChannelSource::from_items([batch(1, 0, &["a"])]),
                    Expiring {
                        position,
                        items: vec![msg("a", 1)],
                    },
                    engine_sink,
                )
            }
        }
    };

    let snapshot = supervise(factory, shutdown, 3).await.unwrap();
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
    assert_eq!(snapshot.batches_emitted, 1);
    let joined = output.recv().await.unwrap();
    assert_eq!(joined.messages[0].len(), 2);
    assert!(output.recv().await.is_none());
}

struct Broken;

#[async_trait]
impl Source for Broken {
    type Item = MessageBatch;

    async fn recv(&mut self, _timeout: StdDuration) -> Result<Option<MessageBatch>, RecvError> {
        Err(RecvError::Fault("disk on fire".to_string()))
    }
}

#[tokio::test]
async fn supervisor_gives_up_after_max_restarts() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let (_handle, shutdown) = shutdown_pair();
    let factory = {
        let attempts = attempts.clone();
        move |position: StartPosition| {
            attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                assert_eq!(position, StartPosition::Checkpoint);
                JoinEngine::new(
                    config(),
                    Broken,
                    ChannelSource::<Message>::from_items([]),
                    ChannelSink::bounded(1).0,
                )
            }
        }
    };

    let err = supervise(factory, shutdown, 2).await.unwrap_err();
    assert!(matches!(
        err,
        JoinError::Source {
            source_name: "interaction",
            ..
        }
    ));
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
}
