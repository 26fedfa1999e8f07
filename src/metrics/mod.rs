//! Diagnostics for the join engine.
//!
//! Every value is recorded twice: into OpenTelemetry instruments,
//! exported to Prometheus once [`initialize_metrics`] ran, and into a
//! shared [`Diagnostics`] of atomics that callers and tests can read
//! directly. Nothing here feeds back into control flow.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use opentelemetry::{
    global,
    metrics::{Counter, Histogram},
    sdk::metrics::{Aggregation, Instrument, MeterProvider, Stream},
    KeyValue,
};
use prometheus::default_registry;
use serde::Serialize;

use crate::errors::ConfigError;

#[macro_export]
macro_rules! with_timer {
    ($histogram: expr, $labels: expr, $body: expr) => {{
        let now = std::time::Instant::now();
        let res = $body;
        $histogram.record(now.elapsed().as_secs_f64(), &$labels);
        res
    }};
}

/// Initialize the global registry for Prometheus metrics,
/// and create a global MeterProvider.
pub fn initialize_metrics() -> Result<(), ConfigError> {
    // Initialize the global default registry for prometheus metrics
    // as internally it's a lazy static.
    let registry = default_registry();
    let exporter = opentelemetry_prometheus::exporter()
        .with_registry(registry.clone())
        .with_namespace("joiner")
        .build()
        .map_err(|err| ConfigError::Invalid {
            key: "metrics",
            reason: err.to_string(),
        })?;

    // Create a global MeterProvider
    let provider = MeterProvider::builder()
        .with_reader(exporter)
        .with_view(
            opentelemetry_sdk::metrics::new_view(
                Instrument::new().name("*duration*"), // Must match histogram name
                Stream::new().aggregation(Aggregation::ExplicitBucketHistogram {
                    boundaries: vec![
                        0.0, 0.0005, 0.005, 0.01, 0.025, 0.05, 0.075, 0.1, 0.25, 0.5, 0.75, 1.0,
                        2.5, 5.0, 7.5, 10.0, 30.0, 60.0, 300.0, 600.0,
                    ],
                    record_min_max: true,
                }),
            )
            .map_err(|err| ConfigError::Invalid {
                key: "metrics",
                reason: err.to_string(),
            })?,
        )
        .build();
    global::set_meter_provider(provider);
    Ok(())
}

/// Plain counters shared with whoever supervises the engine.
#[derive(Debug, Default)]
pub struct Diagnostics {
    interactions_received: AtomicU64,
    observations_received: AtomicU64,
    interactions_out_of_order: AtomicU64,
    observations_out_of_order: AtomicU64,
    observations_joined: AtomicU64,
    observations_evicted: AtomicU64,
    observations_not_joinable: AtomicU64,
    batches_emitted: AtomicU64,
    dangling_observations: AtomicU64,
}

/// Point-in-time copy of [`Diagnostics`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DiagnosticsSnapshot {
    pub interactions_received: u64,
    pub observations_received: u64,
    pub interactions_out_of_order: u64,
    pub observations_out_of_order: u64,
    pub observations_joined: u64,
    pub observations_evicted: u64,
    pub observations_not_joinable: u64,
    pub batches_emitted: u64,
    /// Cumulative, see [`crate::dangling::DanglingObservations::count`].
    pub dangling_observations: u64,
}

impl Diagnostics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            interactions_received: self.interactions_received.load(Ordering::Relaxed),
            observations_received: self.observations_received.load(Ordering::Relaxed),
            interactions_out_of_order: self.interactions_out_of_order.load(Ordering::Relaxed),
            observations_out_of_order: self.observations_out_of_order.load(Ordering::Relaxed),
            observations_joined: self.observations_joined.load(Ordering::Relaxed),
            observations_evicted: self.observations_evicted.load(Ordering::Relaxed),
            observations_not_joinable: self.observations_not_joinable.load(Ordering::Relaxed),
            batches_emitted: self.batches_emitted.load(Ordering::Relaxed),
            dangling_observations: self.dangling_observations.load(Ordering::Relaxed),
        }
    }

    pub fn dangling_observations(&self) -> u64 {
        self.dangling_observations.load(Ordering::Relaxed)
    }
}

/// Instruments for one engine instance, labelled with its engine id.
pub(crate) struct JoinMetrics {
    diagnostics: Arc<Diagnostics>,
    labels: Vec<KeyValue>,
    interactions_received: Counter<u64>,
    observations_received: Counter<u64>,
    interactions_out_of_order: Counter<u64>,
    observations_out_of_order: Counter<u64>,
    observations_joined: Counter<u64>,
    observations_evicted: Counter<u64>,
    observations_not_joinable: Counter<u64>,
    batches_emitted: Counter<u64>,
    observation_latency: Histogram<f64>,
    pub(crate) join_batch_duration: Histogram<f64>,
}

impl JoinMetrics {
    pub(crate) fn new(engine_id: &str, diagnostics: Arc<Diagnostics>) -> Self {
        let meter = global::meter("joiner");
        let counter = |name: &'static str, description: &'static str| {
            meter.u64_counter(name).with_description(description).init()
        };
        Self {
            diagnostics,
            labels: vec![KeyValue::new("engine_id", engine_id.to_string())],
            interactions_received: counter(
                "interactions_received",
                "number of interaction sub-events received",
            ),
            observations_received: counter(
                "observations_received",
                "number of observations received",
            ),
            interactions_out_of_order: counter(
                "interactions_out_of_order",
                "interaction batches older than the last processed batch",
            ),
            observations_out_of_order: counter(
                "observations_out_of_order",
                "observations older than the last received observation",
            ),
            observations_joined: counter(
                "observations_joined",
                "observations joined to an interaction",
            ),
            observations_evicted: counter(
                "observations_evicted",
                "observations evicted without a matching interaction",
            ),
            observations_not_joinable: counter(
                "observations_not_joinable",
                "observations that were never joinable",
            ),
            batches_emitted: counter("batches_emitted", "joined batches sent downstream"),
            observation_latency: meter
                .f64_histogram("observation_latency_duration_seconds")
                .with_description("observation event time minus interaction event time")
                .init(),
            join_batch_duration: meter
                .f64_histogram("join_batch_duration_seconds")
                .with_description("time spent assembling one joined batch")
                .init(),
        }
    }

    pub(crate) fn labels(&self) -> &[KeyValue] {
        &self.labels
    }

    fn bump(counter: &Counter<u64>, mirror: &AtomicU64, by: u64, labels: &[KeyValue]) {
        if by > 0 {
            counter.add(by, labels);
            mirror.fetch_add(by, Ordering::Relaxed);
        }
    }

    pub(crate) fn interactions_received(&self, by: u64) {
        Self::bump(
            &self.interactions_received,
            &self.diagnostics.interactions_received,
            by,
            &self.labels,
        );
    }

    pub(crate) fn observation_received(&self) {
        Self::bump(
            &self.observations_received,
            &self.diagnostics.observations_received,
            1,
            &self.labels,
        );
    }

    pub(crate) fn interaction_out_of_order(&self) {
        Self::bump(
            &self.interactions_out_of_order,
            &self.diagnostics.interactions_out_of_order,
            1,
            &self.labels,
        );
    }

    pub(crate) fn observation_out_of_order(&self) {
        Self::bump(
            &self.observations_out_of_order,
            &self.diagnostics.observations_out_of_order,
            1,
            &self.labels,
        );
    }

    pub(crate) fn observations_joined(&self, by: u64) {
        Self::bump(
            &self.observations_joined,
            &self.diagnostics.observations_joined,
            by,
            &self.labels,
        );
    }

    pub(crate) fn observations_evicted(&self, by: u64) {
        Self::bump(
            &self.observations_evicted,
            &self.diagnostics.observations_evicted,
            by,
            &self.labels,
        );
    }

    pub(crate) fn observation_not_joinable(&self) {
        Self::bump(
            &self.observations_not_joinable,
            &self.diagnostics.observations_not_joinable,
            1,
            &self.labels,
        );
    }

    pub(crate) fn batch_emitted(&self) {
        Self::bump(
            &self.batches_emitted,
            &self.diagnostics.batches_emitted,
            1,
            &self.labels,
        );
    }

    /// Seconds from interaction to observation event time; negative
    /// when the observation led.
    pub(crate) fn observation_latency(&self, seconds: f64) {
        self.observation_latency.record(seconds, &self.labels);
    }

    pub(crate) fn dangling_observations(&self, count: u64) {
        self.diagnostics
            .dangling_observations
            .store(count, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_mirror_into_diagnostics() {
        let diagnostics = Diagnostics::new();
        let metrics = JoinMetrics::new("test", diagnostics.clone());

        metrics.interactions_received(3);
        metrics.observation_received();
        metrics.observations_joined(2);
        metrics.observations_evicted(0);
        metrics.batch_emitted();
        metrics.dangling_observations(5);

        let snap = diagnostics.snapshot();
        assert_eq!(snap.interactions_received, 3);
        assert_eq!(snap.observations_received, 1);
        assert_eq!(snap.observations_joined, 2);
        assert_eq!(snap.observations_evicted, 0);
        assert_eq!(snap.batches_emitted, 1);
        assert_eq!(snap.dangling_observations, 5);
        assert_eq!(metrics.labels().len(), 1);
    }

    #[test]
    fn with_timer_returns_body() {
        let diagnostics = Diagnostics::new();
        let metrics = JoinMetrics::new("test", diagnostics);
        let labels = metrics.labels().to_vec();
        let value = with_timer!(metrics.join_batch_duration, labels, 40 + 2);
        assert_eq!(value, 42);
    }
}
