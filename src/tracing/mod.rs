//! Logging and trace export setup.
//!
//! Log lines for the `joiner` target always go to stdout, at `ERROR`
//! unless a lower level is asked for. Spans can additionally be shipped
//! to an OpenTelemetry collector over OTLP.
use tokio::runtime::EnterGuard;
use tracing::{level_filters::LevelFilter, Subscriber};
use tracing_subscriber::{filter::Targets, layer::SubscriberExt, Layer, Registry};

use crate::errors::ConfigError;

pub(crate) mod otlp_tracing;

pub use otlp_tracing::OtlpTracingConfig;

/// Owns the runtime the batch span exporter runs on.
///
/// Drop it only after the traced work is finished.
pub struct JoinerTracer {
    rt: tokio::runtime::Runtime,
}

pub(crate) fn get_log_level(level: Option<&str>) -> Result<LevelFilter, ConfigError> {
    if let Some(level) = level {
        match level.to_lowercase().as_str() {
            "trace" => Ok(LevelFilter::TRACE),
            "debug" => Ok(LevelFilter::DEBUG),
            "info" => Ok(LevelFilter::INFO),
            "warn" => Ok(LevelFilter::WARN),
            "error" => Ok(LevelFilter::ERROR),
            level => Err(ConfigError::Invalid {
                key: "log_level",
                reason: format!("unknown log level {level:?}"),
            }),
        }
    } else {
        Ok(LevelFilter::ERROR)
    }
}

impl JoinerTracer {
    pub fn new() -> Result<Self, ConfigError> {
        let rt = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("joiner-tracing")
            .enable_all()
            .build()?;
        Ok(Self { rt })
    }

    /// Install the global subscriber. With `otlp`, spans are exported
    /// too.
    ///
    /// Hold the returned guard while the traced code runs.
    pub fn setup(
        &self,
        otlp: Option<OtlpTracingConfig>,
        log_level: Option<&str>,
    ) -> Result<EnterGuard<'_>, ConfigError> {
        let guard = self.rt.enter();

        let log_level = get_log_level(log_level)?;

        let logs = tracing_subscriber::fmt::Layer::default()
            .compact()
            .with_file(true)
            .with_line_number(true)
            .with_thread_ids(true)
            .with_filter(Targets::new().with_target("joiner", log_level));

        if let Some(conf) = otlp {
            let tracer = conf.build()?;
            let telemetry = tracing_opentelemetry::layer()
                .with_tracer(tracer)
                // Every span, regardless of the log level.
                .with_filter(Targets::new().with_target("joiner", LevelFilter::TRACE));
            set_global_subscriber(Registry::default().with(logs).with(telemetry));
        } else {
            set_global_subscriber(Registry::default().with(logs));
        };
        Ok(guard)
    }
}

// A second installation is reported and ignored.
fn set_global_subscriber<S>(subscriber: S)
where
    S: Subscriber + Send + Sync + 'static,
{
    if let Err(err) = tracing::subscriber::set_global_default(subscriber) {
        tracing::warn!("{err}");
    }
}

#[test]
fn log_levels_parse() {
    assert_eq!(get_log_level(None).unwrap(), LevelFilter::ERROR);
    assert_eq!(get_log_level(Some("DEBUG")).unwrap(), LevelFilter::DEBUG);
    assert_eq!(get_log_level(Some("warn")).unwrap(), LevelFilter::WARN);
    assert!(get_log_level(Some("loud")).is_err());
}

#[test]
fn setup_twice_does_not_fail() {
    let tracer = JoinerTracer::new().unwrap();
    let first = tracer.setup(None, Some("info")).unwrap();
    drop(first);
    let second = tracer.setup(None, Some("debug")).unwrap();
    drop(second);
}
