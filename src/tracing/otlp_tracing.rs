use opentelemetry::runtime::Tokio;
use opentelemetry::sdk::trace::{config, Sampler, Tracer};
use opentelemetry::sdk::Resource;
use opentelemetry::KeyValue;
use opentelemetry_otlp::WithExportConfig;

use crate::errors::ConfigError;

/// Export spans to an OpenTelemetry collector.
///
/// The exporter speaks OTLP over gRPC only, so the collector needs its
/// gRPC receiver enabled.
#[derive(Debug, Clone)]
pub struct OtlpTracingConfig {
    /// Service name, identifies this joiner deployment.
    pub service_name: String,
    /// Collector endpoint. The exporter's default, port 4317 on
    /// localhost, when unset.
    pub url: Option<String>,
    /// Fraction of traces kept, from 0.0 to 1.0.
    pub sampling_ratio: f64,
}

impl OtlpTracingConfig {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            url: None,
            sampling_ratio: 1.0,
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_sampling_ratio(mut self, sampling_ratio: f64) -> Self {
        self.sampling_ratio = sampling_ratio;
        self
    }

    /// Install the batch pipeline on the current tokio runtime.
    pub(crate) fn build(&self) -> Result<Tracer, ConfigError> {
        let exporter = match &self.url {
            Some(url) => opentelemetry_otlp::new_exporter().tonic().with_endpoint(url),
            None => opentelemetry_otlp::new_exporter().tonic(),
        };

        opentelemetry_otlp::new_pipeline()
            .tracing()
            .with_exporter(exporter)
            .with_trace_config(
                config()
                    .with_sampler(Sampler::TraceIdRatioBased(self.sampling_ratio))
                    .with_resource(Resource::new(vec![KeyValue::new(
                        "service.name",
                        self.service_name.clone(),
                    )])),
            )
            .install_batch(Tokio)
            .map_err(|err| ConfigError::Invalid {
                key: "otlp",
                reason: format!("error installing tracer: {err}"),
            })
    }
}

#[test]
fn builder_sets_fields() {
    let conf = OtlpTracingConfig::new("joiner-test")
        .with_url("http://collector:4317")
        .with_sampling_ratio(0.5);
    assert_eq!(conf.service_name, "joiner-test");
    assert_eq!(conf.url.as_deref(), Some("http://collector:4317"));
    assert_eq!(conf.sampling_ratio, 0.5);
}
