//! Local HTTP API for scraping metrics and reading diagnostics.
//!
//! `/metrics` serves the Prometheus text format of the default
//! registry, which [`crate::metrics::initialize_metrics`] hooks the
//! OpenTelemetry meter provider into. `/diagnostics` serves a JSON
//! [`crate::metrics::DiagnosticsSnapshot`].
use axum::{
    extract::Extension,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use prometheus::{default_registry, Encoder, TextEncoder};
use std::{net::SocketAddr, sync::Arc};

use crate::errors::ConfigError;
use crate::metrics::Diagnostics;

pub const DEFAULT_METRICS_API_PORT: u16 = 3030;

struct State {
    diagnostics: Arc<Diagnostics>,
}

/// Read `JOINER_METRICS_API_PORT`, defaulting to
/// [`DEFAULT_METRICS_API_PORT`].
pub fn metrics_api_port() -> Result<u16, ConfigError> {
    match std::env::var("JOINER_METRICS_API_PORT") {
        Ok(var) => var.parse().map_err(|err| ConfigError::Invalid {
            key: "JOINER_METRICS_API_PORT",
            reason: format!("{err}"),
        }),
        Err(_) => Ok(DEFAULT_METRICS_API_PORT),
    }
}

fn router(diagnostics: Arc<Diagnostics>) -> Router {
    let shared_state = Arc::new(State { diagnostics });

    Router::new()
        .route("/metrics", get(get_metrics))
        .route("/diagnostics", get(get_diagnostics))
        .layer(Extension(shared_state))
}

/// Serve the API on all interfaces until the server fails.
pub async fn run_webserver(diagnostics: Arc<Diagnostics>) -> Result<(), ConfigError> {
    let port = metrics_api_port()?;
    let app = router(diagnostics);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("Starting metrics API server on {addr:?}");

    axum::Server::try_bind(&addr)
        .map_err(|err| ConfigError::Invalid {
            key: "JOINER_METRICS_API_PORT",
            reason: format!("unable to create local webserver at port {port}: {err}"),
        })?
        .serve(app.into_make_service())
        .await
        .map_err(|err| ConfigError::Invalid {
            key: "JOINER_METRICS_API_PORT",
            reason: format!("local webserver at port {port} failed: {err}"),
        })
}

fn respond(status: StatusCode, content_type: &str, body: String) -> Response {
    (status, [("content-type", content_type.to_string())], body).into_response()
}

async fn get_metrics() -> Response {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(err) = encoder.encode(&default_registry().gather(), &mut buffer) {
        tracing::warn!("Unable to encode metrics: {err}");
        return respond(
            StatusCode::INTERNAL_SERVER_ERROR,
            "text/plain",
            err.to_string(),
        );
    }
    match String::from_utf8(buffer) {
        Ok(body) => respond(StatusCode::OK, encoder.format_type(), body),
        Err(err) => respond(
            StatusCode::INTERNAL_SERVER_ERROR,
            "text/plain",
            err.to_string(),
        ),
    }
}

async fn get_diagnostics(Extension(state): Extension<Arc<State>>) -> impl IntoResponse {
    match serde_json::to_string(&state.diagnostics.snapshot()) {
        Ok(body) => respond(StatusCode::OK, "application/json", body),
        Err(err) => respond(
            StatusCode::INTERNAL_SERVER_ERROR,
            "text/plain",
            err.to_string(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn serves_diagnostics_json() {
        let state = Arc::new(State {
            diagnostics: Diagnostics::new(),
        });
        let response = get_diagnostics(Extension(state)).await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()["content-type"],
            "application/json"
        );
    }

    #[tokio::test]
    async fn serves_metrics_text() {
        let response = get_metrics().await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers()["content-type"]
            .to_str()
            .unwrap()
            .starts_with("text/plain"));
    }

    #[test]
    fn builds_router() {
        let _app = router(Diagnostics::new());
    }
}
