//! Readiness and metrics endpoints.
//!
//! Liveness (`GET /health`) comes from `slotledger_web::handlers`.

use super::state::AppState;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::Json;
use slotledger_core::store::OrderStore;
use slotledger_web::handlers::{HealthReport, readiness};

/// Readiness check endpoint.
///
/// Returns 200 once the database answers a ping, 503 otherwise.
///
/// # Example
///
/// ```bash
/// curl http://localhost:8080/ready
/// # {"status":"ok","version":"0.1.0"}
/// ```
pub async fn readiness_check(State(state): State<AppState>) -> (StatusCode, Json<HealthReport>) {
    readiness(state.stores.orders.ping().await)
}

/// Prometheus scrape endpoint.
#[allow(clippy::unused_async)]
pub async fn metrics_endpoint(State(state): State<AppState>) -> Response {
    match state.metrics {
        Some(handle) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => slotledger_web::AppError::unavailable("Metrics recorder not installed")
            .into_response(),
    }
}
