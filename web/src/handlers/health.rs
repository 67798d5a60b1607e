//! Health check endpoints.
//!
//! These endpoints are used by load balancers and monitoring systems
//! to verify service health.

use axum::{Json, http::StatusCode};
use serde::{Deserialize, Serialize};

/// Body of health responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthReport {
    /// `"ok"` or `"unavailable"`.
    pub status: String,
    /// Crate version of the running binary.
    pub version: String,
    /// Failure detail when not ok.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Simple health check endpoint (for basic liveness).
///
/// Returns 200 OK to indicate the service is running.
/// This endpoint does NOT check dependencies (database, etc.).
///
/// # Endpoint
///
/// ```text
/// GET /health
/// ```
///
/// # Response
///
/// ```json
/// { "status": "ok", "version": "0.1.0" }
/// ```
#[allow(clippy::unused_async)]
pub async fn health_check() -> (StatusCode, Json<HealthReport>) {
    (
        StatusCode::OK,
        Json(HealthReport {
            status: "ok".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            message: None,
        }),
    )
}

/// Readiness response from the outcome of a dependency check.
///
/// # Status Codes
///
/// - 200 OK: the check succeeded
/// - 503 Service Unavailable: the check failed
pub fn readiness<E: std::fmt::Display>(check: Result<(), E>) -> (StatusCode, Json<HealthReport>) {
    let version = env!("CARGO_PKG_VERSION").to_string();
    match check {
        Ok(()) => (
            StatusCode::OK,
            Json(HealthReport {
                status: "ok".to_string(),
                version,
                message: None,
            }),
        ),
        Err(err) => {
            tracing::warn!(error = %err, "Readiness check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthReport {
                    status: "unavailable".to_string(),
                    version,
                    message: Some(err.to_string()),
                }),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_simple_health_check() {
        let (status, Json(body)) = health_check().await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.status, "ok");
        assert!(!body.version.is_empty());
    }

    #[test]
    fn test_readiness_reports_check_failure() {
        let (status, Json(body)) = readiness(Err("connection refused"));
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body.status, "unavailable");
        assert_eq!(body.message.as_deref(), Some("connection refused"));

        let (status, _) = readiness::<String>(Ok(()));
        assert_eq!(status, StatusCode::OK);
    }
}
