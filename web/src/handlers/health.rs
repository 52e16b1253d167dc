//! Health check and metrics endpoints.
//!
//! These endpoints are used by load balancers, orchestrators and Prometheus.

use crate::state::AppState;
use axum::{Json, extract::State, http::StatusCode};
use boxoffice_runtime::{HealthReport, HealthStatus};

/// Liveness: the process is up. Does NOT check dependencies.
///
/// ```text
/// GET /health
/// ```
#[allow(clippy::unused_async)]
pub async fn health_check() -> (StatusCode, &'static str) {
    (StatusCode::OK, "ok")
}

/// Readiness: the snapshot store answers.
///
/// - 200 OK: Healthy or Degraded
/// - 503 Service Unavailable: Unhealthy
///
/// ```text
/// GET /health/ready
/// ```
pub async fn readiness(State(state): State<AppState>) -> (StatusCode, Json<HealthReport>) {
    let report = state.orchestrator.health().await;

    let status = match report.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status, Json(report))
}

/// Prometheus scrape endpoint; 404 when no recorder is installed.
///
/// ```text
/// GET /metrics
/// ```
#[allow(clippy::unused_async)]
pub async fn metrics(State(state): State<AppState>) -> (StatusCode, String) {
    match state.metrics.as_ref().and_then(|server| server.render()) {
        Some(body) => (StatusCode::OK, body),
        None => (StatusCode::NOT_FOUND, "metrics recorder not installed".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_health_check() {
        let (status, body) = health_check().await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "ok");
    }
}
