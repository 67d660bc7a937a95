//! Prometheus /metrics + health check HTTP endpoints
//!
//! Endpoints:
//!   GET /metrics  Prometheus text format
//!   GET /healthz  Liveness probe (always 200 if process is running)
//!   GET /readyz   Readiness probe (200 if storage is reachable)

use anyhow::Result;
use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Router};
use cv_stream::SweepReport;
use prometheus_client::{encoding::text::encode, metrics::counter::Counter, registry::Registry};
use std::sync::Arc;

/// Shared state for the HTTP handlers
#[derive(Clone)]
pub struct HealthState {
    pub registry: Arc<Registry>,
    pub operator: opendal::Operator,
    pub prefix: String,
}

/// Expiry sweep counters
#[derive(Clone, Default)]
pub struct ExpiryMetrics {
    sweeps: Counter,
    deleted: Counter,
    failed: Counter,
}

impl ExpiryMetrics {
    /// Create the counters and register them (`_total` is appended on export).
    pub fn new(registry: &mut Registry) -> Self {
        let metrics = Self::default();
        registry.register(
            "cv_expiry_sweeps",
            "Expiry sweeps completed",
            metrics.sweeps.clone(),
        );
        registry.register(
            "cv_expiry_deleted",
            "Expired files removed",
            metrics.deleted.clone(),
        );
        registry.register(
            "cv_expiry_failed",
            "Expired files whose removal failed",
            metrics.failed.clone(),
        );
        metrics
    }

    pub fn record(&self, report: &SweepReport) {
        self.sweeps.inc();
        self.deleted.inc_by(report.deleted as u64);
        self.failed.inc_by(report.failed as u64);
    }
}

pub fn router(state: HealthState) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/healthz", get(healthz_handler))
        .route("/readyz", get(readyz_handler))
        .with_state(state)
}

/// Serve Prometheus metrics and health endpoints on `addr` (e.g. "127.0.0.1:9100")
pub async fn serve(addr: String, state: HealthState) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| anyhow::anyhow!("metrics bind {addr}: {e}"))?;

    tracing::info!(addr = %addr, "metrics: listening on /metrics, /healthz, /readyz");

    axum::serve(listener, router(state))
        .await
        .map_err(|e| anyhow::anyhow!("metrics server: {e}"))
}

fn render(registry: &Registry) -> Result<String, std::fmt::Error> {
    let mut body = String::new();
    encode(&mut body, registry)?;
    Ok(body)
}

async fn metrics_handler(State(state): State<HealthState>) -> impl IntoResponse {
    match render(&state.registry) {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4")],
            body,
        ),
        Err(e) => {
            tracing::error!("metrics encode failed: {e}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [("content-type", "text/plain")],
                e.to_string(),
            )
        }
    }
}

/// Liveness probe: returns 200 if the process is running.
async fn healthz_handler() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

async fn readiness(state: &HealthState) -> (StatusCode, &'static str) {
    match cv_storage::check_health(&state.operator, &state.prefix).await {
        Ok(()) => (StatusCode::OK, "ready"),
        Err(_) => (StatusCode::SERVICE_UNAVAILABLE, "storage unreachable"),
    }
}

/// Readiness probe: returns 200 if storage is reachable, 503 otherwise.
async fn readyz_handler(State(state): State<HealthState>) -> impl IntoResponse {
    readiness(&state).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sweep_counters_are_exported() {
        let mut registry = Registry::default();
        let metrics = ExpiryMetrics::new(&mut registry);

        metrics.record(&SweepReport {
            scanned: 3,
            deleted: 2,
            failed: 1,
        });
        metrics.record(&SweepReport::default());

        let body = render(&registry).unwrap();
        assert!(body.contains("cv_expiry_sweeps_total 2"), "{body}");
        assert!(body.contains("cv_expiry_deleted_total 2"), "{body}");
        assert!(body.contains("cv_expiry_failed_total 1"), "{body}");
    }

    #[tokio::test]
    async fn memory_store_is_ready() {
        let operator = opendal::Operator::new(opendal::services::Memory::default())
            .unwrap()
            .finish();
        let state = HealthState {
            registry: Arc::new(Registry::default()),
            operator,
            prefix: "files".into(),
        };
        assert_eq!(readiness(&state).await.0, StatusCode::OK);
    }
}
