pub mod health;

use std::sync::Arc;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::trace::TraceLayer;

use health::HealthState;

/// Operational HTTP surface of the worker.
pub fn router(state: HealthState, metrics: Arc<PrometheusHandle>) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .route("/ping", get(health::ping))
        .route("/info", get(health::info))
        .with_state(state)
        // Prometheus metrics endpoint (separate state)
        .route("/metrics", get(prometheus_metrics).with_state(metrics))
        .fallback(health::not_found)
        .layer(TraceLayer::new_for_http())
}

/// Prometheus text exposition.
pub async fn prometheus_metrics(State(handle): State<Arc<PrometheusHandle>>) -> impl IntoResponse {
    handle.render()
}
