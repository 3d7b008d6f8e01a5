//! Prometheus metrics endpoint

use axum::{Router, extract::State, response::IntoResponse, routing::get};
use offline_core::OfflineWorker;
use std::sync::Arc;
use tracing::warn;

use crate::state::MetricsHandle;

#[derive(Clone)]
struct MetricsState {
    handle: Arc<MetricsHandle>,
    worker: Arc<OfflineWorker>,
}

/// Create metrics routes with the Prometheus handle
pub fn routes(handle: Arc<MetricsHandle>, worker: Arc<OfflineWorker>) -> Router {
    Router::new()
        .route("/metrics", get(get_metrics))
        .with_state(MetricsState { handle, worker })
}

/// GET /metrics - Prometheus metrics endpoint
///
/// The cache size gauge is sampled on every scrape.
async fn get_metrics(State(state): State<MetricsState>) -> impl IntoResponse {
    match state.worker.cache().total_size().await {
        Ok(size) => metrics::gauge!("offline_cache_size_bytes").set(size as f64),
        Err(e) => warn!("Failed to measure cache size: {}", e),
    }

    state.handle.render()
}
