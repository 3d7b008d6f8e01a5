//! Application state

use offline_core::OfflineWorker;
use std::sync::Arc;

/// Handle used to render Prometheus metrics
pub type MetricsHandle = metrics_exporter_prometheus::PrometheusHandle;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub worker: Arc<OfflineWorker>,
}

impl AppState {
    pub fn new(worker: Arc<OfflineWorker>) -> Self {
        Self { worker }
    }
}
