//! API routes

mod health;
mod intercept;
pub mod metrics;
mod worker;

use axum::{Router, extract::DefaultBodyLimit};
use std::sync::Arc;

use crate::state::{AppState, MetricsHandle};

pub use intercept::SOURCE_HEADER;

/// Create the main router
pub fn create_router(state: AppState, metrics_handle: Option<Arc<MetricsHandle>>) -> Router {
    let worker = state.worker.clone();

    let mut router = Router::new()
        // Health check
        .merge(health::routes())
        // Worker events and inspection
        .merge(worker::routes())
        // Everything else is intercepted by the worker
        .fallback(intercept::intercept)
        .with_state(state)
        .layer(DefaultBodyLimit::max(10 * 1024 * 1024));

    // Add metrics endpoint if handle is provided
    if let Some(handle) = metrics_handle {
        router = router.merge(metrics::routes(handle, worker));
    }

    router
}
