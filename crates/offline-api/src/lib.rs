//! Offline Cache HTTP API
//!
//! This crate provides the Axum-based HTTP front of the offline worker:
//! the intercepting fallback handler plus the control, sync, push and
//! inspection endpoints under `/__sw`.

pub mod error;
pub mod routes;
pub mod state;

pub use error::ApiError;
pub use routes::create_router;
pub use state::{AppState, MetricsHandle};
