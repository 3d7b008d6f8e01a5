//! Core error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Storage error: {0}")]
    Storage(#[from] offline_storage::StorageError),

    #[error("Network error: {0}")]
    Proxy(#[from] offline_proxy::ProxyError),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Failed to cache {url}: {reason}")]
    CacheAll { url: String, reason: String },

    #[error("Installation failed: {0}")]
    InstallFailed(String),

    #[error("Invalid lifecycle transition: {0}")]
    InvalidState(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),
}
