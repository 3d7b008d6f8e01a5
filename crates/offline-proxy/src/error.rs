//! Proxy error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Unsupported scheme: {0}")]
    UnsupportedScheme(String),

    #[error("Network unavailable: {0}")]
    Unavailable(String),
}
