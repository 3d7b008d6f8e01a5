//! Offline Cache Network Client
//!
//! This crate provides the network side of the offline cache: the
//! request/response types passed through the interception layer and
//! the client that forwards them to their origin.

pub mod client;
pub mod error;
pub mod request;

pub use client::{Fetcher, HOP_HEADER, HttpFetcher, HttpFetcherConfig};
pub use error::ProxyError;
pub use request::{FetchRequest, FetchResponse};
