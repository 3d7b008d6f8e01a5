//! Offline Cache Storage Layer
//!
//! This crate provides the cache-storage abstraction used by the offline
//! cache: named partitions of request/response pairs, plus the durable
//! queue of form submissions waiting for connectivity.

pub mod backend;
pub mod error;
pub mod local;
pub mod memory;
pub mod queue;

pub use backend::{CacheStorage, StoredResponse};
pub use error::StorageError;
pub use local::LocalStorage;
pub use memory::MemoryStorage;
pub use queue::{FileSubmissionStore, MemorySubmissionStore, PendingSubmission, SubmissionStore};
