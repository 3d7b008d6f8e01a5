//! Offline Cache Core Logic
//!
//! This crate provides the core functionality of the offline cache:
//! request classification, cache-first and network-first serving,
//! size-based eviction, the install/activate lifecycle, control
//! messages, background sync and push notifications.

pub mod cache;
pub mod classify;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod message;
pub mod push;
pub mod sync;
pub mod worker;

pub use cache::{
    CacheConfig, CacheManager, CacheStats, EvictionReport, Partition, spawn_cleanup_task,
};
pub use classify::{Destination, Strategy};
pub use config::{PartitionNames, WorkerConfig};
pub use error::CoreError;
pub use lifecycle::{Lifecycle, WorkerState};
pub use message::{ControlMessage, ControlReply};
pub use push::{Notification, NotificationAction, PushPayload};
pub use sync::{PeriodicSyncTag, RefreshReport, SyncReport, SyncTag};
pub use worker::{InstallReport, OfflineWorker, Served, ServedFrom};
