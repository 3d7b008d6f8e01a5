//! Cache management module

mod manager;

pub use manager::{
    CacheConfig, CacheManager, CacheStats, EvictionReport, Partition, PartitionStats,
    spawn_cleanup_task, to_response, to_stored,
};
