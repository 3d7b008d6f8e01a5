//! Cache manager implementation

use http::header::{HeaderName, HeaderValue};
use http::{HeaderMap, StatusCode};
use offline_proxy::FetchResponse;
use offline_storage::{CacheStorage, StoredResponse};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::config::PartitionNames;
use crate::error::CoreError;

/// Configuration for the cache manager
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Size budget across all partitions in bytes
    pub max_size: u64,
    /// Share of dynamic entries removed when over budget
    pub eviction_fraction: f64,
    /// How often the size check runs
    pub cleanup_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_size: 50 * 1024 * 1024, // 50 MB
            eviction_fraction: 0.25,
            cleanup_interval: Duration::from_secs(60),
        }
    }
}

/// One of the two partitions owned by the current version
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Partition {
    /// Versioned first-party assets, never evicted by size
    Static,
    /// Opportunistically cached responses, evicted oldest-first
    Dynamic,
}

/// Statistics for a single partition
#[derive(Debug, Clone, Serialize)]
pub struct PartitionStats {
    pub name: String,
    pub entry_count: usize,
    pub total_size: u64,
}

/// Cache statistics
#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheStats {
    pub hit_count: u64,
    pub miss_count: u64,
    pub total_size: u64,
    pub partitions: Vec<PartitionStats>,
}

/// Outcome of a size check
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EvictionReport {
    /// Total size measured before evicting
    pub total_size: u64,
    /// Keys removed from the dynamic partition, oldest first
    pub evicted: Vec<String>,
    /// Bytes released by the removed entries
    pub freed: u64,
}

/// Convert a network response into its stored form
pub fn to_stored(url: &str, response: &FetchResponse) -> StoredResponse {
    let headers = response
        .headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect();

    StoredResponse::new(url, response.status.as_u16(), headers, response.body.clone())
}

/// Convert a stored entry back into a response
pub fn to_response(stored: StoredResponse) -> FetchResponse {
    let mut headers = HeaderMap::with_capacity(stored.headers.len());
    for (name, value) in &stored.headers {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            headers.append(name, value);
        }
    }

    FetchResponse {
        status: StatusCode::from_u16(stored.status).unwrap_or(StatusCode::OK),
        headers,
        body: stored.body,
    }
}

/// Cache manager owning the static and dynamic partitions
pub struct CacheManager {
    storage: Arc<dyn CacheStorage>,
    names: PartitionNames,
    config: CacheConfig,
    stats: RwLock<CacheStats>,
}

impl CacheManager {
    /// Create a new cache manager
    pub fn new(storage: Arc<dyn CacheStorage>, names: PartitionNames, config: CacheConfig) -> Self {
        info!(
            "Initializing cache manager (static: {}, dynamic: {}, max_size: {} bytes)",
            names.static_name, names.dynamic_name, config.max_size
        );

        Self {
            storage,
            names,
            config,
            stats: RwLock::new(CacheStats::default()),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn names(&self) -> &PartitionNames {
        &self.names
    }

    pub fn partition_name(&self, partition: Partition) -> &str {
        match partition {
            Partition::Static => &self.names.static_name,
            Partition::Dynamic => &self.names.dynamic_name,
        }
    }

    /// Create a partition if it does not exist
    pub async fn open(&self, partition: Partition) -> Result<(), CoreError> {
        Ok(self.storage.open_partition(self.partition_name(partition)).await?)
    }

    /// Look a request up in every partition, in creation order
    pub async fn match_request(&self, key: &str) -> Result<Option<StoredResponse>, CoreError> {
        for name in self.storage.partitions().await? {
            if let Some(entry) = self.storage.get(&name, key).await? {
                debug!("Cache hit for {} in {}", key, name);
                self.record_hit().await;
                return Ok(Some(entry));
            }
        }

        self.record_miss().await;
        Ok(None)
    }

    /// Read an entry from one partition
    pub async fn get(
        &self,
        partition: Partition,
        key: &str,
    ) -> Result<Option<StoredResponse>, CoreError> {
        Ok(self.storage.get(self.partition_name(partition), key).await?)
    }

    /// Keys of one partition, oldest first
    pub async fn keys(&self, partition: Partition) -> Result<Vec<String>, CoreError> {
        Ok(self.storage.keys(self.partition_name(partition)).await?)
    }

    /// Store a response; only 200 responses are written
    pub async fn put(
        &self,
        partition: Partition,
        key: &str,
        response: &FetchResponse,
    ) -> Result<bool, CoreError> {
        if !response.is_cacheable() {
            debug!("Not caching {} (status {})", key, response.status);
            return Ok(false);
        }

        let name = self.partition_name(partition);
        self.storage.put(name, key, to_stored(key, response)).await?;
        debug!("Cached {} in {} ({} bytes)", key, name, response.body.len());
        Ok(true)
    }

    /// Delete the dynamic partition
    pub async fn clear_dynamic(&self) -> Result<bool, CoreError> {
        let name = &self.names.dynamic_name;
        let deleted = self.storage.delete_partition(name).await?;
        info!("Cleared dynamic cache {} (existed: {})", name, deleted);
        Ok(deleted)
    }

    /// Delete every partition that does not belong to the current version
    pub async fn delete_stale_partitions(&self) -> Result<Vec<String>, CoreError> {
        let mut deleted = Vec::new();

        for name in self.storage.partitions().await? {
            if self.names.is_current(&name) {
                continue;
            }

            info!("Deleting old cache: {}", name);
            if self.storage.delete_partition(&name).await? {
                deleted.push(name);
            }
        }

        Ok(deleted)
    }

    /// Sum of body bytes across all partitions
    pub async fn total_size(&self) -> Result<u64, CoreError> {
        let mut total = 0u64;
        for name in self.storage.partitions().await? {
            total += self.storage.partition_size(&name).await?;
        }
        Ok(total)
    }

    /// Evict the oldest dynamic entries if the cache is over budget
    ///
    /// "Oldest" is key-enumeration order of the dynamic partition, so this
    /// is FIFO and ignores how recently an entry was read. Static entries
    /// are never touched.
    pub async fn cleanup_if_needed(&self) -> Result<EvictionReport, CoreError> {
        let total_size = self.total_size().await?;

        if total_size <= self.config.max_size {
            return Ok(EvictionReport {
                total_size,
                ..Default::default()
            });
        }

        info!(
            "Cache size {} exceeds limit {}, cleaning up",
            total_size, self.config.max_size
        );

        let name = &self.names.dynamic_name;
        let keys = self.storage.keys(name).await?;
        let count = (keys.len() as f64 * self.config.eviction_fraction).floor() as usize;

        let mut report = EvictionReport {
            total_size,
            ..Default::default()
        };

        for key in keys.into_iter().take(count) {
            let size = match self.storage.get(name, &key).await {
                Ok(entry) => entry.map(|e| e.size()).unwrap_or(0),
                Err(e) => {
                    warn!("Failed to read {} before eviction: {}", key, e);
                    0
                }
            };

            match self.storage.delete(name, &key).await {
                Ok(true) => {
                    report.freed += size;
                    report.evicted.push(key);
                }
                Ok(false) => debug!("Entry already gone: {}", key),
                Err(e) => warn!("Failed to evict {}: {}", key, e),
            }
        }

        metrics::counter!("offline_cache_evicted_entries_total")
            .increment(report.evicted.len() as u64);
        info!(
            "Removed {} cache entries ({} bytes)",
            report.evicted.len(),
            report.freed
        );

        Ok(report)
    }

    /// Get cache statistics
    pub async fn stats(&self) -> Result<CacheStats, CoreError> {
        let mut stats = self.stats.read().await.clone();
        stats.partitions.clear();
        stats.total_size = 0;

        for name in self.storage.partitions().await? {
            let entry_count = self.storage.keys(&name).await?.len();
            let total_size = self.storage.partition_size(&name).await?;
            stats.total_size += total_size;
            stats.partitions.push(PartitionStats {
                name,
                entry_count,
                total_size,
            });
        }

        Ok(stats)
    }

    async fn record_hit(&self) {
        metrics::counter!("offline_cache_hits_total").increment(1);
        let mut stats = self.stats.write().await;
        stats.hit_count += 1;
    }

    async fn record_miss(&self) {
        metrics::counter!("offline_cache_misses_total").increment(1);
        let mut stats = self.stats.write().await;
        stats.miss_count += 1;
    }
}

/// Spawn a background task that runs the size check periodically
pub fn spawn_cleanup_task(cache: Arc<CacheManager>) -> tokio::task::JoinHandle<()> {
    use tokio::time::interval;

    let period = cache.config().cleanup_interval;
    info!(
        "Starting background cache cleanup task (interval: {} seconds)",
        period.as_secs()
    );

    tokio::spawn(async move {
        let mut ticker = interval(period);

        // Skip the first tick (which fires immediately)
        ticker.tick().await;

        loop {
            ticker.tick().await;

            match cache.cleanup_if_needed().await {
                Ok(report) if !report.evicted.is_empty() => {
                    info!(
                        "Scheduled cleanup: {} entries removed, {} bytes freed",
                        report.evicted.len(),
                        report.freed
                    );
                }
                Ok(_) => debug!("Scheduled cleanup: cache within budget"),
                Err(e) => warn!("Error during scheduled cleanup: {}", e),
            }
        }
    })
}
