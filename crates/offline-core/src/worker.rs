//! Offline worker: fetch interception, serving strategies and lifecycle

use futures::future::join_all;
use http::StatusCode;
use offline_proxy::{FetchRequest, FetchResponse, Fetcher};
use offline_storage::SubmissionStore;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::cache::{CacheManager, Partition, to_response};
use crate::classify::{Destination, Strategy, classify};
use crate::config::WorkerConfig;
use crate::error::CoreError;
use crate::lifecycle::{Lifecycle, WorkerState};

/// Where a response came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServedFrom {
    Cache,
    Network,
    /// Synthesised because neither cache nor network could answer
    Offline,
    /// Forwarded without touching the cache
    Bypass,
}

impl ServedFrom {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServedFrom::Cache => "cache",
            ServedFrom::Network => "network",
            ServedFrom::Offline => "offline",
            ServedFrom::Bypass => "bypass",
        }
    }
}

/// A response handed back to the page
#[derive(Debug, Clone)]
pub struct Served {
    pub response: FetchResponse,
    pub source: ServedFrom,
}

impl Served {
    fn new(response: FetchResponse, source: ServedFrom) -> Self {
        Self { response, source }
    }
}

/// Outcome of installation
#[derive(Debug, Clone, Default)]
pub struct InstallReport {
    /// Every URL written to the static partition
    pub cached: Vec<String>,
    /// External assets that could not be cached
    pub failed_external: Vec<String>,
}

/// The offline worker
///
/// Owns the cache manager, the network client and the pending submission
/// queue, and tracks its own lifecycle state.
pub struct OfflineWorker {
    pub(crate) config: WorkerConfig,
    pub(crate) cache: Arc<CacheManager>,
    pub(crate) fetcher: Arc<dyn Fetcher>,
    pub(crate) submissions: Arc<dyn SubmissionStore>,
    pub(crate) lifecycle: RwLock<Lifecycle>,
}

impl OfflineWorker {
    /// Create a new worker in the installing state
    pub fn new(
        config: WorkerConfig,
        cache: Arc<CacheManager>,
        fetcher: Arc<dyn Fetcher>,
        submissions: Arc<dyn SubmissionStore>,
    ) -> Self {
        let lifecycle = Lifecycle::new(config.partitions().static_name);
        Self {
            config,
            cache,
            fetcher,
            submissions,
            lifecycle: RwLock::new(lifecycle),
        }
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<CacheManager> {
        &self.cache
    }

    /// Version string reported to pages
    pub fn version(&self) -> &str {
        &self.cache.names().static_name
    }

    pub async fn state(&self) -> WorkerState {
        self.lifecycle.read().await.state
    }

    pub async fn lifecycle(&self) -> Lifecycle {
        self.lifecycle.read().await.clone()
    }

    // ==================== Fetch Interception ====================

    /// Handle an intercepted request
    ///
    /// Intercepted requests always produce a response; only requests that
    /// bypass the cache can fail, with the underlying network error.
    pub async fn handle_fetch(&self, request: FetchRequest) -> Result<Served, CoreError> {
        if !self.state().await.can_intercept() {
            return self.bypass(request).await;
        }

        let destination = Destination::of(&request);
        let strategy = classify(&self.config.origin, &request, destination);
        debug!(
            "{} {} ({}) -> {}",
            request.method,
            request.url,
            destination.as_str(),
            strategy.as_str()
        );

        match strategy {
            Strategy::Bypass => self.bypass(request).await,
            Strategy::CacheFirst => Ok(self.cache_first(request, destination).await),
            Strategy::NetworkFirst => Ok(self.network_first(request, destination).await),
            Strategy::CrossOriginCacheFirst => {
                Ok(self.cross_origin_cache_first(request, destination).await)
            }
        }
    }

    async fn bypass(&self, request: FetchRequest) -> Result<Served, CoreError> {
        let response = self.fetcher.fetch(request).await?;
        Ok(Served::new(response, ServedFrom::Bypass))
    }

    /// Same-origin requests: cache, then network into the dynamic partition
    async fn cache_first(&self, request: FetchRequest, destination: Destination) -> Served {
        let key = request.url.to_string();

        if let Some(cached) = self.lookup(&key).await {
            info!("Serving from cache: {}", key);
            if destination == Destination::Document {
                self.refresh_in_background(request);
            }
            return Served::new(cached, ServedFrom::Cache);
        }

        info!("Fetching from network: {}", key);
        match self.fetcher.fetch(request).await {
            Ok(response) => {
                self.store(Partition::Dynamic, &key, &response).await;
                Served::new(response, ServedFrom::Network)
            }
            Err(e) => {
                error!("Fetch failed for {}: {}", key, e);
                metrics::counter!("offline_cache_network_fallbacks_total").increment(1);
                if destination == Destination::Document {
                    self.offline_page().await
                } else {
                    Served::new(
                        FetchResponse::new(StatusCode::SERVICE_UNAVAILABLE, "Offline")
                            .with_header("content-type", "text/plain"),
                        ServedFrom::Offline,
                    )
                }
            }
        }
    }

    /// Cross-origin fonts and styles: bounded network attempt, then cache
    async fn network_first(&self, request: FetchRequest, destination: Destination) -> Served {
        let key = request.url.to_string();

        // Dropping the fetch future on timeout cancels the request
        match tokio::time::timeout(self.config.network_timeout, self.fetcher.fetch(request)).await {
            Ok(Ok(response)) => {
                self.store(Partition::Static, &key, &response).await;
                return Served::new(response, ServedFrom::Network);
            }
            Ok(Err(e)) => warn!("Network failed for {}: {}", key, e),
            Err(_) => warn!(
                "Network timeout after {:?} for {}",
                self.config.network_timeout, key
            ),
        }

        metrics::counter!("offline_cache_network_fallbacks_total").increment(1);
        if let Some(cached) = self.lookup(&key).await {
            info!("Network failed, serving from cache: {}", key);
            return Served::new(cached, ServedFrom::Cache);
        }

        Self::unavailable(destination)
    }

    /// Other cross-origin requests: cache, then network into the dynamic partition
    async fn cross_origin_cache_first(
        &self,
        request: FetchRequest,
        destination: Destination,
    ) -> Served {
        let key = request.url.to_string();

        if let Some(cached) = self.lookup(&key).await {
            return Served::new(cached, ServedFrom::Cache);
        }

        match self.fetcher.fetch(request).await {
            Ok(response) => {
                self.store(Partition::Dynamic, &key, &response).await;
                Served::new(response, ServedFrom::Network)
            }
            Err(e) => {
                error!("Cross-origin fetch failed for {}: {}", key, e);
                metrics::counter!("offline_cache_network_fallbacks_total").increment(1);
                Self::unavailable(destination)
            }
        }
    }

    /// Re-fetch a document and overwrite its static entry, without waiting
    pub fn refresh_in_background(&self, request: FetchRequest) -> tokio::task::JoinHandle<()> {
        let cache = self.cache.clone();
        let fetcher = self.fetcher.clone();

        tokio::spawn(async move {
            let key = request.url.to_string();
            match fetcher.fetch(request).await {
                Ok(response) if response.is_cacheable() => {
                    match cache.put(Partition::Static, &key, &response).await {
                        Ok(_) => info!("Cache updated in background for: {}", key),
                        Err(e) => warn!("Background cache update failed for {}: {}", key, e),
                    }
                }
                Ok(response) => debug!(
                    "Background update skipped for {} (status {})",
                    key, response.status
                ),
                Err(e) => warn!("Background cache update failed for {}: {}", key, e),
            }
        })
    }

    /// Cache lookup that treats storage errors as misses
    pub(crate) async fn lookup(&self, key: &str) -> Option<FetchResponse> {
        match self.cache.match_request(key).await {
            Ok(entry) => entry.map(to_response),
            Err(e) => {
                warn!("Cache lookup failed for {}: {}", key, e);
                None
            }
        }
    }

    /// Cache write that never fails the request
    pub(crate) async fn store(&self, partition: Partition, key: &str, response: &FetchResponse) {
        if let Err(e) = self.cache.put(partition, key, response).await {
            warn!("Failed to cache {}: {}", key, e);
        }
    }

    /// The offline page for failed navigations
    ///
    /// The cached page body is served with a 503 so the page load reads as
    /// unavailable rather than successful.
    async fn offline_page(&self) -> Served {
        let page = match self.config.resolve(&self.config.offline_page) {
            Ok(url) => self.lookup(url.as_str()).await,
            Err(e) => {
                warn!("Invalid offline page: {}", e);
                None
            }
        };

        let response = match page {
            Some(mut page) => {
                page.status = StatusCode::SERVICE_UNAVAILABLE;
                page
            }
            None => FetchResponse::new(StatusCode::SERVICE_UNAVAILABLE, "Offline")
                .with_header("content-type", "text/plain"),
        };

        Served::new(response, ServedFrom::Offline)
    }

    /// Placeholder for a cross-origin resource nobody could provide
    fn unavailable(destination: Destination) -> Served {
        let response = if destination == Destination::Image {
            FetchResponse::new(StatusCode::NO_CONTENT, "")
        } else {
            FetchResponse::new(StatusCode::SERVICE_UNAVAILABLE, "Resource unavailable")
                .with_header("content-type", "text/plain")
        };
        Served::new(response, ServedFrom::Offline)
    }

    // ==================== Lifecycle ====================

    /// Fetch every URL and write them all into a partition, or none at all
    pub(crate) async fn cache_all(
        &self,
        partition: Partition,
        urls: &[Url],
    ) -> Result<Vec<String>, CoreError> {
        let responses = join_all(
            urls.iter()
                .map(|url| self.fetcher.fetch(FetchRequest::get(url.clone()))),
        )
        .await;

        let mut fetched = Vec::with_capacity(urls.len());
        for (url, result) in urls.iter().zip(responses) {
            match result {
                Ok(response) if response.is_cacheable() => {
                    fetched.push((url.to_string(), response))
                }
                Ok(response) => {
                    return Err(CoreError::CacheAll {
                        url: url.to_string(),
                        reason: format!("status {}", response.status),
                    });
                }
                Err(e) => {
                    return Err(CoreError::CacheAll {
                        url: url.to_string(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        let mut cached = Vec::with_capacity(fetched.len());
        for (key, response) in fetched {
            self.cache.put(partition, &key, &response).await?;
            cached.push(key);
        }
        Ok(cached)
    }

    /// Install: cache the required manifest, then external assets best-effort
    ///
    /// A failure on any required asset fails installation and makes the
    /// worker redundant. With `skip_waiting` set the worker activates
    /// straight away.
    pub async fn install(&self) -> Result<InstallReport, CoreError> {
        info!("Install event");

        let state = self.state().await;
        if state != WorkerState::Installing {
            return Err(CoreError::InvalidState(format!("cannot install while {}", state)));
        }

        let result = self.precache().await;
        let report = match result {
            Ok(report) => report,
            Err(e) => {
                error!("Cache installation failed: {}", e);
                let mut lifecycle = self.lifecycle.write().await;
                lifecycle.transition(WorkerState::Redundant)?;
                return Err(CoreError::InstallFailed(e.to_string()));
            }
        };

        info!(
            "All assets cached ({} cached, {} external failed)",
            report.cached.len(),
            report.failed_external.len()
        );
        self.lifecycle.write().await.transition(WorkerState::Waiting)?;

        if self.config.skip_waiting {
            self.activate().await?;
        }

        Ok(report)
    }

    async fn precache(&self) -> Result<InstallReport, CoreError> {
        self.cache.open(Partition::Static).await?;
        debug!("Opened cache {}", self.cache.partition_name(Partition::Static));

        let required = self
            .config
            .static_assets
            .iter()
            .map(|asset| self.config.resolve(asset))
            .collect::<Result<Vec<_>, _>>()?;
        let mut report = InstallReport {
            cached: self.cache_all(Partition::Static, &required).await?,
            ..Default::default()
        };

        let external = join_all(self.config.external_assets.iter().map(|asset| async move {
            let result = match self.config.resolve(asset) {
                Ok(url) => self.cache_all(Partition::Static, &[url]).await,
                Err(e) => Err(e),
            };
            (asset, result)
        }))
        .await;

        for (asset, result) in external {
            match result {
                Ok(cached) => report.cached.extend(cached),
                Err(e) => {
                    warn!("Failed to cache {}: {}", asset, e);
                    report.failed_external.push(asset.clone());
                }
            }
        }

        Ok(report)
    }

    /// Activate: drop partitions from other versions and claim all clients
    pub async fn activate(&self) -> Result<Vec<String>, CoreError> {
        info!("Activate event");

        let mut lifecycle = self.lifecycle.write().await;
        match lifecycle.state {
            WorkerState::Active => return Ok(Vec::new()),
            WorkerState::Waiting => {}
            other => {
                return Err(CoreError::InvalidState(format!("cannot activate while {}", other)));
            }
        }

        let deleted = self.cache.delete_stale_partitions().await?;
        lifecycle.transition(WorkerState::Active)?;
        info!("Worker {} active, clients claimed", lifecycle.version);

        Ok(deleted)
    }

    /// Retire the worker; it stops intercepting
    pub async fn retire(&self) {
        let mut lifecycle = self.lifecycle.write().await;
        if lifecycle.state != WorkerState::Redundant {
            let _ = lifecycle.transition(WorkerState::Redundant);
            info!("Worker {} is now redundant", lifecycle.version);
        }
    }
}
