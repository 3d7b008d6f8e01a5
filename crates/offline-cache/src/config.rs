//! Configuration loading and management

use anyhow::{Context, Result, bail};
use offline_core::config::defaults;
use offline_core::{CacheConfig as CoreCacheConfig, WorkerConfig};
use offline_proxy::HttpFetcherConfig;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::net::IpAddr;
use std::path::Path;
use std::time::Duration;
use tracing::info;
use url::{Host, Url};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub worker: WorkerSection,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
        }
    }
}

/// Worker configuration: the site being fronted and its asset manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerSection {
    /// Origin of the upstream site, e.g. "https://vulkanlabs.dev"
    ///
    /// Must not be this server's own address.
    #[serde(default = "default_origin")]
    pub origin: String,
    #[serde(default = "default_cache_prefix")]
    pub cache_prefix: String,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default = "default_static_assets")]
    pub static_assets: Vec<String>,
    #[serde(default = "default_external_assets")]
    pub external_assets: Vec<String>,
    #[serde(default = "default_critical_assets")]
    pub critical_assets: Vec<String>,
    #[serde(default = "default_offline_page")]
    pub offline_page: String,
    #[serde(default = "default_network_timeout_secs")]
    pub network_timeout_secs: u64,
    #[serde(default = "default_true")]
    pub skip_waiting: bool,
    #[serde(default = "default_app_name")]
    pub app_name: String,
    #[serde(default = "default_notification_icon")]
    pub notification_icon: String,
    /// Skip TLS certificate verification on outgoing requests
    #[serde(default)]
    pub skip_tls_verify: bool,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

impl Default for WorkerSection {
    fn default() -> Self {
        Self {
            origin: default_origin(),
            cache_prefix: default_cache_prefix(),
            version: default_version(),
            static_assets: default_static_assets(),
            external_assets: default_external_assets(),
            critical_assets: default_critical_assets(),
            offline_page: default_offline_page(),
            network_timeout_secs: default_network_timeout_secs(),
            skip_waiting: true,
            app_name: default_app_name(),
            notification_icon: default_notification_icon(),
            skip_tls_verify: false,
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

/// Cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Size budget across all partitions in bytes
    #[serde(default = "default_max_size")]
    pub max_size: u64,
    #[serde(default = "default_eviction_fraction")]
    pub eviction_fraction: f64,
    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_size: default_max_size(),
            eviction_fraction: default_eviction_fraction(),
            cleanup_interval_secs: default_cleanup_interval_secs(),
        }
    }
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// "local" or "memory"
    #[serde(default = "default_backend")]
    pub backend: String,
    #[serde(default)]
    pub local: LocalStorageConfig,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            local: LocalStorageConfig::default(),
        }
    }
}

/// Local storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalStorageConfig {
    #[serde(default = "default_local_path")]
    pub path: String,
}

impl Default for LocalStorageConfig {
    fn default() -> Self {
        Self {
            path: default_local_path(),
        }
    }
}

/// Background sync configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default = "default_contact_endpoint")]
    pub contact_endpoint: String,
    /// File holding submissions queued while offline
    #[serde(default = "default_queue_path")]
    pub queue_path: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            contact_endpoint: default_contact_endpoint(),
            queue_path: default_queue_path(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// "pretty" or "json"
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_origin() -> String {
    "http://127.0.0.1:3000".to_string()
}

fn default_cache_prefix() -> String {
    defaults::CACHE_PREFIX.to_string()
}

fn default_version() -> String {
    defaults::VERSION.to_string()
}

fn default_static_assets() -> Vec<String> {
    defaults::strings(defaults::STATIC_ASSETS)
}

fn default_external_assets() -> Vec<String> {
    defaults::strings(defaults::EXTERNAL_ASSETS)
}

fn default_critical_assets() -> Vec<String> {
    defaults::strings(defaults::CRITICAL_ASSETS)
}

fn default_offline_page() -> String {
    defaults::OFFLINE_PAGE.to_string()
}

fn default_network_timeout_secs() -> u64 {
    defaults::NETWORK_TIMEOUT.as_secs()
}

fn default_true() -> bool {
    true
}

fn default_app_name() -> String {
    defaults::APP_NAME.to_string()
}

fn default_notification_icon() -> String {
    defaults::NOTIFICATION_ICON.to_string()
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_max_size() -> u64 {
    50 * 1024 * 1024 // 50 MB
}

fn default_eviction_fraction() -> f64 {
    0.25
}

fn default_cleanup_interval_secs() -> u64 {
    60
}

fn default_backend() -> String {
    "local".to_string()
}

fn default_local_path() -> String {
    "./data/cache".to_string()
}

fn default_contact_endpoint() -> String {
    defaults::CONTACT_ENDPOINT.to_string()
}

fn default_queue_path() -> String {
    "./data/pending.json".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &str) -> Result<Self> {
        let config_path = Path::new(path);

        // Check if config file exists
        let config = if !config_path.exists() {
            info!("Config file not found at {}, using defaults", path);
            Self::default()
        } else {
            let content = std::fs::read_to_string(config_path)
                .with_context(|| format!("Failed to read config file: {}", path))?;

            toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path))?
        };

        config.validate()?;
        Ok(config)
    }

    /// Check values serde cannot
    pub fn validate(&self) -> Result<()> {
        if !(self.cache.eviction_fraction > 0.0 && self.cache.eviction_fraction <= 1.0) {
            bail!(
                "cache.eviction_fraction must be in (0, 1], got {}",
                self.cache.eviction_fraction
            );
        }
        if self.cache.cleanup_interval_secs == 0 {
            bail!("cache.cleanup_interval_secs must be positive");
        }
        if !matches!(self.storage.backend.as_str(), "local" | "memory") {
            bail!("Unknown storage backend: {}", self.storage.backend);
        }
        if !matches!(self.logging.format.as_str(), "pretty" | "json") {
            bail!("Unknown log format: {}", self.logging.format);
        }

        let worker = self.worker_config()?;
        worker
            .validate()
            .context("Invalid [worker] configuration")?;
        if self.is_own_address(&worker.origin) {
            bail!(
                "worker.origin {} points at this server ({}:{})",
                worker.origin,
                self.server.bind_address,
                self.server.port
            );
        }
        Ok(())
    }

    /// Whether a URL would be answered by this server
    fn is_own_address(&self, url: &Url) -> bool {
        if url.port_or_known_default() != Some(self.server.port) {
            return false;
        }

        let bind = self.server.bind_address.parse::<IpAddr>().ok();
        let ip = match url.host() {
            Some(Host::Domain(domain)) => {
                return domain.eq_ignore_ascii_case("localhost")
                    || domain.eq_ignore_ascii_case(&self.server.bind_address);
            }
            Some(Host::Ipv4(ip)) => IpAddr::V4(ip),
            Some(Host::Ipv6(ip)) => IpAddr::V6(ip),
            None => return false,
        };

        ip.is_loopback()
            || ip.is_unspecified()
            || bind.is_some_and(|bind| bind == ip)
    }

    /// Save configuration to a file atomically
    ///
    /// Writes to a temp file in the same directory and renames it over the
    /// target, so a crash mid-write leaves the original intact.
    pub fn save(&self, path: &str) -> Result<()> {
        let content =
            toml::to_string_pretty(self).with_context(|| "Failed to serialize configuration")?;

        let path_obj = Path::new(path);
        let parent = match path_obj.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };

        let temp_file = tempfile::NamedTempFile::new_in(parent)
            .with_context(|| format!("Failed to create temp file in {:?}", parent))?;

        {
            let mut file = temp_file.as_file();
            file.write_all(content.as_bytes())
                .with_context(|| "Failed to write to temp file")?;
            file.sync_all()
                .with_context(|| "Failed to sync temp file")?;
        }

        temp_file
            .persist(path)
            .with_context(|| format!("Failed to persist config file: {}", path))?;

        info!("Saved configuration to {}", path);
        Ok(())
    }

    /// Build the worker configuration
    pub fn worker_config(&self) -> Result<WorkerConfig> {
        let origin = Url::parse(&self.worker.origin)
            .with_context(|| format!("Invalid worker.origin: {}", self.worker.origin))?;

        let worker = &self.worker;
        Ok(WorkerConfig {
            origin,
            cache_prefix: worker.cache_prefix.clone(),
            version: worker.version.clone(),
            static_assets: worker.static_assets.clone(),
            external_assets: worker.external_assets.clone(),
            critical_assets: worker.critical_assets.clone(),
            offline_page: worker.offline_page.clone(),
            network_timeout: Duration::from_secs(worker.network_timeout_secs),
            skip_waiting: worker.skip_waiting,
            contact_endpoint: self.sync.contact_endpoint.clone(),
            app_name: worker.app_name.clone(),
            notification_icon: worker.notification_icon.clone(),
        })
    }

    /// Build the cache manager configuration
    pub fn cache_config(&self) -> CoreCacheConfig {
        CoreCacheConfig {
            max_size: self.cache.max_size,
            eviction_fraction: self.cache.eviction_fraction,
            cleanup_interval: Duration::from_secs(self.cache.cleanup_interval_secs),
        }
    }

    /// Build the network client configuration
    pub fn fetcher_config(&self) -> HttpFetcherConfig {
        HttpFetcherConfig {
            connect_timeout: Duration::from_secs(self.worker.connect_timeout_secs),
            skip_tls_verify: self.worker.skip_tls_verify,
            ..Default::default()
        }
    }
}
