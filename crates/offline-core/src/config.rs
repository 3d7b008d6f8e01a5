//! Worker configuration
//!
//! Everything the worker needs to know about the site it fronts is passed
//! in here: the origin, the version tag, the asset lists and the timeouts.

use std::time::Duration;
use url::Url;

use crate::error::CoreError;

/// Site defaults, shared with the binary's config file
pub mod defaults {
    use std::time::Duration;

    pub const CACHE_PREFIX: &str = "vulkan-labs";
    pub const VERSION: &str = "v1.2.0";
    pub const STATIC_ASSETS: &[&str] = &[
        "/",
        "/index.html",
        "/style.css",
        "/script.js",
        "/manifest.json",
        "/404.html",
    ];
    pub const EXTERNAL_ASSETS: &[&str] = &[
        "https://fonts.googleapis.com/css2?family=Inter:wght@100;200;300;400;500;600;700;800;900&family=JetBrains+Mono:wght@100;200;300;400;500;600;700;800&display=swap",
        "https://cdnjs.cloudflare.com/ajax/libs/font-awesome/6.4.0/css/all.min.css",
    ];
    pub const CRITICAL_ASSETS: &[&str] = &["/", "/style.css", "/script.js"];
    pub const OFFLINE_PAGE: &str = "/404.html";
    /// Timeout for the network-first strategy
    pub const NETWORK_TIMEOUT: Duration = Duration::from_secs(3);
    pub const CONTACT_ENDPOINT: &str = "/api/contact";
    pub const APP_NAME: &str = "Vulkan Labs";
    pub const NOTIFICATION_ICON: &str = "/icon-192x192.png";

    pub fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }
}

/// Names of the two partitions owned by a worker version
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionNames {
    pub static_name: String,
    pub dynamic_name: String,
}

impl PartitionNames {
    pub fn new(prefix: &str, version: &str) -> Self {
        Self {
            static_name: format!("{}-{}", prefix, version),
            dynamic_name: format!("{}-dynamic-{}", prefix, version),
        }
    }

    /// Whether a partition belongs to this version
    pub fn is_current(&self, name: &str) -> bool {
        name == self.static_name || name == self.dynamic_name
    }
}

/// Configuration for the offline worker
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Origin of the site the worker serves
    pub origin: Url,
    /// Prefix of partition names (e.g. "vulkan-labs")
    pub cache_prefix: String,
    /// Version tag; bumping it invalidates every partition
    pub version: String,
    /// First-party assets that must be cached at install time
    pub static_assets: Vec<String>,
    /// Cross-origin assets cached best-effort at install time
    pub external_assets: Vec<String>,
    /// Assets re-fetched by the periodic cache update
    pub critical_assets: Vec<String>,
    /// Page served to navigations when nothing else is available
    pub offline_page: String,
    /// Bound on the network attempt for cross-origin fonts and styles
    pub network_timeout: Duration,
    /// Activate right after installation instead of waiting for a message
    pub skip_waiting: bool,
    /// Endpoint pending contact-form submissions are replayed to
    pub contact_endpoint: String,
    /// Name used in notifications
    pub app_name: String,
    /// Icon and badge used in notifications
    pub notification_icon: String,
}

impl WorkerConfig {
    /// Configuration with the Vulkan Labs site defaults for a given origin
    pub fn for_origin(origin: Url) -> Self {
        Self {
            origin,
            cache_prefix: defaults::CACHE_PREFIX.to_string(),
            version: defaults::VERSION.to_string(),
            static_assets: defaults::strings(defaults::STATIC_ASSETS),
            external_assets: defaults::strings(defaults::EXTERNAL_ASSETS),
            critical_assets: defaults::strings(defaults::CRITICAL_ASSETS),
            offline_page: defaults::OFFLINE_PAGE.to_string(),
            network_timeout: defaults::NETWORK_TIMEOUT,
            skip_waiting: true,
            contact_endpoint: defaults::CONTACT_ENDPOINT.to_string(),
            app_name: defaults::APP_NAME.to_string(),
            notification_icon: defaults::NOTIFICATION_ICON.to_string(),
        }
    }

    pub fn partitions(&self) -> PartitionNames {
        PartitionNames::new(&self.cache_prefix, &self.version)
    }

    /// Resolve a path or absolute URL against the origin
    pub fn resolve(&self, path: &str) -> Result<Url, CoreError> {
        self.origin
            .join(path)
            .map_err(|e| CoreError::InvalidUrl(format!("{}: {}", path, e)))
    }

    pub fn is_same_origin(&self, url: &Url) -> bool {
        url.origin() == self.origin.origin()
    }

    /// Check the configuration before starting a worker
    pub fn validate(&self) -> Result<(), CoreError> {
        if !matches!(self.origin.scheme(), "http" | "https") {
            return Err(CoreError::BadRequest(format!(
                "Origin must be an http(s) URL: {}",
                self.origin
            )));
        }
        if self.version.trim().is_empty() {
            return Err(CoreError::BadRequest("Version tag cannot be empty".to_string()));
        }
        if self.cache_prefix.trim().is_empty() {
            return Err(CoreError::BadRequest("Cache prefix cannot be empty".to_string()));
        }
        if self.network_timeout.is_zero() {
            return Err(CoreError::BadRequest("Network timeout must be positive".to_string()));
        }
        for asset in self.static_assets.iter().chain(&self.critical_assets) {
            let url = self.resolve(asset)?;
            if !self.is_same_origin(&url) {
                return Err(CoreError::BadRequest(format!(
                    "Static asset is not same-origin: {}",
                    asset
                )));
            }
        }
        for asset in &self.external_assets {
            Url::parse(asset).map_err(|e| CoreError::InvalidUrl(format!("{}: {}", asset, e)))?;
        }
        self.resolve(&self.offline_page)?;
        self.resolve(&self.contact_endpoint)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> WorkerConfig {
        WorkerConfig::for_origin(Url::parse("https://vulkanlabs.dev").unwrap())
    }

    #[test]
    fn test_partition_names() {
        let names = config().partitions();
        assert_eq!(names.static_name, "vulkan-labs-v1.2.0");
        assert_eq!(names.dynamic_name, "vulkan-labs-dynamic-v1.2.0");
        assert!(names.is_current("vulkan-labs-v1.2.0"));
        assert!(!names.is_current("vulkan-labs-v1.1.0"));
        assert!(!names.is_current("vulkan-labs-dynamic-v1.1.0"));
    }

    #[test]
    fn test_resolve_and_origin() {
        let config = config();
        let root = config.resolve("/").unwrap();
        assert_eq!(root.as_str(), "https://vulkanlabs.dev/");
        assert!(config.is_same_origin(&root));

        let font = config.resolve("https://fonts.googleapis.com/css2?family=Inter").unwrap();
        assert!(!config.is_same_origin(&font));

        let other_port = Url::parse("https://vulkanlabs.dev:8443/").unwrap();
        assert!(!config.is_same_origin(&other_port));
    }

    #[test]
    fn test_validate() {
        assert!(config().validate().is_ok());

        let mut bad_version = config();
        bad_version.version = " ".to_string();
        assert!(bad_version.validate().is_err());

        let mut bad_asset = config();
        bad_asset.static_assets.push("https://elsewhere.example/app.js".to_string());
        assert!(bad_asset.validate().is_err());

        let mut bad_origin = config();
        bad_origin.origin = Url::parse("file:///var/www").unwrap();
        assert!(bad_origin.validate().is_err());
    }
}
