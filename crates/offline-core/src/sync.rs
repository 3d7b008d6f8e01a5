//! Background sync and periodic cache refresh

use offline_proxy::FetchRequest;
use offline_storage::PendingSubmission;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use tracing::{debug, info, warn};

use crate::cache::Partition;
use crate::error::CoreError;
use crate::worker::OfflineWorker;

/// Background sync tags the worker understands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncTag {
    /// Replay queued contact-form submissions
    ContactForm,
    /// Flush analytics; nothing is queued for it
    Analytics,
}

impl SyncTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncTag::ContactForm => "contact-form-sync",
            SyncTag::Analytics => "analytics-sync",
        }
    }
}

impl FromStr for SyncTag {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "contact-form-sync" => Ok(SyncTag::ContactForm),
            "analytics-sync" => Ok(SyncTag::Analytics),
            other => Err(CoreError::NotFound(format!("Unknown sync tag: {}", other))),
        }
    }
}

impl fmt::Display for SyncTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Periodic sync tags
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeriodicSyncTag {
    /// Re-fetch the critical assets
    CacheUpdate,
}

impl PeriodicSyncTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            PeriodicSyncTag::CacheUpdate => "cache-update",
        }
    }
}

impl FromStr for PeriodicSyncTag {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cache-update" => Ok(PeriodicSyncTag::CacheUpdate),
            other => Err(CoreError::NotFound(format!("Unknown periodic sync tag: {}", other))),
        }
    }
}

/// Outcome of a background sync
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub tag: String,
    /// Submissions delivered and removed from the queue
    pub replayed: usize,
    /// Submissions still queued
    pub remaining: usize,
}

/// Outcome of a periodic cache refresh
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RefreshReport {
    pub refreshed: Vec<String>,
    pub failed: Vec<String>,
}

impl OfflineWorker {
    /// Run a background sync
    pub async fn sync(&self, tag: SyncTag) -> Result<SyncReport, CoreError> {
        info!("Background sync: {}", tag);

        match tag {
            SyncTag::ContactForm => self.replay_submissions().await,
            SyncTag::Analytics => {
                info!("Analytics synced");
                Ok(SyncReport {
                    tag: tag.to_string(),
                    ..Default::default()
                })
            }
        }
    }

    /// Send every pending submission, in queue order
    ///
    /// A delivered submission is removed; a failed one stays queued for the
    /// next sync.
    async fn replay_submissions(&self) -> Result<SyncReport, CoreError> {
        let endpoint = self.config.resolve(&self.config.contact_endpoint)?;
        let pending = self.submissions.list().await?;

        let mut report = SyncReport {
            tag: SyncTag::ContactForm.to_string(),
            ..Default::default()
        };

        for submission in pending {
            let request = FetchRequest::post_json(endpoint.clone(), &submission.payload)?;
            match self.fetcher.fetch(request).await {
                Ok(response) if response.is_success() => {
                    self.submissions.remove(&submission.id).await?;
                    report.replayed += 1;
                    debug!("Form submission {} synced", submission.id);
                }
                Ok(response) => {
                    warn!("Form sync failed for {}: status {}", submission.id, response.status);
                    report.remaining += 1;
                }
                Err(e) => {
                    warn!("Form sync failed for {}: {}", submission.id, e);
                    report.remaining += 1;
                }
            }
        }

        metrics::counter!("offline_cache_sync_replayed_total").increment(report.replayed as u64);
        info!(
            "Contact form sync complete ({} sent, {} still pending)",
            report.replayed, report.remaining
        );

        Ok(report)
    }

    /// Run a periodic sync
    pub async fn periodic_sync(&self, tag: PeriodicSyncTag) -> Result<RefreshReport, CoreError> {
        info!("Periodic sync: {}", tag.as_str());

        match tag {
            PeriodicSyncTag::CacheUpdate => Ok(self.refresh_critical_assets().await),
        }
    }

    async fn refresh_critical_assets(&self) -> RefreshReport {
        let mut report = RefreshReport::default();

        for asset in &self.config.critical_assets {
            let url = match self.config.resolve(asset) {
                Ok(url) => url,
                Err(e) => {
                    warn!("Failed to update {}: {}", asset, e);
                    report.failed.push(asset.clone());
                    continue;
                }
            };

            match self.fetcher.fetch(FetchRequest::get(url.clone())).await {
                Ok(response) if response.is_cacheable() => {
                    match self.cache.put(Partition::Static, url.as_str(), &response).await {
                        Ok(_) => report.refreshed.push(asset.clone()),
                        Err(e) => {
                            warn!("Failed to update {}: {}", asset, e);
                            report.failed.push(asset.clone());
                        }
                    }
                }
                Ok(response) => {
                    warn!("Failed to update {}: status {}", asset, response.status);
                    report.failed.push(asset.clone());
                }
                Err(e) => {
                    warn!("Failed to update {}: {}", asset, e);
                    report.failed.push(asset.clone());
                }
            }
        }

        info!(
            "Critical cache updated ({} refreshed, {} failed)",
            report.refreshed.len(),
            report.failed.len()
        );
        report
    }

    /// Queue a form submission for the next contact-form sync
    pub async fn queue_submission(
        &self,
        id: Option<String>,
        payload: serde_json::Value,
    ) -> Result<PendingSubmission, CoreError> {
        let id = id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let submission = PendingSubmission::new(id, payload);

        self.submissions.push(submission.clone()).await?;
        info!("Queued form submission {}", submission.id);
        Ok(submission)
    }

    /// Submissions waiting to be sent
    pub async fn pending_submissions(&self) -> Result<Vec<PendingSubmission>, CoreError> {
        Ok(self.submissions.list().await?)
    }
}
