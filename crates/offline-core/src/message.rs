//! Control messages sent by pages to the worker

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::cache::Partition;
use crate::lifecycle::WorkerState;
use crate::worker::OfflineWorker;

/// Inbound control message
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlMessage {
    /// Activate a waiting worker now
    SkipWaiting,
    /// Ask for the current version
    GetVersion,
    /// Pre-warm URLs into the dynamic partition
    CacheUrls {
        #[serde(default)]
        urls: Vec<String>,
    },
    /// Drop the dynamic partition
    ClearCache,
}

/// Reply sent back on the message's reply channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reply", rename_all = "snake_case")]
pub enum ControlReply {
    Ack,
    Version { version: String },
    Cached { cached: usize },
    Ignored { reason: String },
}

impl OfflineWorker {
    /// Handle a control message
    ///
    /// Never fails: problems are logged and reported in the reply.
    pub async fn handle_message(&self, message: ControlMessage) -> ControlReply {
        match message {
            ControlMessage::SkipWaiting => {
                if self.state().await == WorkerState::Waiting {
                    if let Err(e) = self.activate().await {
                        warn!("Skip waiting failed: {}", e);
                    }
                }
                ControlReply::Ack
            }
            ControlMessage::GetVersion => ControlReply::Version {
                version: self.version().to_string(),
            },
            ControlMessage::CacheUrls { urls } => ControlReply::Cached {
                cached: self.cache_urls(&urls).await,
            },
            ControlMessage::ClearCache => {
                if let Err(e) = self.cache.clear_dynamic().await {
                    warn!("Failed to clear dynamic cache: {}", e);
                }
                ControlReply::Ack
            }
        }
    }

    /// Handle a message that has not been parsed yet
    pub async fn handle_raw_message(&self, raw: serde_json::Value) -> ControlReply {
        match serde_json::from_value::<ControlMessage>(raw) {
            Ok(message) => self.handle_message(message).await,
            Err(e) => {
                warn!("Ignoring control message: {}", e);
                ControlReply::Ignored {
                    reason: e.to_string(),
                }
            }
        }
    }

    async fn cache_urls(&self, urls: &[String]) -> usize {
        let resolved = match urls
            .iter()
            .map(|url| self.config.resolve(url))
            .collect::<Result<Vec<_>, _>>()
        {
            Ok(resolved) => resolved,
            Err(e) => {
                warn!("Cannot pre-cache URLs: {}", e);
                return 0;
            }
        };

        match self.cache_all(Partition::Dynamic, &resolved).await {
            Ok(cached) => {
                info!("Pre-cached {} URLs", cached.len());
                cached.len()
            }
            Err(e) => {
                warn!("Pre-caching failed: {}", e);
                0
            }
        }
    }
}
