//! Durable queue of form submissions waiting for connectivity

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::StorageError;

/// A form submission queued while offline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingSubmission {
    pub id: String,
    pub payload: serde_json::Value,
    #[serde(default = "Utc::now")]
    pub queued_at: DateTime<Utc>,
}

impl PendingSubmission {
    pub fn new(id: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            payload,
            queued_at: Utc::now(),
        }
    }
}

/// Storage for pending submissions, listed in the order they were queued
#[async_trait]
pub trait SubmissionStore: Send + Sync {
    /// List every pending submission
    async fn list(&self) -> Result<Vec<PendingSubmission>, StorageError>;

    /// Queue a submission, replacing any existing one with the same id
    async fn push(&self, submission: PendingSubmission) -> Result<(), StorageError>;

    /// Remove a submission once it has been delivered
    async fn remove(&self, id: &str) -> Result<bool, StorageError>;
}

/// Submission queue held in memory
#[derive(Default)]
pub struct MemorySubmissionStore {
    items: RwLock<Vec<PendingSubmission>>,
}

impl MemorySubmissionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SubmissionStore for MemorySubmissionStore {
    async fn list(&self) -> Result<Vec<PendingSubmission>, StorageError> {
        Ok(self.items.read().clone())
    }

    async fn push(&self, submission: PendingSubmission) -> Result<(), StorageError> {
        let mut items = self.items.write();
        items.retain(|s| s.id != submission.id);
        items.push(submission);
        Ok(())
    }

    async fn remove(&self, id: &str) -> Result<bool, StorageError> {
        let mut items = self.items.write();
        let before = items.len();
        items.retain(|s| s.id != id);
        Ok(items.len() != before)
    }
}

/// Submission queue persisted as a JSON array on disk
pub struct FileSubmissionStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileSubmissionStore {
    pub async fn new(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).await?;
        }

        info!("Using pending submission queue at {:?}", path);
        Ok(Self {
            path,
            lock: Mutex::new(()),
        })
    }

    async fn load(&self) -> Result<Vec<PendingSubmission>, StorageError> {
        match fs::read(&self.path).await {
            Ok(data) if data.is_empty() => Ok(Vec::new()),
            Ok(data) => Ok(serde_json::from_slice(&data)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    async fn save(&self, items: &[PendingSubmission]) -> Result<(), StorageError> {
        let temp_path = self.path.with_extension("tmp");
        fs::write(&temp_path, serde_json::to_vec_pretty(items)?).await?;
        fs::rename(&temp_path, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl SubmissionStore for FileSubmissionStore {
    async fn list(&self) -> Result<Vec<PendingSubmission>, StorageError> {
        let _guard = self.lock.lock().await;
        self.load().await
    }

    async fn push(&self, submission: PendingSubmission) -> Result<(), StorageError> {
        let _guard = self.lock.lock().await;
        let mut items = self.load().await?;
        debug!("Queueing pending submission {}", submission.id);
        items.retain(|s| s.id != submission.id);
        items.push(submission);
        self.save(&items).await
    }

    async fn remove(&self, id: &str) -> Result<bool, StorageError> {
        let _guard = self.lock.lock().await;
        let mut items = self.load().await?;
        let before = items.len();
        items.retain(|s| s.id != id);
        if items.len() == before {
            return Ok(false);
        }
        self.save(&items).await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_memory_queue_replaces_duplicate_ids() {
        let store = MemorySubmissionStore::new();
        store.push(PendingSubmission::new("a", json!({"name": "first"}))).await.unwrap();
        store.push(PendingSubmission::new("b", json!({"name": "second"}))).await.unwrap();
        store.push(PendingSubmission::new("a", json!({"name": "again"}))).await.unwrap();

        let items = store.list().await.unwrap();
        let ids: Vec<_> = items.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a"]);
        assert_eq!(items[1].payload["name"], "again");
    }

    #[tokio::test]
    async fn test_file_queue_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queue").join("pending.json");

        {
            let store = FileSubmissionStore::new(&path).await.unwrap();
            assert!(store.list().await.unwrap().is_empty());
            for (id, email) in [("1", "a@example.com"), ("2", "b@example.com")] {
                let submission = PendingSubmission::new(id, json!({ "email": email }));
                store.push(submission).await.unwrap();
            }
            assert!(store.remove("1").await.unwrap());
            assert!(!store.remove("1").await.unwrap());
        }

        let store = FileSubmissionStore::new(&path).await.unwrap();
        let items = store.list().await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].id, "2");
    }
}
