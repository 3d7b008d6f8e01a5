//! Cache storage trait

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};

use crate::error::StorageError;

/// A response held in a cache partition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredResponse {
    /// URL the response was fetched from (the request key)
    pub url: String,
    /// HTTP status code
    pub status: u16,
    /// Response headers in the order they were received
    pub headers: Vec<(String, String)>,
    /// Response body
    pub body: Bytes,
    /// When the response was written
    pub stored_at: DateTime<Utc>,
}

impl StoredResponse {
    pub fn new(
        url: impl Into<String>,
        status: u16,
        headers: Vec<(String, String)>,
        body: Bytes,
    ) -> Self {
        Self {
            url: url.into(),
            status,
            headers,
            body,
            stored_at: Utc::now(),
        }
    }

    /// Size counted against the cache budget (body bytes only)
    pub fn size(&self) -> u64 {
        self.body.len() as u64
    }
}

/// Cache storage trait
///
/// A storage is a set of named partitions, each mapping a request key
/// (the URL of a GET request) to a stored response. Partitions are listed
/// in creation order and keys in insertion order; re-inserting an existing
/// key moves it to the end.
#[async_trait]
pub trait CacheStorage: Send + Sync {
    /// List partition names in creation order
    async fn partitions(&self) -> Result<Vec<String>, StorageError>;

    /// Create a partition if it does not exist yet
    async fn open_partition(&self, name: &str) -> Result<(), StorageError>;

    /// Delete a partition and every entry in it
    async fn delete_partition(&self, name: &str) -> Result<bool, StorageError>;

    /// List keys of a partition in insertion order (empty if the partition is missing)
    async fn keys(&self, partition: &str) -> Result<Vec<String>, StorageError>;

    /// Read an entry
    async fn get(
        &self,
        partition: &str,
        key: &str,
    ) -> Result<Option<StoredResponse>, StorageError>;

    /// Write an entry, creating the partition on demand
    async fn put(
        &self,
        partition: &str,
        key: &str,
        response: StoredResponse,
    ) -> Result<(), StorageError>;

    /// Delete an entry
    async fn delete(&self, partition: &str, key: &str) -> Result<bool, StorageError>;

    /// Check whether a partition exists
    async fn has_partition(&self, name: &str) -> Result<bool, StorageError> {
        Ok(self.partitions().await?.iter().any(|p| p == name))
    }

    /// Total body bytes stored in a partition
    async fn partition_size(&self, partition: &str) -> Result<u64, StorageError> {
        let mut total = 0u64;
        for key in self.keys(partition).await? {
            if let Some(response) = self.get(partition, &key).await? {
                total += response.size();
            }
        }
        Ok(total)
    }
}

/// Compute the hex SHA256 of a string, used to derive file names
pub fn hash_key(key: &str) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    hex::encode(hasher.finalize())
}
