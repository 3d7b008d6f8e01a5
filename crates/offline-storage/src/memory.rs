//! In-memory storage backend

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::debug;

use crate::backend::{CacheStorage, StoredResponse};
use crate::error::StorageError;

#[derive(Default)]
struct Partition {
    name: String,
    order: Vec<String>,
    entries: HashMap<String, StoredResponse>,
}

impl Partition {
    fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }
}

/// Storage backend holding every partition in process memory
///
/// Contents are lost on restart.
#[derive(Default)]
pub struct MemoryStorage {
    partitions: RwLock<Vec<Partition>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheStorage for MemoryStorage {
    async fn partitions(&self) -> Result<Vec<String>, StorageError> {
        Ok(self.partitions.read().iter().map(|p| p.name.clone()).collect())
    }

    async fn open_partition(&self, name: &str) -> Result<(), StorageError> {
        let mut partitions = self.partitions.write();
        if !partitions.iter().any(|p| p.name == name) {
            debug!("Creating partition {}", name);
            partitions.push(Partition::named(name));
        }
        Ok(())
    }

    async fn delete_partition(&self, name: &str) -> Result<bool, StorageError> {
        let mut partitions = self.partitions.write();
        let before = partitions.len();
        partitions.retain(|p| p.name != name);
        Ok(partitions.len() != before)
    }

    async fn keys(&self, partition: &str) -> Result<Vec<String>, StorageError> {
        Ok(self
            .partitions
            .read()
            .iter()
            .find(|p| p.name == partition)
            .map(|p| p.order.clone())
            .unwrap_or_default())
    }

    async fn get(
        &self,
        partition: &str,
        key: &str,
    ) -> Result<Option<StoredResponse>, StorageError> {
        Ok(self
            .partitions
            .read()
            .iter()
            .find(|p| p.name == partition)
            .and_then(|p| p.entries.get(key).cloned()))
    }

    async fn put(
        &self,
        partition: &str,
        key: &str,
        response: StoredResponse,
    ) -> Result<(), StorageError> {
        let mut partitions = self.partitions.write();
        let idx = match partitions.iter().position(|p| p.name == partition) {
            Some(idx) => idx,
            None => {
                partitions.push(Partition::named(partition));
                partitions.len() - 1
            }
        };

        let target = &mut partitions[idx];
        if target.entries.insert(key.to_string(), response).is_some() {
            target.order.retain(|k| k != key);
        }
        target.order.push(key.to_string());
        Ok(())
    }

    async fn delete(&self, partition: &str, key: &str) -> Result<bool, StorageError> {
        let mut partitions = self.partitions.write();
        let Some(target) = partitions.iter_mut().find(|p| p.name == partition) else {
            return Ok(false);
        };

        if target.entries.remove(key).is_some() {
            target.order.retain(|k| k != key);
            Ok(true)
        } else {
            Ok(false)
        }
    }
}
