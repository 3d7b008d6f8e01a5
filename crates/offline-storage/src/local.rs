//! Local disk storage backend

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::backend::{CacheStorage, StoredResponse, hash_key};
use crate::error::StorageError;

const INDEX_FILE: &str = "index.json";

/// Local disk storage backend
///
/// Layout:
/// `<base_path>/index.json` holds partition names and key order,
/// `<base_path>/<partition hash>/<key hash>.body` holds response bodies and
/// `<base_path>/<partition hash>/<key hash>.meta` holds status and headers.
pub struct LocalStorage {
    base_path: PathBuf,
    index: Mutex<Index>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Index {
    partitions: Vec<PartitionIndex>,
}

#[derive(Debug, Serialize, Deserialize)]
struct PartitionIndex {
    name: String,
    dir: String,
    keys: Vec<String>,
    /// Body length per key
    #[serde(default)]
    sizes: HashMap<String, u64>,
}

impl PartitionIndex {
    fn new(name: &str, dir: String) -> Self {
        Self {
            name: name.to_string(),
            dir,
            keys: Vec::new(),
            sizes: HashMap::new(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct EntryMeta {
    url: String,
    status: u16,
    headers: Vec<(String, String)>,
    stored_at: DateTime<Utc>,
}

impl Index {
    fn find(&self, name: &str) -> Option<&PartitionIndex> {
        self.partitions.iter().find(|p| p.name == name)
    }

    fn find_mut(&mut self, name: &str) -> Option<&mut PartitionIndex> {
        self.partitions.iter_mut().find(|p| p.name == name)
    }
}

impl LocalStorage {
    /// Open (or create) a local storage rooted at `base_path`
    pub async fn new(base_path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let base_path = base_path.as_ref().to_path_buf();
        fs::create_dir_all(&base_path).await?;

        let index_path = base_path.join(INDEX_FILE);
        let index = match fs::read(&index_path).await {
            Ok(data) => serde_json::from_slice(&data)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Index::default(),
            Err(e) => return Err(StorageError::Io(e)),
        };

        info!("Initialized local cache storage at {:?}", base_path);

        Ok(Self {
            base_path,
            index: Mutex::new(index),
        })
    }

    fn partition_dir(name: &str) -> String {
        hash_key(name)[..16].to_string()
    }

    fn entry_path(&self, dir: &str, key: &str, extension: &str) -> PathBuf {
        self.base_path
            .join(dir)
            .join(format!("{}.{}", hash_key(key), extension))
    }

    /// Persist the index, writing to a temp file then renaming it into place
    async fn save_index(&self, index: &Index) -> Result<(), StorageError> {
        let path = self.base_path.join(INDEX_FILE);
        let temp_path = path.with_extension("tmp");
        fs::write(&temp_path, serde_json::to_vec(index)?).await?;
        fs::rename(&temp_path, &path).await?;
        Ok(())
    }

    async fn write_atomic(path: &Path, data: &[u8]) -> Result<(), StorageError> {
        let mut temp_path = path.as_os_str().to_owned();
        temp_path.push(".tmp");
        let temp_path = PathBuf::from(temp_path);
        fs::write(&temp_path, data).await?;
        fs::rename(&temp_path, path).await?;
        Ok(())
    }

    async fn remove_if_exists(path: &Path) -> Result<(), StorageError> {
        match fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::Io(e)),
        }
    }
}

#[async_trait]
impl CacheStorage for LocalStorage {
    async fn partitions(&self) -> Result<Vec<String>, StorageError> {
        let index = self.index.lock().await;
        Ok(index.partitions.iter().map(|p| p.name.clone()).collect())
    }

    async fn open_partition(&self, name: &str) -> Result<(), StorageError> {
        let mut index = self.index.lock().await;
        if index.find(name).is_some() {
            return Ok(());
        }

        let dir = Self::partition_dir(name);
        debug!("Creating partition {} at {}", name, dir);
        fs::create_dir_all(self.base_path.join(&dir)).await?;

        index.partitions.push(PartitionIndex::new(name, dir));
        self.save_index(&index).await
    }

    async fn delete_partition(&self, name: &str) -> Result<bool, StorageError> {
        let mut index = self.index.lock().await;
        let Some(pos) = index.partitions.iter().position(|p| p.name == name) else {
            return Ok(false);
        };

        let removed = index.partitions.remove(pos);
        self.save_index(&index).await?;

        let dir = self.base_path.join(&removed.dir);
        if let Err(e) = fs::remove_dir_all(&dir).await
            && e.kind() != std::io::ErrorKind::NotFound
        {
            warn!("Failed to remove partition directory {:?}: {}", dir, e);
        }

        debug!("Deleted partition {}", name);
        Ok(true)
    }

    async fn keys(&self, partition: &str) -> Result<Vec<String>, StorageError> {
        let index = self.index.lock().await;
        Ok(index.find(partition).map(|p| p.keys.clone()).unwrap_or_default())
    }

    async fn get(
        &self,
        partition: &str,
        key: &str,
    ) -> Result<Option<StoredResponse>, StorageError> {
        let dir = {
            let index = self.index.lock().await;
            match index.find(partition) {
                Some(p) if p.keys.iter().any(|k| k == key) => p.dir.clone(),
                _ => return Ok(None),
            }
        };

        let meta = match fs::read(self.entry_path(&dir, key, "meta")).await {
            Ok(data) => serde_json::from_slice::<EntryMeta>(&data)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("Cache entry in index but not on disk: {}", key);
                return Ok(None);
            }
            Err(e) => return Err(StorageError::Io(e)),
        };

        let body = match fs::read(self.entry_path(&dir, key, "body")).await {
            Ok(data) => Bytes::from(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("Cache body missing on disk: {}", key);
                return Ok(None);
            }
            Err(e) => return Err(StorageError::Io(e)),
        };

        Ok(Some(StoredResponse {
            url: meta.url,
            status: meta.status,
            headers: meta.headers,
            body,
            stored_at: meta.stored_at,
        }))
    }

    async fn put(
        &self,
        partition: &str,
        key: &str,
        response: StoredResponse,
    ) -> Result<(), StorageError> {
        let mut index = self.index.lock().await;

        let dir = match index.find(partition) {
            Some(p) => p.dir.clone(),
            None => Self::partition_dir(partition),
        };
        fs::create_dir_all(self.base_path.join(&dir)).await?;

        let size = response.size();
        let meta = EntryMeta {
            url: response.url,
            status: response.status,
            headers: response.headers,
            stored_at: response.stored_at,
        };
        let meta = serde_json::to_vec(&meta)?;
        Self::write_atomic(&self.entry_path(&dir, key, "body"), &response.body).await?;
        Self::write_atomic(&self.entry_path(&dir, key, "meta"), &meta).await?;

        // The index only learns about entries whose files are in place
        if index.find(partition).is_none() {
            index.partitions.push(PartitionIndex::new(partition, dir));
        }
        if let Some(p) = index.find_mut(partition) {
            p.keys.retain(|k| k != key);
            p.keys.push(key.to_string());
            p.sizes.insert(key.to_string(), size);
        }
        self.save_index(&index).await?;

        debug!("Stored {} in {} ({} bytes)", key, partition, size);
        Ok(())
    }

    async fn delete(&self, partition: &str, key: &str) -> Result<bool, StorageError> {
        let mut index = self.index.lock().await;
        let Some(p) = index.find_mut(partition) else {
            return Ok(false);
        };

        let before = p.keys.len();
        p.keys.retain(|k| k != key);
        if p.keys.len() == before {
            return Ok(false);
        }
        p.sizes.remove(key);
        let dir = p.dir.clone();
        self.save_index(&index).await?;

        Self::remove_if_exists(&self.entry_path(&dir, key, "body")).await?;
        Self::remove_if_exists(&self.entry_path(&dir, key, "meta")).await?;
        Ok(true)
    }

    /// Sums the sizes recorded in the index; only entries without a
    /// recorded size touch the disk
    async fn partition_size(&self, partition: &str) -> Result<u64, StorageError> {
        let index = self.index.lock().await;
        let Some(p) = index.find(partition) else {
            return Ok(0);
        };

        let mut total = 0u64;
        for key in &p.keys {
            total += match p.sizes.get(key) {
                Some(size) => *size,
                None => match fs::metadata(self.entry_path(&p.dir, key, "body")).await {
                    Ok(metadata) => metadata.len(),
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => 0,
                    Err(e) => return Err(StorageError::Io(e)),
                },
            };
        }
        Ok(total)
    }
}
