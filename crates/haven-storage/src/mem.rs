use std::sync::Mutex;

use async_trait::async_trait;
use dashmap::DashMap;

use crate::{BlobStore, KvStore, Result};

/// In-memory kv for tests and ephemeral single-process runs.
pub struct MemoryKv {
    // CAS needs a consistent read-modify-write, so guard the whole map
    // instead of relying on per-entry locking.
    entries: Mutex<std::collections::BTreeMap<String, String>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(std::collections::BTreeMap::new()),
        }
    }
}

impl Default for MemoryKv {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KvStore for MemoryKv {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.lock().unwrap().get(key).cloned())
    }

    async fn put(&self, key: &str, value: &str) -> Result<()> {
        self.entries
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.lock().unwrap().remove(key);
        Ok(())
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&str>,
        new: &str,
    ) -> Result<bool> {
        let mut entries = self.entries.lock().unwrap();
        if entries.get(key).map(|s| s.as_str()) != expected {
            return Ok(false);
        }
        entries.insert(key.to_string(), new.to_string());
        Ok(true)
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .entries
            .lock()
            .unwrap()
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect())
    }
}

/// In-memory blob store for tests.
pub struct MemoryBlobs {
    blobs: DashMap<String, Vec<u8>>,
}

impl MemoryBlobs {
    pub fn new() -> Self {
        Self {
            blobs: DashMap::new(),
        }
    }
}

impl Default for MemoryBlobs {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobs {
    async fn get(&self, path: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.blobs.get(path).map(|v| v.clone()))
    }

    async fn put(&self, path: &str, data: &[u8]) -> Result<()> {
        self.blobs.insert(path.to_string(), data.to_vec());
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<()> {
        self.blobs.remove(path);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let mut paths: Vec<String> = self
            .blobs
            .iter()
            .filter(|e| e.key().starts_with(prefix))
            .map(|e| e.key().clone())
            .collect();
        paths.sort();
        Ok(paths)
    }
}
