//! In-memory blob store

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use crate::blob::{join_url, validate_path, BlobStore};
use crate::errors::{PipelineError, PipelineResult};

#[derive(Debug)]
pub struct MemoryBlobStore {
    blobs: RwLock<HashMap<String, Vec<u8>>>,
    base_url: String,
}

impl MemoryBlobStore {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            blobs: RwLock::new(HashMap::new()),
            base_url: base_url.into(),
        }
    }

    /// Stored paths, sorted
    pub fn paths(&self) -> Vec<String> {
        let blobs = self.blobs.read().unwrap_or_else(|e| e.into_inner());
        let mut paths: Vec<_> = blobs.keys().cloned().collect();
        paths.sort();
        paths
    }

    pub fn len(&self) -> usize {
        let blobs = self.blobs.read().unwrap_or_else(|e| e.into_inner());
        blobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryBlobStore {
    fn default() -> Self {
        Self::new("memory://blobs")
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, path: &str, bytes: Vec<u8>) -> PipelineResult<String> {
        validate_path(path)?;
        let mut blobs = self.blobs.write().unwrap_or_else(|e| e.into_inner());
        blobs.insert(path.to_string(), bytes);
        Ok(join_url(&self.base_url, path))
    }

    async fn get(&self, path: &str) -> PipelineResult<Vec<u8>> {
        let blobs = self.blobs.read().unwrap_or_else(|e| e.into_inner());
        blobs
            .get(path)
            .cloned()
            .ok_or_else(|| PipelineError::not_found(format!("blob {}", path)))
    }
}
