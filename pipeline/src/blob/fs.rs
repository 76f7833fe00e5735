//! Blob store backed by a local directory

use std::path::PathBuf;

use async_trait::async_trait;
use tracing::debug;

use crate::blob::{join_url, validate_path, BlobStore};
use crate::errors::{PipelineError, PipelineResult};
use crate::filesys::file::File;

/// Writes blobs beneath a root directory with atomic renames
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
    base_url: String,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>, base_url: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            base_url: base_url.into(),
        }
    }

    fn file(&self, path: &str) -> PipelineResult<File> {
        validate_path(path)?;
        Ok(File::new(self.root.join(path)))
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn put(&self, path: &str, bytes: Vec<u8>) -> PipelineResult<String> {
        let file = self.file(path)?;
        file.write_atomic(&bytes).await?;
        debug!(path = %path, size = bytes.len(), "Stored blob");
        Ok(join_url(&self.base_url, path))
    }

    async fn get(&self, path: &str) -> PipelineResult<Vec<u8>> {
        let file = self.file(path)?;
        if !file.exists().await {
            return Err(PipelineError::not_found(format!("blob {}", path)));
        }
        file.read_bytes().await
    }
}
