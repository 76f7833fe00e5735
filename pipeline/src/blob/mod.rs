//! Durable artifact storage

mod fs;
mod memory;

pub use fs::FsBlobStore;
pub use memory::MemoryBlobStore;

use async_trait::async_trait;

use crate::errors::{PipelineError, PipelineResult};

/// Blob store the pipeline publishes artifacts to
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store bytes under a relative path and return their public URL
    async fn put(&self, path: &str, bytes: Vec<u8>) -> PipelineResult<String>;

    /// Fetch the bytes stored under a path
    async fn get(&self, path: &str) -> PipelineResult<Vec<u8>>;

    /// Copy a stored object to a new path and return the new URL
    async fn copy(&self, from: &str, to: &str) -> PipelineResult<String> {
        let bytes = self.get(from).await?;
        self.put(to, bytes).await
    }
}

/// Check that a blob path is relative and cannot escape its prefix
pub fn validate_path(path: &str) -> PipelineResult<()> {
    if path.is_empty() {
        return Err(PipelineError::validation("empty path"));
    }
    if path.starts_with('/') || path.contains('\\') {
        return Err(PipelineError::validation(format!(
            "path must be relative: {}",
            path
        )));
    }
    if path.split('/').any(|seg| seg.is_empty() || seg == "." || seg == "..") {
        return Err(PipelineError::validation(format!("invalid path: {}", path)));
    }
    Ok(())
}

/// Blob path of a build artifact file
pub fn build_artifact_path(build_id: &str, file_path: &str) -> String {
    format!("builds/{}/{}", build_id, file_path)
}

/// Blob path of a published site file
pub fn site_release_path(site_id: &str, version: u64, file_path: &str) -> String {
    format!("sites/{}/v{}/{}", site_id, version, file_path)
}

pub(crate) fn join_url(base_url: &str, path: &str) -> String {
    format!("{}/{}", base_url.trim_end_matches('/'), path)
}
