//! Application state management

use std::sync::Arc;
use std::time::Instant;

use tracing::info;

use crate::app::options::{AdapterOptions, AppOptions};
use crate::blob::{BlobStore, FsBlobStore, MemoryBlobStore};
use crate::cache::{EdgeCache, HttpEdgeCache, MemoryEdgeCache};
use crate::domains::{
    CertificateAuthority, DnsResolver, DohResolver, HttpCertificateAuthority, StaticAuthority,
    StaticResolver,
};
use crate::errors::PipelineError;
use crate::pipeline::{Collaborators, Pipeline};
use crate::store::MemoryStore;

/// Main application state
pub struct AppState {
    /// The release pipeline
    pub pipeline: Arc<Pipeline>,

    /// When the daemon started
    pub started_at: Instant,
}

impl AppState {
    /// Initialize application state
    pub fn init(options: &AppOptions) -> Result<Self, PipelineError> {
        info!("Initializing application state...");

        let collaborators = build_collaborators(&options.adapters)?;
        let pipeline = Arc::new(Pipeline::new(collaborators, options.pipeline.clone())?);

        Ok(Self {
            pipeline,
            started_at: Instant::now(),
        })
    }

    /// Shutdown application state
    pub async fn shutdown(&self) -> Result<(), PipelineError> {
        info!("Shutting down application state...");
        self.pipeline.shutdown().await
    }
}

fn build_collaborators(options: &AdapterOptions) -> Result<Collaborators, PipelineError> {
    let blobs: Arc<dyn BlobStore> = match &options.blob_root {
        Some(root) => {
            info!("Storing blobs under {}", root.display());
            Arc::new(FsBlobStore::new(root.clone(), options.blob_base_url.clone()))
        }
        None => Arc::new(MemoryBlobStore::new(options.blob_base_url.clone())),
    };

    let edge: Arc<dyn EdgeCache> = match &options.edge_url {
        Some(url) => {
            info!("Using edge cache at {}", url);
            Arc::new(HttpEdgeCache::new(
                url,
                options.edge_api_key.clone(),
                options.http_timeout,
            )?)
        }
        None => Arc::new(MemoryEdgeCache::new(options.edge_capacity)),
    };

    let resolver: Arc<dyn DnsResolver> = match &options.resolver_url {
        Some(url) => {
            info!("Resolving DNS through {}", url);
            Arc::new(DohResolver::new(url, options.http_timeout)?)
        }
        None => Arc::new(StaticResolver::new()),
    };

    let authority: Arc<dyn CertificateAuthority> = match &options.authority_url {
        Some(url) => {
            info!("Requesting certificates from {}", url);
            Arc::new(HttpCertificateAuthority::new(
                url,
                options.authority_api_key.clone(),
                options.http_timeout,
            )?)
        }
        None => Arc::new(StaticAuthority::default()),
    };

    Ok(Collaborators {
        store: Arc::new(MemoryStore::new()),
        blobs,
        edge,
        resolver,
        authority,
    })
}
