//! The release pipeline: site registry plus the four components wired together

use std::sync::Arc;

use tracing::info;

use crate::blob::{BlobStore, MemoryBlobStore};
use crate::builder::{BuildOptions, BuildOrchestrator, BuilderSet};
use crate::cache::{CacheInvalidator, CacheOptions, EdgeCache, MemoryEdgeCache};
use crate::deploy::{DeployOptions, DeploymentManager};
use crate::domains::{
    CertificateAuthority, DnsResolver, DomainOptions, DomainProvisioner, StaticAuthority,
    StaticResolver,
};
use crate::errors::{PipelineError, PipelineResult};
use crate::metrics::PipelineMetrics;
use crate::models::{Site, SiteConfig, SiteId, SourceKind, UserId};
use crate::store::{MemoryStore, PipelineStore};

/// Options for every pipeline component
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub builds: BuildOptions,
    pub deployments: DeployOptions,
    pub domains: DomainOptions,
    pub cache: CacheOptions,
    /// Source kinds builds may use
    pub enabled_kinds: Vec<SourceKind>,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            builds: BuildOptions::default(),
            deployments: DeployOptions::default(),
            domains: DomainOptions::default(),
            cache: CacheOptions::default(),
            enabled_kinds: SourceKind::ALL.to_vec(),
        }
    }
}

/// External services the pipeline runs against
#[derive(Clone)]
pub struct Collaborators {
    pub store: Arc<dyn PipelineStore>,
    pub blobs: Arc<dyn BlobStore>,
    pub edge: Arc<dyn EdgeCache>,
    pub resolver: Arc<dyn DnsResolver>,
    pub authority: Arc<dyn CertificateAuthority>,
}

impl Collaborators {
    /// Process-local stand-ins for every collaborator
    pub fn in_memory() -> Self {
        Self {
            store: Arc::new(MemoryStore::new()),
            blobs: Arc::new(MemoryBlobStore::default()),
            edge: Arc::new(MemoryEdgeCache::new(10_000)),
            resolver: Arc::new(StaticResolver::new()),
            authority: Arc::new(StaticAuthority::default()),
        }
    }
}

/// Entry point to builds, deployments, domains and cache for all sites
pub struct Pipeline {
    store: Arc<dyn PipelineStore>,
    pub builds: Arc<BuildOrchestrator>,
    pub deployments: Arc<DeploymentManager>,
    pub domains: Arc<DomainProvisioner>,
    pub cache: Arc<CacheInvalidator>,
    pub metrics: Arc<PipelineMetrics>,
}

impl Pipeline {
    pub fn new(collaborators: Collaborators, options: PipelineOptions) -> PipelineResult<Self> {
        let Collaborators {
            store,
            blobs,
            edge,
            resolver,
            authority,
        } = collaborators;
        let metrics = Arc::new(PipelineMetrics::new()?);

        let cache = Arc::new(CacheInvalidator::new(edge, metrics.clone(), options.cache));
        let builds = Arc::new(BuildOrchestrator::new(
            store.clone(),
            blobs.clone(),
            BuilderSet::standard(&options.enabled_kinds),
            metrics.clone(),
            options.builds,
        ));
        let deployments = Arc::new(DeploymentManager::new(
            store.clone(),
            blobs,
            cache.clone(),
            metrics.clone(),
            options.deployments,
        ));
        let domains = Arc::new(DomainProvisioner::new(
            store.clone(),
            resolver,
            authority,
            metrics.clone(),
            options.domains,
        ));

        Ok(Self {
            store,
            builds,
            deployments,
            domains,
            cache,
            metrics,
        })
    }

    /// Create a site with no live version yet
    pub async fn register_site(&self, owner_id: UserId, config: SiteConfig) -> PipelineResult<Site> {
        let site = Site::new(owner_id, config);
        self.store.insert_site(&site).await?;
        info!(site_id = %site.id, owner_id = %site.owner_id, "Site registered");
        Ok(site)
    }

    pub async fn get_site(&self, site_id: &SiteId) -> PipelineResult<Site> {
        self.store
            .get_site(site_id)
            .await?
            .ok_or_else(|| PipelineError::not_found(format!("site {}", site_id)))
    }

    /// Stop accepting work, settle queued jobs and cancel domain tasks
    pub async fn shutdown(&self) -> PipelineResult<()> {
        self.domains.shutdown();
        let builds = self.builds.shutdown().await;
        let deployments = self.deployments.shutdown().await;
        info!("Pipeline stopped accepting work");
        builds.and(deployments)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_register_and_get_site() {
        let pipeline =
            Pipeline::new(Collaborators::in_memory(), PipelineOptions::default()).unwrap();
        let site = pipeline
            .register_site(UserId::new("user_1"), SiteConfig::default())
            .await
            .unwrap();

        let fetched = pipeline.get_site(&site.id).await.unwrap();
        assert_eq!(fetched.version, 0);
        assert!(fetched.build_id.is_none());
        assert!(matches!(
            pipeline.get_site(&SiteId::new("site_missing")).await,
            Err(PipelineError::NotFound(_))
        ));
    }
}
