//! Deployment lifecycle: version assignment, publishing, promotion and rollback

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::{StreamExt, TryStreamExt};
use tracing::{debug, error, info, warn};

use crate::blob::{build_artifact_path, site_release_path, BlobStore};
use crate::cache::CacheInvalidator;
use crate::deploy::locks::SiteLocks;
use crate::errors::{PipelineError, PipelineResult};
use crate::fsm::DeploymentEvent;
use crate::metrics::{Metric, PipelineMetrics};
use crate::models::{
    BuildId, BuildStatus, Deployment, DeploymentFile, DeploymentId, DeploymentStatus, Site,
    SiteConfig, SiteId,
};
use crate::store::{DeploymentFilter, PipelineStore};
use crate::utils::{retry_transient, with_timeout, RetryOptions};
use crate::workers::pool::{JobHandle, PoolStats, WorkerPool};

/// Deployment manager options
#[derive(Debug, Clone)]
pub struct DeployOptions {
    /// Deployments publishing at once
    pub max_concurrency: usize,
    /// Maximum duration of publishing one deployment
    pub publish_timeout: Duration,
    /// Retry policy for blob copies
    pub publish_retry: RetryOptions,
    /// Files copied concurrently within one deployment
    pub publish_parallelism: usize,
}

impl Default for DeployOptions {
    fn default() -> Self {
        Self {
            max_concurrency: 4,
            publish_timeout: Duration::from_secs(300),
            publish_retry: RetryOptions::default(),
            publish_parallelism: 8,
        }
    }
}

/// Request to deploy a completed build.
#[derive(Debug, Clone)]
pub struct DeploymentRequest {
    pub site_id: SiteId,
    pub build_id: BuildId,
    /// Subset of the build's files; all of them when unset
    pub files: Option<Vec<String>>,
    /// Site configuration to publish; the site's current one when unset
    pub config: Option<SiteConfig>,
}

impl DeploymentRequest {
    pub fn new(site_id: SiteId, build_id: BuildId) -> Self {
        Self {
            site_id,
            build_id,
            files: None,
            config: None,
        }
    }

    #[must_use]
    pub fn with_files(mut self, paths: Vec<String>) -> Self {
        self.files = Some(paths);
        self
    }

    #[must_use]
    pub fn with_config(mut self, config: SiteConfig) -> Self {
        self.config = Some(config);
        self
    }
}

/// Creates, publishes and promotes deployments; rolls sites back
pub struct DeploymentManager {
    store: Arc<dyn PipelineStore>,
    blobs: Arc<dyn BlobStore>,
    cache: Arc<CacheInvalidator>,
    locks: SiteLocks,
    pool: WorkerPool,
    metrics: Arc<PipelineMetrics>,
    options: DeployOptions,
}

impl DeploymentManager {
    pub fn new(
        store: Arc<dyn PipelineStore>,
        blobs: Arc<dyn BlobStore>,
        cache: Arc<CacheInvalidator>,
        metrics: Arc<PipelineMetrics>,
        options: DeployOptions,
    ) -> Self {
        Self {
            store,
            blobs,
            cache,
            locks: SiteLocks::new(),
            pool: WorkerPool::new("deployments", options.max_concurrency),
            metrics,
            options,
        }
    }

    /// Allocate the next version for the site and enqueue publishing
    pub async fn create_deployment(
        self: &Arc<Self>,
        request: DeploymentRequest,
    ) -> PipelineResult<Deployment> {
        let (deployment, _handle) = self.submit_deployment(request).await?;
        Ok(deployment)
    }

    /// Like [`Self::create_deployment`], also returning the processing handle
    pub async fn submit_deployment(
        self: &Arc<Self>,
        request: DeploymentRequest,
    ) -> PipelineResult<(Deployment, JobHandle)> {
        let site = self.get_site(&request.site_id).await?;
        let files = self.resolve_files(&request).await?;
        let config = request.config.unwrap_or_else(|| site.config.clone());

        let deployment = {
            let _guard = self.locks.lock(&site.id).await;
            let version = self.store.max_deployment_version(&site.id).await? + 1;
            let deployment =
                Deployment::new(site.id.clone(), request.build_id.clone(), version, files, config);
            self.store.insert_deployment(&deployment).await?;
            deployment
        };

        self.metrics.record(Metric::DeploymentCreated);
        info!(
            deployment_id = %deployment.id,
            site_id = %deployment.site_id,
            build_id = %deployment.build_id,
            version = deployment.version,
            "Deployment created"
        );

        let this = Arc::clone(self);
        let id = deployment.id.clone();
        let handle = self.pool.submit(async move { this.process(&id).await });
        Ok((deployment, handle))
    }

    /// Re-point a site at an earlier successful deployment.
    ///
    /// No deployment record is created and the target is left untouched.
    pub async fn rollback_to_deployment(
        &self,
        site_id: &SiteId,
        target_id: &DeploymentId,
    ) -> PipelineResult<Site> {
        let _guard = self.locks.lock(site_id).await;

        let target = self.get_deployment(target_id).await?;
        if &target.site_id != site_id {
            return Err(PipelineError::validation(format!(
                "deployment {} does not belong to site {}",
                target_id, site_id
            )));
        }
        if target.status != DeploymentStatus::Deployed {
            return Err(PipelineError::conflict(format!(
                "cannot roll back to deployment {} in status {}",
                target_id,
                target.status.as_str()
            )));
        }

        let build_id = target.build_id.clone();
        let version = target.version;
        let config = target.config.clone();
        let site = self
            .store
            .update_site(
                site_id,
                Box::new(move |site: &mut Site| {
                    site.promote(build_id, version, config);
                    Ok(())
                }),
            )
            .await?;

        self.metrics.record(Metric::Rollback);
        info!(site_id = %site_id, deployment_id = %target_id, version, "Site rolled back");

        if let Err(e) = self.cache.refresh(site_id, &target.files).await {
            warn!(site_id = %site_id, "Cache refresh after rollback failed: {}", e);
        }
        Ok(site)
    }

    pub async fn get_deployment(&self, id: &DeploymentId) -> PipelineResult<Deployment> {
        self.store
            .get_deployment(id)
            .await?
            .ok_or_else(|| PipelineError::not_found(format!("deployment {}", id)))
    }

    /// Deployments of a site, newest first
    pub async fn list_deployments(
        &self,
        site_id: &SiteId,
        limit: usize,
        offset: usize,
    ) -> PipelineResult<Vec<Deployment>> {
        self.store
            .list_deployments(
                &DeploymentFilter::new()
                    .with_site(site_id.clone())
                    .with_limit(limit)
                    .with_offset(offset),
            )
            .await
    }

    /// Whether any deployment of the site was made from the build
    pub async fn has_deployment_for(&self, site_id: &SiteId, build_id: &BuildId) -> PipelineResult<bool> {
        let deployments = self
            .store
            .list_deployments(&DeploymentFilter::new().with_site(site_id.clone()))
            .await?;
        Ok(deployments.iter().any(|d| &d.build_id == build_id))
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    /// Stop starting queued deployments and fail the ones left waiting.
    /// Deployments already publishing run to completion.
    pub async fn shutdown(&self) -> PipelineResult<()> {
        self.pool.close();

        let queued = self
            .store
            .list_deployments(&DeploymentFilter::new().with_status(DeploymentStatus::Pending))
            .await?;
        for deployment in queued {
            let reason = PipelineError::Cancelled(
                "deployment manager shut down before publishing".to_string(),
            );
            self.fail(&deployment, reason).await;
        }
        Ok(())
    }

    async fn get_site(&self, site_id: &SiteId) -> PipelineResult<Site> {
        self.store
            .get_site(site_id)
            .await?
            .ok_or_else(|| PipelineError::not_found(format!("site {}", site_id)))
    }

    /// The build's artifact manifest, narrowed to the requested paths
    async fn resolve_files(&self, request: &DeploymentRequest) -> PipelineResult<Vec<DeploymentFile>> {
        let build = self
            .store
            .get_build(&request.build_id)
            .await?
            .ok_or_else(|| PipelineError::not_found(format!("build {}", request.build_id)))?;

        if build.site_id != request.site_id {
            return Err(PipelineError::validation(format!(
                "build {} does not belong to site {}",
                build.id, request.site_id
            )));
        }
        if build.status != BuildStatus::Completed {
            return Err(PipelineError::conflict(format!(
                "build {} is {}, not completed",
                build.id,
                build.status.as_str()
            )));
        }

        let built = build.output.map(|output| output.files).unwrap_or_default();
        let mut manifest: HashMap<String, DeploymentFile> = HashMap::new();
        let mut order = Vec::new();
        for file in &built {
            let Some(entry) = DeploymentFile::from_build_file(file) else {
                return Err(PipelineError::validation(format!(
                    "artifact {} of build {} was never uploaded",
                    file.path, build.id
                )));
            };
            order.push(entry.path.clone());
            manifest.insert(entry.path.clone(), entry);
        }

        let paths = match &request.files {
            Some(paths) => paths.clone(),
            None => order,
        };
        let mut files = Vec::with_capacity(paths.len());
        for path in paths {
            let file = manifest.remove(&path).ok_or_else(|| {
                PipelineError::validation(format!("build {} has no file {}", build.id, path))
            })?;
            files.push(file);
        }

        if files.is_empty() {
            return Err(PipelineError::validation("deployment has no files"));
        }
        Ok(files)
    }

    async fn process(&self, id: &DeploymentId) {
        let deployment = match self
            .store
            .update_deployment(
                id,
                Box::new(|d: &mut Deployment| d.apply(DeploymentEvent::Deploy)),
            )
            .await
        {
            Ok(deployment) => deployment,
            Err(e) => {
                debug!(deployment_id = %id, "Skipping deployment: {}", e);
                return;
            }
        };

        let started = Instant::now();
        let published = with_timeout(
            "deployment publish",
            self.options.publish_timeout,
            self.publish(&deployment),
        )
        .await;

        let result = match published {
            Ok(files) => {
                let publish_ms = started.elapsed().as_millis() as u64;
                self.promote(&deployment, files, publish_ms).await
            }
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            self.fail(&deployment, e).await;
        }
    }

    /// Copy every build artifact to the deployment's versioned location
    async fn publish(&self, deployment: &Deployment) -> PipelineResult<Vec<DeploymentFile>> {
        let site_id = deployment.site_id.as_str();
        let build_id = deployment.build_id.as_str();
        let version = deployment.version;

        futures::stream::iter(deployment.files.iter().cloned())
            .map(|mut file| async move {
                let from = build_artifact_path(build_id, &file.path);
                let to = site_release_path(site_id, version, &file.path);
                let url = retry_transient(&self.options.publish_retry, "artifact publish", |_| {
                    self.blobs.copy(&from, &to)
                })
                .await?;
                file.url = url;
                Ok::<_, PipelineError>(file)
            })
            .buffered(self.options.publish_parallelism.max(1))
            .try_collect()
            .await
    }

    /// Make the deployment live and refresh the cache, then mark it deployed.
    ///
    /// Runs under the site lock. A deployment older than the live version is
    /// marked deployed without being promoted.
    async fn promote(
        &self,
        deployment: &Deployment,
        files: Vec<DeploymentFile>,
        publish_ms: u64,
    ) -> PipelineResult<()> {
        let _guard = self.locks.lock(&deployment.site_id).await;

        let build_id = deployment.build_id.clone();
        let version = deployment.version;
        let config = deployment.config.clone();
        let promoted = self
            .store
            .update_site(
                &deployment.site_id,
                Box::new(move |site: &mut Site| {
                    if site.version > version {
                        return Err(PipelineError::conflict(format!(
                            "version {} is already live",
                            site.version
                        )));
                    }
                    site.promote(build_id, version, config);
                    Ok(())
                }),
            )
            .await;

        let cache_cleared = match promoted {
            Ok(_) => {
                info!(
                    deployment_id = %deployment.id,
                    site_id = %deployment.site_id,
                    version,
                    "Deployment promoted"
                );
                match self.cache.refresh(&deployment.site_id, &files).await {
                    Ok(_) => true,
                    Err(e) => {
                        warn!(deployment_id = %deployment.id, "Cache refresh failed: {}", e);
                        false
                    }
                }
            }
            Err(PipelineError::Conflict(reason)) => {
                warn!(deployment_id = %deployment.id, "Deployed without promotion: {}", reason);
                false
            }
            Err(e) => return Err(e),
        };

        self.store
            .update_deployment(
                &deployment.id,
                Box::new(move |d: &mut Deployment| {
                    d.files = files;
                    d.stats.publish_ms = publish_ms;
                    d.stats.cache_cleared = cache_cleared;
                    d.apply(DeploymentEvent::DeploySuccess)
                }),
            )
            .await?;
        self.metrics.record(Metric::DeploymentSucceeded);
        Ok(())
    }

    async fn fail(&self, deployment: &Deployment, error: PipelineError) {
        let reason = error.to_string();
        error!(deployment_id = %deployment.id, "Deployment failed: {}", reason);

        match self
            .store
            .update_deployment(
                &deployment.id,
                Box::new(move |d: &mut Deployment| d.apply(DeploymentEvent::DeployFailed(reason))),
            )
            .await
        {
            Ok(_) => self.metrics.record(Metric::DeploymentFailed),
            Err(e) => warn!(deployment_id = %deployment.id, "Could not record failure: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    use std::sync::Mutex;

    use crate::blob::MemoryBlobStore;
    use crate::cache::{CacheOptions, EdgeCache, MemoryEdgeCache};
    use crate::fsm::BuildEvent;
    use crate::models::build::TemplateSelection;
    use crate::models::{
        BuildConfig, BuildFile, BuildJob, BuildOutput, CacheEntry, SourceDescriptor, UserId,
    };
    use crate::store::{BuildStore, DeploymentStore, MemoryStore, SiteStore};
    use async_trait::async_trait;

    struct Fixture {
        store: Arc<MemoryStore>,
        artifacts: Arc<MemoryBlobStore>,
        manager: Arc<DeploymentManager>,
        site: Site,
    }

    async fn fixture_with(
        store: Arc<MemoryStore>,
        artifacts: Arc<MemoryBlobStore>,
        blobs: Arc<dyn BlobStore>,
        edge: Arc<dyn EdgeCache>,
        options: DeployOptions,
    ) -> Fixture {
        let site = Site::new(UserId::new("user_1"), SiteConfig::default());
        store.insert_site(&site).await.unwrap();

        let metrics = Arc::new(PipelineMetrics::new().unwrap());
        let cache = Arc::new(CacheInvalidator::new(
            edge,
            metrics.clone(),
            CacheOptions::default(),
        ));
        let manager = Arc::new(DeploymentManager::new(
            store.clone(),
            blobs,
            cache,
            metrics,
            options,
        ));
        Fixture {
            store,
            artifacts,
            manager,
            site,
        }
    }

    async fn fixture() -> Fixture {
        let blobs = Arc::new(MemoryBlobStore::default());
        fixture_with(
            Arc::new(MemoryStore::new()),
            blobs.clone(),
            blobs,
            Arc::new(MemoryEdgeCache::new(100)),
            DeployOptions::default(),
        )
        .await
    }

    fn template_job(site: &Site) -> BuildJob {
        BuildJob::new(
            site.id.clone(),
            site.owner_id.clone(),
            SourceDescriptor::Template(TemplateSelection {
                template_id: "blank".to_string(),
                variables: Default::default(),
            }),
            BuildConfig::default(),
        )
    }

    /// Store a completed build, uploading its artifact unless `upload` is false
    async fn completed_build(f: &Fixture, body: &str, upload: bool) -> BuildJob {
        let mut job = template_job(&f.site);
        let path = build_artifact_path(job.id.as_str(), "index.html");
        let mut file = BuildFile::new("index.html", body.to_string(), "text/html");
        file.url = Some(format!("memory://blobs/{}", path));
        if upload {
            f.artifacts
                .put(&path, body.as_bytes().to_vec())
                .await
                .unwrap();
        }

        job.apply(BuildEvent::Start).unwrap();
        job.apply(BuildEvent::Complete(BuildOutput::from_files(vec![file])))
            .unwrap();
        f.store.insert_build(&job).await.unwrap();
        job
    }

    async fn deploy(f: &Fixture, build: &BuildJob) -> Deployment {
        let (deployment, handle) = f
            .manager
            .submit_deployment(DeploymentRequest::new(f.site.id.clone(), build.id.clone()))
            .await
            .unwrap();
        handle.await.unwrap().unwrap();
        f.manager.get_deployment(&deployment.id).await.unwrap()
    }

    #[tokio::test]
    async fn test_deploy_publishes_and_promotes() {
        let f = fixture().await;
        let build = completed_build(&f, "<h1>v1</h1>", true).await;

        let deployment = deploy(&f, &build).await;
        assert_eq!(deployment.version, 1);
        assert_eq!(deployment.status, DeploymentStatus::Deployed);
        assert!(deployment.stats.cache_cleared);
        assert_eq!(
            deployment.files[0].url,
            format!("memory://blobs/sites/{}/v1/index.html", f.site.id)
        );

        let site = f.store.get_site(&f.site.id).await.unwrap().unwrap();
        assert_eq!(site.version, 1);
        assert_eq!(site.build_id.as_ref(), Some(&build.id));
        assert!(site.last_deploy.is_some());
    }

    #[tokio::test]
    async fn test_build_must_be_completed() {
        let f = fixture().await;
        let job = template_job(&f.site);
        f.store.insert_build(&job).await.unwrap();

        let err = f
            .manager
            .create_deployment(DeploymentRequest::new(f.site.id.clone(), job.id.clone()))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_requested_files_must_exist_in_build() {
        let f = fixture().await;
        let build = completed_build(&f, "x", true).await;

        let err = f
            .manager
            .create_deployment(
                DeploymentRequest::new(f.site.id.clone(), build.id.clone())
                    .with_files(vec!["missing.html".to_string()]),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Validation(_)));

        let err = f
            .manager
            .create_deployment(
                DeploymentRequest::new(f.site.id.clone(), build.id.clone()).with_files(vec![]),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Validation(_)));
    }

    #[tokio::test]
    async fn test_failed_publish_leaves_site_untouched() {
        let f = fixture().await;
        let build = completed_build(&f, "v1", false).await;

        let deployment = deploy(&f, &build).await;
        assert_eq!(deployment.status, DeploymentStatus::Failed);
        assert!(deployment.error.is_some());

        let site = f.store.get_site(&f.site.id).await.unwrap().unwrap();
        assert_eq!(site.version, 0);
        assert!(site.build_id.is_none());

        let err = f
            .manager
            .rollback_to_deployment(&f.site.id, &deployment.id)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_rollback_restores_earlier_version() {
        let f = fixture().await;
        let first_build = completed_build(&f, "v1", true).await;
        let second_build = completed_build(&f, "v2", true).await;

        let first = deploy(&f, &first_build).await;
        let second = deploy(&f, &second_build).await;
        assert_eq!(second.version, 2);

        let site = f
            .manager
            .rollback_to_deployment(&f.site.id, &first.id)
            .await
            .unwrap();
        assert_eq!(site.version, 1);
        assert_eq!(site.build_id.as_ref(), Some(&first_build.id));

        // Rollback reuses the record instead of creating a new one
        let all = f.manager.list_deployments(&f.site.id, 10, 0).await.unwrap();
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn test_rollback_target_must_belong_to_site() {
        let f = fixture().await;
        let build = completed_build(&f, "v1", true).await;
        let deployment = deploy(&f, &build).await;

        let err = f
            .manager
            .rollback_to_deployment(&SiteId::new("site_other"), &deployment.id)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Validation(_)));
    }

    /// Blob store whose writes fail with an external error a set number of times
    struct FlakyBlobs {
        inner: Arc<MemoryBlobStore>,
        failures: AtomicU32,
    }

    #[async_trait]
    impl BlobStore for FlakyBlobs {
        async fn put(&self, path: &str, bytes: Vec<u8>) -> PipelineResult<String> {
            if self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(PipelineError::external("blob store unavailable"));
            }
            self.inner.put(path, bytes).await
        }

        async fn get(&self, path: &str) -> PipelineResult<Vec<u8>> {
            self.inner.get(path).await
        }
    }

    #[tokio::test]
    async fn test_publish_retries_transient_blob_errors() {
        let memory = Arc::new(MemoryBlobStore::default());
        let flaky = Arc::new(FlakyBlobs {
            inner: memory.clone(),
            failures: AtomicU32::new(2),
        });
        let mut options = DeployOptions::default();
        options.publish_retry.backoff.base_delay = Duration::from_millis(1);
        let f = fixture_with(
            Arc::new(MemoryStore::new()),
            memory,
            flaky.clone(),
            Arc::new(MemoryEdgeCache::new(100)),
            options,
        )
        .await;
        let build = completed_build(&f, "hello", true).await;

        let deployment = deploy(&f, &build).await;
        assert_eq!(deployment.status, DeploymentStatus::Deployed);
        assert_eq!(flaky.failures.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_stale_deployment_is_not_promoted() {
        let f = fixture().await;
        let build = completed_build(&f, "x", true).await;

        // A later version is already live
        f.store
            .update_site(
                &f.site.id,
                Box::new(|site: &mut Site| {
                    site.version = 5;
                    Ok(())
                }),
            )
            .await
            .unwrap();

        let deployment = deploy(&f, &build).await;
        assert_eq!(deployment.version, 1);
        assert_eq!(deployment.status, DeploymentStatus::Deployed);
        assert!(!deployment.stats.cache_cleared);

        let site = f.store.get_site(&f.site.id).await.unwrap().unwrap();
        assert_eq!(site.version, 5);
    }

    #[tokio::test]
    async fn test_concurrent_deployments_get_distinct_versions() {
        let f = fixture().await;
        let build = completed_build(&f, "x", true).await;

        let requests = (0..8).map(|_| {
            f.manager
                .create_deployment(DeploymentRequest::new(f.site.id.clone(), build.id.clone()))
        });
        let created = futures::future::try_join_all(requests).await.unwrap();

        let mut versions: Vec<u64> = created.iter().map(|d| d.version).collect();
        versions.sort_unstable();
        assert_eq!(versions, (1..=8).collect::<Vec<_>>());
    }

    /// Blob store whose copies stall until the test ends
    struct StalledBlobs {
        inner: Arc<MemoryBlobStore>,
    }

    #[async_trait]
    impl BlobStore for StalledBlobs {
        async fn put(&self, path: &str, bytes: Vec<u8>) -> PipelineResult<String> {
            self.inner.put(path, bytes).await
        }

        async fn get(&self, path: &str) -> PipelineResult<Vec<u8>> {
            self.inner.get(path).await
        }

        async fn copy(&self, _from: &str, _to: &str) -> PipelineResult<String> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Err(PipelineError::external("copy never finished"))
        }
    }

    async fn stalled_fixture(options: DeployOptions) -> Fixture {
        let memory = Arc::new(MemoryBlobStore::default());
        fixture_with(
            Arc::new(MemoryStore::new()),
            memory.clone(),
            Arc::new(StalledBlobs { inner: memory }),
            Arc::new(MemoryEdgeCache::new(100)),
            options,
        )
        .await
    }

    #[tokio::test]
    async fn test_publish_timeout_fails_the_deployment() {
        let f = stalled_fixture(DeployOptions {
            publish_timeout: Duration::from_millis(20),
            ..DeployOptions::default()
        })
        .await;
        let build = completed_build(&f, "v1", true).await;

        let deployment = deploy(&f, &build).await;
        assert_eq!(deployment.status, DeploymentStatus::Failed);
        assert_eq!(
            deployment.error.as_deref(),
            Some("Timed out: deployment publish exceeded 20ms")
        );
        assert!(deployment.ended_at.is_some());

        let site = f.store.get_site(&f.site.id).await.unwrap().unwrap();
        assert_eq!(site.version, 0);
        assert!(site.build_id.is_none());
    }

    /// Edge cache that notes how many deployments were already deployed
    /// whenever it is warmed
    struct ObservingEdge {
        inner: MemoryEdgeCache,
        store: Arc<MemoryStore>,
        deployed_at_warm_up: Mutex<Vec<usize>>,
    }

    #[async_trait]
    impl EdgeCache for ObservingEdge {
        async fn purge(&self, namespace: &str) -> PipelineResult<usize> {
            self.inner.purge(namespace).await
        }

        async fn push(&self, namespace: &str, entries: &[CacheEntry]) -> PipelineResult<()> {
            let deployed = self
                .store
                .list_deployments(&DeploymentFilter::new().with_status(DeploymentStatus::Deployed))
                .await?
                .len();
            self.deployed_at_warm_up.lock().unwrap().push(deployed);
            self.inner.push(namespace, entries).await
        }

        async fn get(&self, namespace: &str, path: &str) -> PipelineResult<Option<CacheEntry>> {
            self.inner.get(namespace, path).await
        }
    }

    #[tokio::test]
    async fn test_deployment_is_final_once_deployed() {
        let store = Arc::new(MemoryStore::new());
        let edge = Arc::new(ObservingEdge {
            inner: MemoryEdgeCache::new(100),
            store: store.clone(),
            deployed_at_warm_up: Mutex::new(Vec::new()),
        });
        let blobs = Arc::new(MemoryBlobStore::default());
        let f = fixture_with(
            store,
            blobs.clone(),
            blobs,
            edge.clone(),
            DeployOptions::default(),
        )
        .await;

        let first = deploy(&f, &completed_build(&f, "v1", true).await).await;
        let second = deploy(&f, &completed_build(&f, "v2", true).await).await;

        // The cache is refreshed before each record turns deployed
        assert_eq!(*edge.deployed_at_warm_up.lock().unwrap(), vec![0, 1]);
        for deployment in [&first, &second] {
            assert_eq!(deployment.status, DeploymentStatus::Deployed);
            assert!(deployment.stats.cache_cleared);
        }
    }

    #[tokio::test]
    async fn test_shutdown_fails_queued_deployments() {
        let f = stalled_fixture(DeployOptions {
            max_concurrency: 1,
            ..DeployOptions::default()
        })
        .await;
        let build = completed_build(&f, "v1", true).await;

        let (running, _running_handle) = f
            .manager
            .submit_deployment(DeploymentRequest::new(f.site.id.clone(), build.id.clone()))
            .await
            .unwrap();
        let (queued, queued_handle) = f
            .manager
            .submit_deployment(DeploymentRequest::new(f.site.id.clone(), build.id.clone()))
            .await
            .unwrap();

        loop {
            let current = f.manager.get_deployment(&running.id).await.unwrap();
            if current.status == DeploymentStatus::Deploying {
                break;
            }
            tokio::task::yield_now().await;
        }

        f.manager.shutdown().await.unwrap();
        assert!(matches!(
            queued_handle.await.unwrap(),
            Err(PipelineError::Cancelled(_))
        ));

        let queued = f.manager.get_deployment(&queued.id).await.unwrap();
        assert_eq!(queued.status, DeploymentStatus::Failed);
        assert_eq!(
            queued.error.as_deref(),
            Some("Cancelled: deployment manager shut down before publishing")
        );

        // Publishing deployments are left to finish
        let running = f.manager.get_deployment(&running.id).await.unwrap();
        assert_eq!(running.status, DeploymentStatus::Deploying);
    }
}
