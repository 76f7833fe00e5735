//! Build job orchestration

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures::future::try_join_all;
use serde_json::json;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::blob::{build_artifact_path, BlobStore};
use crate::builder::{append_log, BuildContext, BuilderSet};
use crate::errors::{PipelineError, PipelineResult};
use crate::fsm::BuildEvent;
use crate::metrics::{Metric, PipelineMetrics};
use crate::models::{
    BuildConfig, BuildFile, BuildId, BuildJob, BuildLogEntry, BuildLogLevel, BuildOutput,
    BuildStatus, SiteId, SourceDescriptor, UserId,
};
use crate::store::{BuildFilter, PipelineStore};
use crate::utils::{calc_exp_backoff, retry_transient, with_timeout, RetryOptions};
use crate::workers::pool::{JobHandle, PoolStats, WorkerPool};

/// Build orchestrator options
#[derive(Debug, Clone)]
pub struct BuildOptions {
    /// Builds executing at once; the rest wait in FIFO order
    pub max_concurrency: usize,
    /// Maximum duration of one build, retries and upload included
    pub timeout: Duration,
    /// Retry policy for transient builder errors
    pub retry: RetryOptions,
    /// Retry policy for artifact uploads
    pub upload_retry: RetryOptions,
    /// Capacity of the completed-build broadcast
    pub completed_channel_size: usize,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            max_concurrency: 4,
            timeout: Duration::from_secs(600),
            retry: RetryOptions::default(),
            upload_retry: RetryOptions::default(),
            completed_channel_size: 64,
        }
    }
}

/// Accepts build jobs and runs them on a bounded pool
pub struct BuildOrchestrator {
    store: Arc<dyn PipelineStore>,
    blobs: Arc<dyn BlobStore>,
    builders: BuilderSet,
    pool: WorkerPool,
    tokens: DashMap<BuildId, CancellationToken>,
    completed_tx: broadcast::Sender<BuildJob>,
    metrics: Arc<PipelineMetrics>,
    options: BuildOptions,
}

impl BuildOrchestrator {
    pub fn new(
        store: Arc<dyn PipelineStore>,
        blobs: Arc<dyn BlobStore>,
        builders: BuilderSet,
        metrics: Arc<PipelineMetrics>,
        options: BuildOptions,
    ) -> Self {
        let (completed_tx, _) = broadcast::channel(options.completed_channel_size.max(1));
        Self {
            store,
            blobs,
            builders,
            pool: WorkerPool::new("builds", options.max_concurrency),
            tokens: DashMap::new(),
            completed_tx,
            metrics,
            options,
        }
    }

    /// Create a pending job and enqueue it without waiting for it to run
    pub async fn create_build_job(
        self: &Arc<Self>,
        user_id: &UserId,
        site_id: &SiteId,
        source: SourceDescriptor,
        config: BuildConfig,
    ) -> PipelineResult<BuildJob> {
        let (job, _handle) = self
            .submit_build_job(user_id, site_id, source, config)
            .await?;
        Ok(job)
    }

    /// Like [`Self::create_build_job`], also returning the execution handle
    pub async fn submit_build_job(
        self: &Arc<Self>,
        user_id: &UserId,
        site_id: &SiteId,
        source: SourceDescriptor,
        config: BuildConfig,
    ) -> PipelineResult<(BuildJob, JobHandle)> {
        self.builders.get(source.kind())?;

        let site = self
            .store
            .get_site(site_id)
            .await?
            .ok_or_else(|| PipelineError::not_found(format!("site {}", site_id)))?;
        if !site.is_owned_by(user_id) {
            return Err(PipelineError::PermissionDenied(format!(
                "user {} does not own site {}",
                user_id, site_id
            )));
        }

        let job = BuildJob::new(site_id.clone(), user_id.clone(), source, config);
        self.store.insert_build(&job).await?;
        self.metrics.record(Metric::BuildCreated);
        info!(build_id = %job.id, site_id = %site_id, kind = %job.source.kind(), "Build job created");

        let handle = self.enqueue(&job.id);
        Ok((job, handle))
    }

    /// Start a fresh job from a finished job's source and config
    pub async fn retry_build_job(self: &Arc<Self>, job_id: &BuildId) -> PipelineResult<BuildJob> {
        let (job, _handle) = self.submit_retry(job_id).await?;
        Ok(job)
    }

    pub async fn submit_retry(
        self: &Arc<Self>,
        job_id: &BuildId,
    ) -> PipelineResult<(BuildJob, JobHandle)> {
        let previous = self.get_build_job(job_id).await?;
        if !previous.status.is_terminal() {
            return Err(PipelineError::conflict(format!(
                "build {} is still {}",
                job_id,
                previous.status.as_str()
            )));
        }
        self.builders.get(previous.source.kind())?;

        let job = previous.retried();
        self.store.insert_build(&job).await?;
        self.metrics.record(Metric::BuildCreated);
        info!(build_id = %job.id, retry_of = %job_id, "Build job retried");

        let handle = self.enqueue(&job.id);
        Ok((job, handle))
    }

    /// Cancel a job that has not finished yet
    pub async fn cancel_build_job(&self, job_id: &BuildId) -> PipelineResult<BuildJob> {
        let job = self
            .store
            .update_build(job_id, Box::new(|job: &mut BuildJob| job.apply(BuildEvent::Cancel)))
            .await?;

        if let Some(token) = self.tokens.get(job_id) {
            token.cancel();
        }
        self.metrics.record(Metric::BuildCancelled);
        self.append_log(job_id, BuildLogLevel::Warn, "Build cancelled", None)
            .await?;
        Ok(job)
    }

    pub async fn get_build_job(&self, job_id: &BuildId) -> PipelineResult<BuildJob> {
        self.store
            .get_build(job_id)
            .await?
            .ok_or_else(|| PipelineError::not_found(format!("build {}", job_id)))
    }

    /// Jobs of a site, newest first
    pub async fn list_build_jobs(
        &self,
        site_id: &SiteId,
        limit: usize,
        offset: usize,
    ) -> PipelineResult<Vec<BuildJob>> {
        self.store
            .list_builds(
                &BuildFilter::new()
                    .with_site(site_id.clone())
                    .with_limit(limit)
                    .with_offset(offset),
            )
            .await
    }

    /// Jobs of any site matching the filter, newest first
    pub async fn find_build_jobs(&self, filter: &BuildFilter) -> PipelineResult<Vec<BuildJob>> {
        self.store.list_builds(filter).await
    }

    /// Append an entry to a job's log, in any state
    pub async fn append_log(
        &self,
        job_id: &BuildId,
        level: BuildLogLevel,
        message: &str,
        data: Option<serde_json::Value>,
    ) -> PipelineResult<()> {
        let mut entry = BuildLogEntry::new(level, message);
        entry.data = data;
        append_log(self.store.as_ref(), job_id, entry).await
    }

    pub async fn get_logs(&self, job_id: &BuildId) -> PipelineResult<Vec<BuildLogEntry>> {
        Ok(self.get_build_job(job_id).await?.logs)
    }

    /// Receive every job that reaches `completed`
    pub fn subscribe_completed(&self) -> broadcast::Receiver<BuildJob> {
        self.completed_tx.subscribe()
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    /// Stop starting queued builds, cancel running ones and mark every job
    /// still waiting for a worker as cancelled
    pub async fn shutdown(&self) -> PipelineResult<()> {
        self.pool.close();
        for token in self.tokens.iter() {
            token.cancel();
        }

        let queued = self
            .store
            .list_builds(&BuildFilter::new().with_status(BuildStatus::Pending))
            .await?;
        for job in queued {
            self.record_cancelled(&job.id, "Build cancelled at shutdown")
                .await;
        }
        Ok(())
    }

    fn enqueue(self: &Arc<Self>, job_id: &BuildId) -> JobHandle {
        let token = CancellationToken::new();
        self.tokens.insert(job_id.clone(), token.clone());

        let this = Arc::clone(self);
        let job_id = job_id.clone();
        self.pool.submit(async move {
            this.run_job(&job_id, token).await;
            this.tokens.remove(&job_id);
        })
    }

    async fn run_job(&self, job_id: &BuildId, token: CancellationToken) {
        let job = match self
            .store
            .update_build(job_id, Box::new(|job: &mut BuildJob| job.apply(BuildEvent::Start)))
            .await
        {
            Ok(job) => job,
            Err(e) => {
                // Cancelled while queued
                debug!(build_id = %job_id, "Skipping build: {}", e);
                return;
            }
        };

        let ctx = BuildContext::new(
            job.id.clone(),
            job.site_id.clone(),
            job.source.clone(),
            job.config.clone(),
            Arc::clone(&self.store),
            token,
        );
        ctx.log(BuildLogLevel::Info, "Starting build process").await;

        let result = with_timeout("build execution", self.options.timeout, self.execute(&ctx)).await;
        match result {
            Ok(output) => self.complete(&ctx, output).await,
            Err(PipelineError::Cancelled(reason)) => {
                info!(build_id = %job_id, "Build stopped: {}", reason);
                self.record_cancelled(job_id, "Build stopped before completion")
                    .await;
            }
            Err(e) => self.fail(&ctx, e).await,
        }
    }

    async fn execute(&self, ctx: &BuildContext) -> PipelineResult<BuildOutput> {
        let builder = self.builders.get(ctx.source.kind())?;
        let max_attempts = self.options.retry.max_attempts.max(1);

        let mut attempt = 0;
        let output = loop {
            ctx.checkpoint("build")?;
            match builder.build(ctx).await {
                Ok(output) => break output,
                Err(e) if e.is_transient() && attempt + 1 < max_attempts => {
                    let delay = calc_exp_backoff(&self.options.retry.backoff, attempt);
                    self.metrics.record(Metric::BuildAttemptRetried);
                    ctx.log_with(
                        BuildLogLevel::Warn,
                        "Build attempt failed, retrying",
                        json!({
                            "attempt": attempt + 1,
                            "max_attempts": max_attempts,
                            "delay_ms": delay.as_millis() as u64,
                            "error": e.to_string(),
                        }),
                    )
                    .await;

                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = ctx.cancel_token().cancelled() => {
                            return Err(PipelineError::Cancelled(format!(
                                "build {} cancelled during backoff",
                                ctx.job_id
                            )));
                        }
                    }
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        };

        if output.files.is_empty() {
            return Err(PipelineError::validation("build produced no files"));
        }

        ctx.checkpoint("upload")?;
        self.upload(ctx, output).await
    }

    /// Store every artifact file under `builds/<job>/` and record its URL
    async fn upload(&self, ctx: &BuildContext, output: BuildOutput) -> PipelineResult<BuildOutput> {
        let BuildOutput { files, stats } = output;
        let uploads = files.into_iter().map(|file| self.upload_file(ctx, file));
        let files = try_join_all(uploads).await?;

        ctx.log_with(
            BuildLogLevel::Debug,
            "Uploaded build artifacts",
            json!({ "files": files.len() }),
        )
        .await;
        Ok(BuildOutput { files, stats })
    }

    async fn upload_file(&self, ctx: &BuildContext, mut file: BuildFile) -> PipelineResult<BuildFile> {
        let path = build_artifact_path(ctx.job_id.as_str(), &file.path);
        let blobs = &self.blobs;
        let content = &file.content;
        let url = retry_transient(&self.options.upload_retry, "artifact upload", |_| {
            blobs.put(&path, content.as_bytes().to_vec())
        })
        .await?;
        file.url = Some(url);
        Ok(file)
    }

    async fn complete(&self, ctx: &BuildContext, output: BuildOutput) {
        let committed = self
            .store
            .update_build(
                &ctx.job_id,
                Box::new(move |job: &mut BuildJob| job.apply(BuildEvent::Complete(output))),
            )
            .await;

        match committed {
            Ok(job) => {
                self.metrics.record(Metric::BuildCompleted);
                if let Some(output) = &job.output {
                    ctx.log_with(
                        BuildLogLevel::Info,
                        "Build completed successfully",
                        json!({
                            "files_count": output.files.len(),
                            "total_size": output.stats.total_size,
                            "duration_ms": output.stats.duration_ms,
                        }),
                    )
                    .await;
                }
                // No subscribers is fine
                let _ = self.completed_tx.send(job);
            }
            Err(e) => {
                warn!(build_id = %ctx.job_id, "Discarding build output: {}", e);
            }
        }
    }

    /// Cancel the job unless a cancel request already did
    async fn record_cancelled(&self, job_id: &BuildId, message: &str) {
        let committed = self
            .store
            .update_build(job_id, Box::new(|job: &mut BuildJob| job.apply(BuildEvent::Cancel)))
            .await;
        match committed {
            Ok(_) => {
                self.metrics.record(Metric::BuildCancelled);
                if let Err(e) = self.append_log(job_id, BuildLogLevel::Warn, message, None).await {
                    warn!(build_id = %job_id, "Could not log cancellation: {}", e);
                }
            }
            Err(e) => debug!(build_id = %job_id, "Cancellation already recorded: {}", e),
        }
    }

    async fn fail(&self, ctx: &BuildContext, error: PipelineError) {
        let reason = error.to_string();
        ctx.log_with(
            BuildLogLevel::Error,
            "Build failed",
            json!({ "error": reason }),
        )
        .await;

        match self
            .store
            .update_build(
                &ctx.job_id,
                Box::new(move |job: &mut BuildJob| job.apply(BuildEvent::Fail(reason))),
            )
            .await
        {
            Ok(_) => self.metrics.record(Metric::BuildFailed),
            Err(e) => warn!(build_id = %ctx.job_id, "Could not record build failure: {}", e),
        }
    }
}
