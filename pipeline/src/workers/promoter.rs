//! Promoter worker: deploys builds that ask to go live on success

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::json;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, error, info, warn};

use crate::builder::BuildOrchestrator;
use crate::deploy::{DeploymentManager, DeploymentRequest};
use crate::models::{BuildJob, BuildLogLevel, BuildStatus};
use crate::store::BuildFilter;

/// Promoter worker options
#[derive(Debug, Clone, Default)]
pub struct Options {
    /// Deploy every completed build, not only those with `deploy_on_success`
    pub deploy_all: bool,
}

/// Run the promoter worker until shutdown or until the build channel closes
pub async fn run(
    options: &Options,
    mut completed: broadcast::Receiver<BuildJob>,
    builds: Arc<BuildOrchestrator>,
    deployments: Arc<DeploymentManager>,
    mut shutdown_signal: Pin<Box<dyn Future<Output = ()> + Send>>,
) {
    info!("Promoter worker starting...");

    loop {
        let job = tokio::select! {
            _ = &mut shutdown_signal => {
                info!("Promoter worker shutting down...");
                return;
            }
            received = completed.recv() => match received {
                Ok(job) => job,
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Promoter worker lagged, {} completed builds skipped; reconciling", skipped);
                    reconcile(options, &builds, &deployments).await;
                    continue;
                }
                Err(RecvError::Closed) => {
                    info!("Build channel closed, promoter worker exiting");
                    return;
                }
            },
        };

        promote(options, &builds, &deployments, &job).await;
    }
}

/// Deploy every completed build that wants one and has none yet, oldest first
async fn reconcile(options: &Options, builds: &BuildOrchestrator, deployments: &Arc<DeploymentManager>) {
    let completed = match builds
        .find_build_jobs(&BuildFilter::new().with_status(BuildStatus::Completed))
        .await
    {
        Ok(jobs) => jobs,
        Err(e) => {
            error!("Failed to list completed builds: {}", e);
            return;
        }
    };

    for job in completed.iter().rev() {
        promote(options, builds, deployments, job).await;
    }
}

async fn promote(
    options: &Options,
    builds: &BuildOrchestrator,
    deployments: &Arc<DeploymentManager>,
    job: &BuildJob,
) {
    if !(options.deploy_all || job.config.deploy_on_success) {
        debug!(build_id = %job.id, "Build not marked for deployment");
        return;
    }

    match deployments.has_deployment_for(&job.site_id, &job.id).await {
        Ok(true) => {
            debug!(build_id = %job.id, "Build already deployed");
            return;
        }
        Ok(false) => {}
        Err(e) => warn!(build_id = %job.id, "Could not check existing deployments: {}", e),
    }

    let request = DeploymentRequest::new(job.site_id.clone(), job.id.clone());
    match deployments.create_deployment(request).await {
        Ok(deployment) => info!(
            build_id = %job.id,
            deployment_id = %deployment.id,
            version = deployment.version,
            "Deploying completed build"
        ),
        Err(e) => {
            error!(build_id = %job.id, "Failed to deploy completed build: {}", e);
            let logged = builds
                .append_log(
                    &job.id,
                    BuildLogLevel::Error,
                    "Automatic deployment failed",
                    Some(json!({ "error": e.to_string() })),
                )
                .await;
            if let Err(e) = logged {
                warn!(build_id = %job.id, "Could not record deployment failure: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use tokio::sync::oneshot;
    use tokio::task::JoinHandle;

    use crate::builder::BuildOptions;
    use crate::models::build::TemplateSelection;
    use crate::models::{BuildConfig, SiteConfig, SourceDescriptor, UserId};
    use crate::pipeline::{Collaborators, Pipeline, PipelineOptions};

    fn pipeline() -> Arc<Pipeline> {
        let options = PipelineOptions {
            builds: BuildOptions {
                completed_channel_size: 1,
                ..BuildOptions::default()
            },
            ..PipelineOptions::default()
        };
        Arc::new(Pipeline::new(Collaborators::in_memory(), options).unwrap())
    }

    fn template() -> SourceDescriptor {
        SourceDescriptor::Template(TemplateSelection {
            template_id: "blank".to_string(),
            variables: Default::default(),
        })
    }

    fn start(
        pipeline: &Arc<Pipeline>,
        completed: broadcast::Receiver<BuildJob>,
    ) -> (oneshot::Sender<()>, JoinHandle<()>) {
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let builds = pipeline.builds.clone();
        let deployments = pipeline.deployments.clone();
        let worker = tokio::spawn(async move {
            run(
                &Options::default(),
                completed,
                builds,
                deployments,
                Box::pin(async move {
                    let _ = stop_rx.await;
                }),
            )
            .await;
        });
        (stop_tx, worker)
    }

    #[tokio::test]
    async fn test_lagged_builds_are_reconciled() {
        let pipeline = pipeline();
        let owner = UserId::new("user_1");
        let site = pipeline
            .register_site(owner.clone(), SiteConfig::default())
            .await
            .unwrap();
        let config = BuildConfig {
            deploy_on_success: true,
            ..BuildConfig::default()
        };

        // Three completions overflow a channel of one before the worker reads it
        let completed = pipeline.builds.subscribe_completed();
        let mut jobs = Vec::new();
        for _ in 0..3 {
            let (job, handle) = pipeline
                .builds
                .submit_build_job(&owner, &site.id, template(), config.clone())
                .await
                .unwrap();
            handle.await.unwrap().unwrap();
            jobs.push(job);
        }

        let (stop_tx, worker) = start(&pipeline, completed);

        for _ in 0..200 {
            let deployed = pipeline
                .deployments
                .list_deployments(&site.id, 10, 0)
                .await
                .unwrap();
            if deployed.len() == jobs.len() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let _ = stop_tx.send(());
        worker.await.unwrap();
        let deployed = pipeline
            .deployments
            .list_deployments(&site.id, 10, 0)
            .await
            .unwrap();

        // Every build is deployed exactly once
        assert_eq!(deployed.len(), jobs.len());
        for job in &jobs {
            assert_eq!(deployed.iter().filter(|d| d.build_id == job.id).count(), 1);
        }
    }

    #[tokio::test]
    async fn test_builds_not_marked_are_skipped() {
        let pipeline = pipeline();
        let owner = UserId::new("user_1");
        let site = pipeline
            .register_site(owner.clone(), SiteConfig::default())
            .await
            .unwrap();

        let completed = pipeline.builds.subscribe_completed();
        let (stop_tx, worker) = start(&pipeline, completed);

        let (_, handle) = pipeline
            .builds
            .submit_build_job(&owner, &site.id, template(), BuildConfig::default())
            .await
            .unwrap();
        handle.await.unwrap().unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let _ = stop_tx.send(());
        worker.await.unwrap();
        assert!(pipeline
            .deployments
            .list_deployments(&site.id, 10, 0)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_failed_automatic_deployment_is_logged_on_build() {
        let pipeline = pipeline();
        let owner = UserId::new("user_1");
        let site = pipeline
            .register_site(owner.clone(), SiteConfig::default())
            .await
            .unwrap();
        let config = BuildConfig {
            deploy_on_success: true,
            ..BuildConfig::default()
        };
        let (job, handle) = pipeline
            .builds
            .submit_build_job(&owner, &site.id, template(), config)
            .await
            .unwrap();
        handle.await.unwrap().unwrap();

        // The deployment targets a site the build does not belong to
        let mut stray = pipeline.builds.get_build_job(&job.id).await.unwrap();
        stray.site_id = crate::models::SiteId::new("site_missing");

        promote(
            &Options::default(),
            &pipeline.builds,
            &pipeline.deployments,
            &stray,
        )
        .await;

        let logs = pipeline.builds.get_logs(&job.id).await.unwrap();
        let last = logs.last().unwrap();
        assert_eq!(last.level, BuildLogLevel::Error);
        assert_eq!(last.message, "Automatic deployment failed");
        assert!(last.data.as_ref().unwrap()["error"]
            .as_str()
            .unwrap()
            .contains("site_missing"));
    }
}
