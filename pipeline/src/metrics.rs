//! Pipeline metrics registry
//!
//! A single `PipelineMetrics` instance is created at startup and handed to
//! every component that records into it. Counters live on a private
//! Prometheus registry and are exported in the text exposition format.

use prometheus::{Encoder, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry, TextEncoder};

use crate::errors::{PipelineError, PipelineResult};
use crate::workers::pool::PoolStats;

/// Counters recorded by the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    BuildCreated,
    BuildCompleted,
    BuildFailed,
    BuildCancelled,
    BuildAttemptRetried,
    DeploymentCreated,
    DeploymentSucceeded,
    DeploymentFailed,
    Rollback,
    DomainAdded,
    DomainVerified,
    DomainFailed,
    CertificateIssued,
    CertificateFailed,
    CachePurged,
    CacheWarmed,
    CacheHit,
    CacheMiss,
}

#[derive(Clone)]
pub struct PipelineMetrics {
    registry: Registry,
    builds: IntCounterVec,
    deployments: IntCounterVec,
    domains: IntCounterVec,
    cache: IntCounterVec,
    pool_queued: IntGaugeVec,
    pool_running: IntGaugeVec,
    domain_tasks: IntGauge,
}

fn counter(registry: &Registry, name: &str, help: &str, label: &str) -> PipelineResult<IntCounterVec> {
    let vec = IntCounterVec::new(Opts::new(name, help).namespace("sitepipe"), &[label])?;
    registry.register(Box::new(vec.clone()))?;
    Ok(vec)
}

fn gauge(registry: &Registry, name: &str, help: &str) -> PipelineResult<IntGaugeVec> {
    let vec = IntGaugeVec::new(Opts::new(name, help).namespace("sitepipe"), &["pool"])?;
    registry.register(Box::new(vec.clone()))?;
    Ok(vec)
}

impl PipelineMetrics {
    /// Create the counters and register them on a fresh registry
    pub fn new() -> PipelineResult<Self> {
        let registry = Registry::new();

        let builds = counter(&registry, "build_events_total", "Build job events", "event")?;
        let deployments = counter(
            &registry,
            "deployment_events_total",
            "Deployment events",
            "event",
        )?;
        let domains = counter(&registry, "domain_events_total", "Domain provisioning events", "event")?;
        let cache = counter(&registry, "cache_operations_total", "Edge cache operations", "operation")?;
        let pool_queued = gauge(&registry, "pool_queued_jobs", "Jobs waiting for a worker")?;
        let pool_running = gauge(&registry, "pool_running_jobs", "Jobs currently running")?;

        let domain_tasks = IntGauge::with_opts(
            Opts::new("domain_tasks", "Background domain tasks in flight").namespace("sitepipe"),
        )?;
        registry.register(Box::new(domain_tasks.clone()))?;

        Ok(Self {
            registry,
            builds,
            deployments,
            domains,
            cache,
            pool_queued,
            pool_running,
            domain_tasks,
        })
    }

    fn series(&self, metric: Metric) -> (&IntCounterVec, &'static str) {
        match metric {
            Metric::BuildCreated => (&self.builds, "created"),
            Metric::BuildCompleted => (&self.builds, "completed"),
            Metric::BuildFailed => (&self.builds, "failed"),
            Metric::BuildCancelled => (&self.builds, "cancelled"),
            Metric::BuildAttemptRetried => (&self.builds, "attempt_retried"),
            Metric::DeploymentCreated => (&self.deployments, "created"),
            Metric::DeploymentSucceeded => (&self.deployments, "succeeded"),
            Metric::DeploymentFailed => (&self.deployments, "failed"),
            Metric::Rollback => (&self.deployments, "rolled_back"),
            Metric::DomainAdded => (&self.domains, "added"),
            Metric::DomainVerified => (&self.domains, "verified"),
            Metric::DomainFailed => (&self.domains, "failed"),
            Metric::CertificateIssued => (&self.domains, "certificate_issued"),
            Metric::CertificateFailed => (&self.domains, "certificate_failed"),
            Metric::CachePurged => (&self.cache, "purge"),
            Metric::CacheWarmed => (&self.cache, "warm"),
            Metric::CacheHit => (&self.cache, "hit"),
            Metric::CacheMiss => (&self.cache, "miss"),
        }
    }

    pub fn record(&self, metric: Metric) {
        let (vec, label) = self.series(metric);
        vec.with_label_values(&[label]).inc();
    }

    pub fn get(&self, metric: Metric) -> u64 {
        let (vec, label) = self.series(metric);
        vec.with_label_values(&[label]).get()
    }

    /// Publish a worker pool's current depth
    pub fn observe_pool(&self, pool: &str, stats: PoolStats) {
        self.pool_queued
            .with_label_values(&[pool])
            .set(stats.queued as i64);
        self.pool_running
            .with_label_values(&[pool])
            .set(stats.running as i64);
    }

    pub fn observe_domain_tasks(&self, active: usize) {
        self.domain_tasks.set(active as i64);
    }

    /// Render every registered series in the Prometheus text format
    pub fn export(&self) -> PipelineResult<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| PipelineError::Internal(e.to_string()))
    }
}
