//! Site cache invalidation and warm-up

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use tracing::{debug, info};

use crate::cache::edge::EdgeCache;
use crate::errors::PipelineResult;
use crate::metrics::{Metric, PipelineMetrics};
use crate::models::{CacheEntry, CacheStatus, DeploymentFile, SiteId};
use crate::utils::{retry_transient, with_timeout, RetryOptions};

/// Cache invalidator options
#[derive(Debug, Clone)]
pub struct CacheOptions {
    /// Bounded retry for edge API calls
    pub retry: RetryOptions,
    /// Maximum duration of a single purge or warm-up
    pub stage_timeout: Duration,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            retry: RetryOptions::default(),
            stage_timeout: Duration::from_secs(60),
        }
    }
}

/// Cache namespace of a site on the edge
pub fn site_namespace(site_id: &SiteId) -> String {
    format!("site:{}", site_id)
}

/// Purges and warms a site's edge cache and keeps its hit/miss counters
pub struct CacheInvalidator {
    edge: Arc<dyn EdgeCache>,
    statuses: DashMap<SiteId, CacheStatus>,
    metrics: Arc<PipelineMetrics>,
    options: CacheOptions,
}

impl CacheInvalidator {
    pub fn new(
        edge: Arc<dyn EdgeCache>,
        metrics: Arc<PipelineMetrics>,
        options: CacheOptions,
    ) -> Self {
        Self {
            edge,
            statuses: DashMap::new(),
            metrics,
            options,
        }
    }

    fn update_status<F: FnOnce(&mut CacheStatus)>(&self, site_id: &SiteId, f: F) -> CacheStatus {
        let mut status = self
            .statuses
            .entry(site_id.clone())
            .or_insert_with(|| CacheStatus::empty(site_id.clone()));
        f(status.value_mut());
        status.value().clone()
    }

    /// Remove every entry under the site's namespace. Idempotent.
    pub async fn purge(&self, site_id: &SiteId) -> PipelineResult<CacheStatus> {
        let namespace = site_namespace(site_id);
        let edge = &self.edge;
        let removed = with_timeout(
            "cache purge",
            self.options.stage_timeout,
            retry_transient(&self.options.retry, "cache purge", |_| edge.purge(&namespace)),
        )
        .await?;

        self.metrics.record(Metric::CachePurged);
        info!(site_id = %site_id, removed, "Purged site cache");

        Ok(self.update_status(site_id, |status| {
            let now = Utc::now();
            status.purged_at = Some(now);
            status.entries = 0;
            status.updated_at = now;
        }))
    }

    /// Pre-populate the site's namespace with a file manifest
    pub async fn warm_up(
        &self,
        site_id: &SiteId,
        files: &[DeploymentFile],
    ) -> PipelineResult<CacheStatus> {
        let namespace = site_namespace(site_id);
        let entries: Vec<CacheEntry> = files.iter().map(CacheEntry::from).collect();
        let edge = &self.edge;
        let entries_ref = &entries;
        with_timeout(
            "cache warm-up",
            self.options.stage_timeout,
            retry_transient(&self.options.retry, "cache warm-up", |_| {
                edge.push(&namespace, entries_ref)
            }),
        )
        .await?;

        self.metrics.record(Metric::CacheWarmed);
        debug!(site_id = %site_id, files = entries.len(), "Warmed site cache");

        Ok(self.update_status(site_id, |status| {
            let now = Utc::now();
            status.entries = entries.len();
            status.warmed_at = Some(now);
            status.updated_at = now;
        }))
    }

    /// Purge then warm, in that order, for one deployment event
    pub async fn refresh(
        &self,
        site_id: &SiteId,
        files: &[DeploymentFile],
    ) -> PipelineResult<CacheStatus> {
        self.purge(site_id).await?;
        self.warm_up(site_id, files).await
    }

    /// Current counters for a site; zeroed when nothing was recorded yet
    pub fn get_status(&self, site_id: &SiteId) -> CacheStatus {
        self.statuses
            .get(site_id)
            .map(|status| status.clone())
            .unwrap_or_else(|| CacheStatus::empty(site_id.clone()))
    }

    /// Serve a path from the edge, recording a hit or a miss
    pub async fn lookup(&self, site_id: &SiteId, path: &str) -> PipelineResult<Option<CacheEntry>> {
        let entry = self.edge.get(&site_namespace(site_id), path).await?;
        match entry {
            Some(_) => {
                self.metrics.record(Metric::CacheHit);
                self.update_status(site_id, CacheStatus::record_hit);
            }
            None => {
                self.metrics.record(Metric::CacheMiss);
                self.update_status(site_id, CacheStatus::record_miss);
            }
        }
        Ok(entry)
    }
}
