//! In-memory record store.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use crate::errors::{PipelineError, PipelineResult};
use crate::models::{
    BuildId, BuildJob, Deployment, DeploymentId, DomainId, DomainRecord, Site, SiteId,
};

use super::{
    BuildFilter, BuildStore, DeploymentFilter, DeploymentStore, DomainStore, Mutation, SiteStore,
};

type Table<T> = RwLock<HashMap<String, T>>;

/// In-memory store.
///
/// Data is lost when the process exits. Every table sits behind its own
/// lock, so a mutation is atomic with respect to other calls on the same
/// table.
#[derive(Debug, Default)]
pub struct MemoryStore {
    sites: Table<Site>,
    builds: Table<BuildJob>,
    deployments: Table<Deployment>,
    domains: Table<DomainRecord>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

// A panicked writer leaves each row whole, so a poisoned table stays usable
fn read<T>(table: &Table<T>) -> RwLockReadGuard<'_, HashMap<String, T>> {
    table.read().unwrap_or_else(|e| e.into_inner())
}

fn write<T>(table: &Table<T>) -> RwLockWriteGuard<'_, HashMap<String, T>> {
    table.write().unwrap_or_else(|e| e.into_inner())
}

fn insert<T: Clone>(table: &Table<T>, kind: &str, key: &str, value: &T) -> PipelineResult<()> {
    let mut rows = write(table);
    if rows.contains_key(key) {
        return Err(PipelineError::conflict(format!(
            "{} {} already exists",
            kind, key
        )));
    }
    rows.insert(key.to_string(), value.clone());
    Ok(())
}

/// Run the mutation on a copy and commit it only if it succeeds
fn mutate<T: Clone>(
    table: &Table<T>,
    kind: &str,
    key: &str,
    mutation: Mutation<'_, T>,
) -> PipelineResult<T> {
    let mut rows = write(table);
    let current = rows
        .get(key)
        .ok_or_else(|| PipelineError::not_found(format!("{} {}", kind, key)))?;

    let mut updated = current.clone();
    mutation(&mut updated)?;
    rows.insert(key.to_string(), updated.clone());
    Ok(updated)
}

#[async_trait]
impl SiteStore for MemoryStore {
    async fn insert_site(&self, site: &Site) -> PipelineResult<()> {
        insert(&self.sites, "site", site.id.as_str(), site)
    }

    async fn get_site(&self, id: &SiteId) -> PipelineResult<Option<Site>> {
        Ok(read(&self.sites).get(id.as_str()).cloned())
    }

    async fn update_site(&self, id: &SiteId, mutation: Mutation<'_, Site>) -> PipelineResult<Site> {
        mutate(&self.sites, "site", id.as_str(), mutation)
    }
}

#[async_trait]
impl BuildStore for MemoryStore {
    async fn insert_build(&self, job: &BuildJob) -> PipelineResult<()> {
        insert(&self.builds, "build", job.id.as_str(), job)
    }

    async fn get_build(&self, id: &BuildId) -> PipelineResult<Option<BuildJob>> {
        Ok(read(&self.builds).get(id.as_str()).cloned())
    }

    async fn update_build(
        &self,
        id: &BuildId,
        mutation: Mutation<'_, BuildJob>,
    ) -> PipelineResult<BuildJob> {
        mutate(&self.builds, "build", id.as_str(), mutation)
    }

    async fn list_builds(&self, filter: &BuildFilter) -> PipelineResult<Vec<BuildJob>> {
        let mut results: Vec<_> = read(&self.builds)
            .values()
            .filter(|job| filter.matches(&job.site_id, job.status))
            .cloned()
            .collect();

        results.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(filter.paginate(results))
    }
}

#[async_trait]
impl DeploymentStore for MemoryStore {
    async fn insert_deployment(&self, deployment: &Deployment) -> PipelineResult<()> {
        insert(
            &self.deployments,
            "deployment",
            deployment.id.as_str(),
            deployment,
        )
    }

    async fn get_deployment(&self, id: &DeploymentId) -> PipelineResult<Option<Deployment>> {
        Ok(read(&self.deployments).get(id.as_str()).cloned())
    }

    async fn update_deployment(
        &self,
        id: &DeploymentId,
        mutation: Mutation<'_, Deployment>,
    ) -> PipelineResult<Deployment> {
        mutate(&self.deployments, "deployment", id.as_str(), mutation)
    }

    async fn list_deployments(
        &self,
        filter: &DeploymentFilter,
    ) -> PipelineResult<Vec<Deployment>> {
        let mut results: Vec<_> = read(&self.deployments)
            .values()
            .filter(|d| filter.matches(&d.site_id, d.status))
            .cloned()
            .collect();

        // Versions break ties between records created in the same instant
        results.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.version.cmp(&a.version))
        });
        Ok(filter.paginate(results))
    }

    async fn max_deployment_version(&self, site_id: &SiteId) -> PipelineResult<u64> {
        Ok(read(&self.deployments)
            .values()
            .filter(|d| &d.site_id == site_id)
            .map(|d| d.version)
            .max()
            .unwrap_or(0))
    }
}

#[async_trait]
impl DomainStore for MemoryStore {
    async fn insert_domain(&self, record: &DomainRecord) -> PipelineResult<()> {
        let mut rows = write(&self.domains);
        if rows
            .values()
            .any(|existing| existing.domain.eq_ignore_ascii_case(&record.domain))
        {
            return Err(PipelineError::conflict(format!(
                "domain {} is already bound",
                record.domain
            )));
        }
        rows.insert(record.id.as_str().to_string(), record.clone());
        Ok(())
    }

    async fn get_domain(&self, id: &DomainId) -> PipelineResult<Option<DomainRecord>> {
        Ok(read(&self.domains).get(id.as_str()).cloned())
    }

    async fn update_domain(
        &self,
        id: &DomainId,
        mutation: Mutation<'_, DomainRecord>,
    ) -> PipelineResult<DomainRecord> {
        mutate(&self.domains, "domain", id.as_str(), mutation)
    }

    async fn delete_domain(&self, id: &DomainId) -> PipelineResult<Option<DomainRecord>> {
        Ok(write(&self.domains).remove(id.as_str()))
    }

    async fn list_domains(&self, site_id: &SiteId) -> PipelineResult<Vec<DomainRecord>> {
        let mut results: Vec<_> = read(&self.domains)
            .values()
            .filter(|d| &d.site_id == site_id)
            .cloned()
            .collect();
        results.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(results)
    }
}
