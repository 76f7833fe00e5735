//! Record storage for sites, builds, deployments and domains.
//!
//! The pipeline talks to storage only through these traits. Updates are
//! expressed as mutations that run against a copy of the stored record and
//! are committed only when the mutation succeeds, so a rejected lifecycle
//! transition never leaves a half-applied record behind.

mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;

use crate::errors::PipelineResult;
use crate::models::{
    BuildId, BuildJob, BuildStatus, Deployment, DeploymentId, DeploymentStatus, DomainId,
    DomainRecord, Site, SiteId,
};

/// A fallible, single-shot update applied to a stored record
pub type Mutation<'a, T> = Box<dyn FnOnce(&mut T) -> PipelineResult<()> + Send + 'a>;

/// Filter criteria for listing builds or deployments.
#[derive(Debug, Clone)]
pub struct ListFilter<S> {
    /// Filter by site.
    pub site_id: Option<SiteId>,
    /// Filter by lifecycle status.
    pub status: Option<S>,
    /// Maximum number of results.
    pub limit: Option<usize>,
    /// Offset for pagination.
    pub offset: Option<usize>,
}

pub type BuildFilter = ListFilter<BuildStatus>;
pub type DeploymentFilter = ListFilter<DeploymentStatus>;

impl<S> Default for ListFilter<S> {
    fn default() -> Self {
        Self {
            site_id: None,
            status: None,
            limit: None,
            offset: None,
        }
    }
}

impl<S: Copy + PartialEq> ListFilter<S> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_site(mut self, site_id: SiteId) -> Self {
        self.site_id = Some(site_id);
        self
    }

    #[must_use]
    pub fn with_status(mut self, status: S) -> Self {
        self.status = Some(status);
        self
    }

    #[must_use]
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    #[must_use]
    pub fn with_offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }

    pub(crate) fn matches(&self, site_id: &SiteId, status: S) -> bool {
        if let Some(ref wanted) = self.site_id {
            if wanted != site_id {
                return false;
            }
        }
        if let Some(wanted) = self.status {
            if wanted != status {
                return false;
            }
        }
        true
    }

    pub(crate) fn paginate<T>(&self, items: Vec<T>) -> Vec<T> {
        let offset = self.offset.unwrap_or(0);
        let limit = self.limit.unwrap_or(usize::MAX);
        items.into_iter().skip(offset).take(limit).collect()
    }
}

#[async_trait]
pub trait SiteStore: Send + Sync {
    /// Insert a new site. Fails with a conflict if the id exists.
    async fn insert_site(&self, site: &Site) -> PipelineResult<()>;

    async fn get_site(&self, id: &SiteId) -> PipelineResult<Option<Site>>;

    /// Apply a mutation and return the committed record.
    async fn update_site(&self, id: &SiteId, mutation: Mutation<'_, Site>) -> PipelineResult<Site>;
}

#[async_trait]
pub trait BuildStore: Send + Sync {
    async fn insert_build(&self, job: &BuildJob) -> PipelineResult<()>;

    async fn get_build(&self, id: &BuildId) -> PipelineResult<Option<BuildJob>>;

    async fn update_build(
        &self,
        id: &BuildId,
        mutation: Mutation<'_, BuildJob>,
    ) -> PipelineResult<BuildJob>;

    /// Results are ordered by `created_at` descending (newest first).
    async fn list_builds(&self, filter: &BuildFilter) -> PipelineResult<Vec<BuildJob>>;
}

#[async_trait]
pub trait DeploymentStore: Send + Sync {
    async fn insert_deployment(&self, deployment: &Deployment) -> PipelineResult<()>;

    async fn get_deployment(&self, id: &DeploymentId) -> PipelineResult<Option<Deployment>>;

    async fn update_deployment(
        &self,
        id: &DeploymentId,
        mutation: Mutation<'_, Deployment>,
    ) -> PipelineResult<Deployment>;

    /// Results are ordered by `created_at` descending (newest first).
    async fn list_deployments(&self, filter: &DeploymentFilter)
        -> PipelineResult<Vec<Deployment>>;

    /// Highest version allocated for a site, 0 when it has none.
    async fn max_deployment_version(&self, site_id: &SiteId) -> PipelineResult<u64>;
}

#[async_trait]
pub trait DomainStore: Send + Sync {
    /// Insert a domain. Fails with a conflict when the domain name is
    /// already bound, compared case-insensitively.
    async fn insert_domain(&self, record: &DomainRecord) -> PipelineResult<()>;

    async fn get_domain(&self, id: &DomainId) -> PipelineResult<Option<DomainRecord>>;

    async fn update_domain(
        &self,
        id: &DomainId,
        mutation: Mutation<'_, DomainRecord>,
    ) -> PipelineResult<DomainRecord>;

    /// Remove and return a domain.
    async fn delete_domain(&self, id: &DomainId) -> PipelineResult<Option<DomainRecord>>;

    async fn list_domains(&self, site_id: &SiteId) -> PipelineResult<Vec<DomainRecord>>;
}

/// Everything the pipeline persists
pub trait PipelineStore: SiteStore + BuildStore + DeploymentStore + DomainStore {}

impl<T> PipelineStore for T where T: SiteStore + BuildStore + DeploymentStore + DomainStore {}
