//! Entity models shared by the pipeline components

pub mod build;
pub mod cache;
pub mod deployment;
pub mod domain;
pub mod ids;
pub mod site;

pub use build::{
    BuildConfig, BuildFile, BuildJob, BuildLogEntry, BuildLogLevel, BuildOutput, BuildStats,
    BuildStatus, SourceDescriptor, SourceKind,
};
pub use cache::{CacheEntry, CacheStatus};
pub use deployment::{Deployment, DeploymentFile, DeploymentStats, DeploymentStatus};
pub use domain::{DnsRecord, DnsRecordType, DomainRecord, DomainStatus, DomainType, SslStatus};
pub use ids::{BuildId, DeploymentId, DomainId, SiteId, UserId};
pub use site::{Site, SiteConfig, SiteStatus};
