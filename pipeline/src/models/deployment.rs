//! Deployment models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::build::BuildFile;
use crate::models::ids::{BuildId, DeploymentId, SiteId};
use crate::models::site::SiteConfig;

/// Deployment status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentStatus {
    Pending,
    Deploying,
    Deployed,
    Failed,
}

impl DeploymentStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, DeploymentStatus::Deployed | DeploymentStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentStatus::Pending => "pending",
            DeploymentStatus::Deploying => "deploying",
            DeploymentStatus::Deployed => "deployed",
            DeploymentStatus::Failed => "failed",
        }
    }
}

/// Manifest entry for a deployed file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentFile {
    pub path: String,
    pub content_type: String,
    pub size: u64,
    pub hash: String,

    /// Blob location the file is published from
    pub url: String,
}

impl DeploymentFile {
    /// Manifest entry for a built file; `None` until the artifact is uploaded
    pub fn from_build_file(file: &BuildFile) -> Option<Self> {
        Some(Self {
            path: file.path.clone(),
            content_type: file.content_type.clone(),
            size: file.size,
            hash: file.hash.clone(),
            url: file.url.clone()?,
        })
    }
}

/// Deployment statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentStats {
    pub total_files: usize,
    pub total_size: u64,
    pub publish_ms: u64,
    pub cache_cleared: bool,
}

/// An immutable, versioned, site-scoped artifact plus configuration snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deployment {
    pub id: DeploymentId,
    pub site_id: SiteId,
    pub build_id: BuildId,

    /// Per-site, strictly increasing, never reused
    pub version: u64,

    pub status: DeploymentStatus,
    pub files: Vec<DeploymentFile>,
    pub config: SiteConfig,
    pub stats: DeploymentStats,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl Deployment {
    pub fn new(
        site_id: SiteId,
        build_id: BuildId,
        version: u64,
        files: Vec<DeploymentFile>,
        config: SiteConfig,
    ) -> Self {
        let stats = DeploymentStats {
            total_files: files.len(),
            total_size: files.iter().map(|f| f.size).sum(),
            ..Default::default()
        };
        Self {
            id: DeploymentId::generate(),
            site_id,
            build_id,
            version,
            status: DeploymentStatus::Pending,
            files,
            config,
            stats,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            ended_at: None,
        }
    }
}
