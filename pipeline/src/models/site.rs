//! Site models

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::ids::{BuildId, SiteId, UserId};

/// Lifecycle status of a hosted site
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SiteStatus {
    Pending,
    Active,
    Suspended,
    Building,
    Error,
}

/// Redirect rule served at the edge
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedirectRule {
    pub from: String,
    pub to: String,
    /// HTTP status code (301, 302, ...)
    pub status: u16,
}

/// Site configuration snapshot, captured per deployment
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SiteConfig {
    pub theme: Option<String>,
    pub custom_css: Option<String>,
    pub seo_title: Option<String>,
    pub seo_description: Option<String>,
    pub headers: BTreeMap<String, String>,
    pub error_pages: BTreeMap<String, String>,
    pub redirect_rules: Vec<RedirectRule>,
    pub maintenance_mode: bool,
}

/// A hosted site and its live pointer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Site {
    pub id: SiteId,
    pub owner_id: UserId,
    pub status: SiteStatus,

    /// Live deployment version, 0 until the first promotion
    pub version: u64,

    /// Build backing the live version
    pub build_id: Option<BuildId>,

    pub config: SiteConfig,
    pub last_deploy: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Site {
    /// A freshly registered site with nothing live yet
    pub fn new(owner_id: UserId, config: SiteConfig) -> Self {
        let now = Utc::now();
        Self {
            id: SiteId::generate(),
            owner_id,
            status: SiteStatus::Pending,
            version: 0,
            build_id: None,
            config,
            last_deploy: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_owned_by(&self, user_id: &UserId) -> bool {
        &self.owner_id == user_id
    }

    /// Point the site at a new live version
    pub fn promote(&mut self, build_id: BuildId, version: u64, config: SiteConfig) {
        let now = Utc::now();
        self.build_id = Some(build_id);
        self.version = version;
        self.config = config;
        self.status = SiteStatus::Active;
        self.last_deploy = Some(now);
        self.updated_at = now;
    }
}
