//! Edge cache models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::deployment::DeploymentFile;
use crate::models::ids::SiteId;

/// A cached file as held by the edge
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub path: String,
    pub content_type: String,
    pub size: u64,
    pub hash: String,
    pub url: String,
    pub cached_at: DateTime<Utc>,
}

impl From<&DeploymentFile> for CacheEntry {
    fn from(file: &DeploymentFile) -> Self {
        Self {
            path: file.path.clone(),
            content_type: file.content_type.clone(),
            size: file.size,
            hash: file.hash.clone(),
            url: file.url.clone(),
            cached_at: Utc::now(),
        }
    }
}

/// Per-site cache observability counters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheStatus {
    pub site_id: SiteId,
    pub hit_rate: f64,
    pub total_hits: u64,
    pub total_misses: u64,
    /// Entries pushed by the last warm-up
    pub entries: usize,
    pub purged_at: Option<DateTime<Utc>>,
    pub warmed_at: Option<DateTime<Utc>>,
    pub last_hit_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl CacheStatus {
    pub fn empty(site_id: SiteId) -> Self {
        Self {
            site_id,
            hit_rate: 0.0,
            total_hits: 0,
            total_misses: 0,
            entries: 0,
            purged_at: None,
            warmed_at: None,
            last_hit_at: None,
            updated_at: Utc::now(),
        }
    }

    pub fn record_hit(&mut self) {
        let now = Utc::now();
        self.total_hits += 1;
        self.last_hit_at = Some(now);
        self.refresh_rate(now);
    }

    pub fn record_miss(&mut self) {
        self.total_misses += 1;
        self.refresh_rate(Utc::now());
    }

    fn refresh_rate(&mut self, now: DateTime<Utc>) {
        let total = self.total_hits + self.total_misses;
        self.hit_rate = if total > 0 {
            self.total_hits as f64 / total as f64
        } else {
            0.0
        };
        self.updated_at = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_rate() {
        let mut status = CacheStatus::empty(SiteId::new("site_1"));
        assert_eq!(status.hit_rate, 0.0);

        status.record_hit();
        status.record_hit();
        status.record_hit();
        status.record_miss();

        assert_eq!(status.total_hits, 3);
        assert_eq!(status.total_misses, 1);
        assert!((status.hit_rate - 0.75).abs() < f64::EPSILON);
        assert!(status.last_hit_at.is_some());
    }
}
