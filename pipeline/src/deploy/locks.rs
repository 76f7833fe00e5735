//! Per-site mutual exclusion

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::models::SiteId;

/// An arena of async locks, one per site.
///
/// Holders for different sites never contend with each other.
#[derive(Debug, Default)]
pub struct SiteLocks {
    locks: DashMap<SiteId, Arc<Mutex<()>>>,
}

impl SiteLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to a site
    pub async fn lock(&self, site_id: &SiteId) -> OwnedMutexGuard<()> {
        // Clone the Arc out so the map shard is not held across the await
        let lock = self.locks.entry(site_id.clone()).or_default().clone();
        lock.lock_owned().await
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}
