//! Cache unit tests

use std::sync::Arc;

use sitepipe::cache::{site_namespace, CacheInvalidator, CacheOptions, EdgeCache, MemoryEdgeCache};
use sitepipe::metrics::{Metric, PipelineMetrics};
use sitepipe::models::{CacheEntry, DeploymentFile, SiteId};

fn create_test_file(site: &str, path: &str) -> DeploymentFile {
    DeploymentFile {
        path: path.to_string(),
        content_type: "text/html".to_string(),
        size: 42,
        hash: format!("hash-{}", path),
        url: format!("memory://blobs/sites/{}/v1{}", site, path),
    }
}

fn create_invalidator(capacity: usize) -> (Arc<MemoryEdgeCache>, Arc<PipelineMetrics>, CacheInvalidator) {
    let edge = Arc::new(MemoryEdgeCache::new(capacity));
    let metrics = Arc::new(PipelineMetrics::new().unwrap());
    let invalidator = CacheInvalidator::new(edge.clone(), metrics.clone(), CacheOptions::default());
    (edge, metrics, invalidator)
}

#[tokio::test]
async fn test_edge_cache_push_and_get() {
    let cache = MemoryEdgeCache::new(10);
    let entry = CacheEntry::from(&create_test_file("site_1", "/index.html"));

    cache.push("site:site_1", &[entry.clone()]).await.unwrap();

    let fetched = cache.get("site:site_1", "/index.html").await.unwrap();
    assert_eq!(fetched, Some(entry));
    assert!(cache.get("site:site_2", "/index.html").await.unwrap().is_none());
}

#[tokio::test]
async fn test_edge_cache_eviction() {
    let cache = MemoryEdgeCache::new(2);

    for path in ["/a.html", "/b.html", "/c.html"] {
        let entry = CacheEntry::from(&create_test_file("site_1", path));
        cache.push("site:site_1", &[entry]).await.unwrap();
    }

    // Oldest entry is evicted
    assert_eq!(cache.len(), 2);
    assert_eq!(
        cache.keys("site:site_1"),
        vec!["/b.html".to_string(), "/c.html".to_string()]
    );
}

#[tokio::test]
async fn test_edge_cache_repush_does_not_evict() {
    let cache = MemoryEdgeCache::new(2);
    let a = CacheEntry::from(&create_test_file("site_1", "/a.html"));
    let b = CacheEntry::from(&create_test_file("site_1", "/b.html"));

    cache.push("site:site_1", &[a.clone(), b]).await.unwrap();
    cache.push("site:site_1", &[a]).await.unwrap();

    assert_eq!(cache.len(), 2);
}

#[tokio::test]
async fn test_purge_leaves_other_sites() {
    let (edge, _, invalidator) = create_invalidator(100);
    let site_1 = SiteId::new("site_1");
    let site_2 = SiteId::new("site_2");

    invalidator
        .warm_up(&site_1, &[create_test_file("site_1", "/index.html")])
        .await
        .unwrap();
    invalidator
        .warm_up(&site_2, &[create_test_file("site_2", "/index.html")])
        .await
        .unwrap();

    invalidator.purge(&site_1).await.unwrap();

    assert!(edge.keys(&site_namespace(&site_1)).is_empty());
    assert_eq!(edge.keys(&site_namespace(&site_2)).len(), 1);
    assert!(invalidator.lookup(&site_2, "/index.html").await.unwrap().is_some());
}

#[tokio::test]
async fn test_purge_before_any_hits() {
    let (edge, metrics, invalidator) = create_invalidator(100);
    let site = SiteId::new("site_new");

    let status = invalidator.purge(&site).await.unwrap();

    assert!(edge.is_empty());
    assert_eq!(status.total_hits, 0);
    assert_eq!(status.total_misses, 0);
    assert_eq!(status.hit_rate, 0.0);
    assert!(status.purged_at.is_some());
    assert!(status.last_hit_at.is_none());
    assert_eq!(metrics.get(Metric::CachePurged), 1);
}

#[tokio::test]
async fn test_hit_rate_survives_refresh() {
    let (_, _, invalidator) = create_invalidator(100);
    let site = SiteId::new("site_1");
    let files = vec![
        create_test_file("site_1", "/index.html"),
        create_test_file("site_1", "/about.html"),
    ];

    invalidator.refresh(&site, &files).await.unwrap();
    invalidator.lookup(&site, "/index.html").await.unwrap();
    invalidator.lookup(&site, "/about.html").await.unwrap();
    invalidator.lookup(&site, "/contact.html").await.unwrap();
    invalidator.lookup(&site, "/index.html").await.unwrap();

    let status = invalidator.refresh(&site, &files[..1]).await.unwrap();
    assert_eq!(status.entries, 1);
    assert_eq!(status.total_hits, 3);
    assert_eq!(status.total_misses, 1);
    assert!((status.hit_rate - 0.75).abs() < f64::EPSILON);

    // The dropped file is gone from the edge after the refresh
    assert!(invalidator.lookup(&site, "/about.html").await.unwrap().is_none());
}
