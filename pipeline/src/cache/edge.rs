//! Edge cache adapters

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::PipelineResult;
use crate::http::HttpClient;
use crate::models::CacheEntry;

/// CDN / edge cache API
#[async_trait]
pub trait EdgeCache: Send + Sync {
    /// Drop every entry under a namespace and return how many were removed
    async fn purge(&self, namespace: &str) -> PipelineResult<usize>;

    /// Pre-populate entries under a namespace
    async fn push(&self, namespace: &str, entries: &[CacheEntry]) -> PipelineResult<()>;

    /// Look an entry up on the serving path
    async fn get(&self, namespace: &str, path: &str) -> PipelineResult<Option<CacheEntry>>;
}

/// In-memory edge cache with a global entry capacity.
///
/// When full, the oldest entry is evicted first.
pub struct MemoryEdgeCache {
    entries: RwLock<HashMap<(String, String), CacheEntry>>,
    capacity: usize,
}

impl MemoryEdgeCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    /// Paths cached under a namespace, sorted
    pub fn keys(&self, namespace: &str) -> Vec<String> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        let mut keys: Vec<_> = entries
            .keys()
            .filter(|(ns, _)| ns == namespace)
            .map(|(_, path)| path.clone())
            .collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl EdgeCache for MemoryEdgeCache {
    async fn purge(&self, namespace: &str) -> PipelineResult<usize> {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        let before = entries.len();
        entries.retain(|(ns, _), _| ns != namespace);
        Ok(before - entries.len())
    }

    async fn push(&self, namespace: &str, new_entries: &[CacheEntry]) -> PipelineResult<()> {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());

        for entry in new_entries {
            let key = (namespace.to_string(), entry.path.clone());

            // Evict oldest if at capacity
            if !entries.contains_key(&key) && entries.len() >= self.capacity {
                if let Some(oldest) = entries
                    .iter()
                    .min_by_key(|(_, e)| e.cached_at)
                    .map(|(k, _)| k.clone())
                {
                    debug!(namespace = %oldest.0, path = %oldest.1, "Evicting cache entry");
                    entries.remove(&oldest);
                }
            }

            entries.insert(key, entry.clone());
        }
        Ok(())
    }

    async fn get(&self, namespace: &str, path: &str) -> PipelineResult<Option<CacheEntry>> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        Ok(entries
            .get(&(namespace.to_string(), path.to_string()))
            .cloned())
    }
}

#[derive(Debug, Serialize)]
struct PurgeRequest<'a> {
    namespace: &'a str,
}

#[derive(Debug, Deserialize)]
struct PurgeResponse {
    #[serde(default)]
    purged: usize,
}

#[derive(Debug, Serialize)]
struct PushRequest<'a> {
    namespace: &'a str,
    files: &'a [CacheEntry],
}

#[derive(Debug, Deserialize)]
struct PushResponse {}

/// Edge cache reached through a CDN's JSON API
#[derive(Debug, Clone)]
pub struct HttpEdgeCache {
    client: HttpClient,
}

impl HttpEdgeCache {
    pub fn new(
        base_url: &str,
        api_key: Option<SecretString>,
        timeout: Duration,
    ) -> PipelineResult<Self> {
        let client = HttpClient::new(base_url, timeout)?.with_api_key(api_key);
        Ok(Self { client })
    }
}

#[async_trait]
impl EdgeCache for HttpEdgeCache {
    async fn purge(&self, namespace: &str) -> PipelineResult<usize> {
        let response: PurgeResponse = self
            .client
            .post("/purge", &PurgeRequest { namespace })
            .await?;
        Ok(response.purged)
    }

    async fn push(&self, namespace: &str, entries: &[CacheEntry]) -> PipelineResult<()> {
        let _: PushResponse = self
            .client
            .post(
                "/push",
                &PushRequest {
                    namespace,
                    files: entries,
                },
            )
            .await?;
        Ok(())
    }

    async fn get(&self, namespace: &str, path: &str) -> PipelineResult<Option<CacheEntry>> {
        self.client
            .get(&format!("/entries/{}", namespace), &[("path", path)])
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, Utc};
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn entry(path: &str, age_secs: i64) -> CacheEntry {
        CacheEntry {
            path: path.to_string(),
            content_type: "text/html".to_string(),
            size: 1,
            hash: "h".to_string(),
            url: format!("memory://{}", path),
            cached_at: Utc::now() - ChronoDuration::seconds(age_secs),
        }
    }

    #[tokio::test]
    async fn test_purge_is_scoped_to_namespace() {
        let cache = MemoryEdgeCache::new(10);
        cache.push("site:a", &[entry("index.html", 0)]).await.unwrap();
        cache.push("site:b", &[entry("index.html", 0)]).await.unwrap();

        assert_eq!(cache.purge("site:a").await.unwrap(), 1);
        assert_eq!(cache.purge("site:a").await.unwrap(), 0);
        assert!(cache.get("site:a", "index.html").await.unwrap().is_none());
        assert!(cache.get("site:b", "index.html").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_capacity_evicts_oldest() {
        let cache = MemoryEdgeCache::new(2);
        cache
            .push("site:a", &[entry("old.html", 60), entry("mid.html", 30)])
            .await
            .unwrap();
        cache.push("site:a", &[entry("new.html", 0)]).await.unwrap();

        assert_eq!(cache.len(), 2);
        assert_eq!(
            cache.keys("site:a"),
            vec!["mid.html".to_string(), "new.html".to_string()]
        );
    }

    #[tokio::test]
    async fn test_http_edge_cache_purge() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/purge"))
            .and(header("authorization", "Bearer cdn-key"))
            .and(body_partial_json(json!({ "namespace": "site:a" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "purged": 7 })))
            .expect(1)
            .mount(&server)
            .await;

        let cache = HttpEdgeCache::new(
            &server.uri(),
            Some(SecretString::from("cdn-key")),
            Duration::from_secs(5),
        )
        .unwrap();
        assert_eq!(cache.purge("site:a").await.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_http_edge_cache_push_and_get() {
        let server = MockServer::start().await;
        let index = entry("index.html", 0);
        Mock::given(method("POST"))
            .and(path("/push"))
            .and(body_partial_json(json!({
                "namespace": "site:a",
                "files": [{ "path": "index.html", "hash": "h" }],
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/entries/site:a"))
            .and(query_param("path", "index.html"))
            .respond_with(ResponseTemplate::new(200).set_body_json(&index))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/entries/site:a"))
            .and(query_param("path", "missing.html"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let cache = HttpEdgeCache::new(&server.uri(), None, Duration::from_secs(5)).unwrap();
        cache.push("site:a", &[index.clone()]).await.unwrap();
        assert_eq!(cache.get("site:a", "index.html").await.unwrap(), Some(index));
        assert!(cache.get("site:a", "missing.html").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_http_edge_cache_failure_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/purge"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;

        let cache = HttpEdgeCache::new(&server.uri(), None, Duration::from_secs(5)).unwrap();
        let err = cache.purge("site:a").await.unwrap_err();
        assert!(err.is_transient());
    }
}
