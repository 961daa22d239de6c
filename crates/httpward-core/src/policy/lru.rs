//! Bounded response cache evicting the least-recently-inserted key.
//!
//! Keyed by method plus full URL. Request cache-control is ignored; response
//! `no-cache`/`no-store` still prevents storage. Reads do not refresh recency,
//! only re-insertion does.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use http::Method;
use indexmap::IndexMap;
use parking_lot::Mutex;
use tokio::time::Instant;

use super::cache::{is_storable, CacheEntry};
use crate::config::{Config, Plugin};
use crate::error::Result;
use crate::key::full_url_signature;
use crate::request::{Request, Response};
use crate::transport::{SharedTransport, Transport};

/// LRU cache configuration.
#[derive(Debug, Clone)]
pub struct LruCacheConfig {
    /// Maximum number of stored entries.
    pub capacity: usize,
    pub ttl: Duration,
    /// Methods eligible for caching.
    pub methods: Vec<Method>,
}

impl Default for LruCacheConfig {
    fn default() -> Self {
        Self {
            capacity: 100,
            ttl: Duration::from_secs(10),
            methods: vec![Method::GET, Method::HEAD],
        }
    }
}

pub struct LruCacheTransport {
    inner: SharedTransport,
    config: LruCacheConfig,
    entries: Mutex<IndexMap<String, CacheEntry>>,
}

impl LruCacheTransport {
    pub fn new(inner: SharedTransport, config: LruCacheConfig) -> Self {
        Self {
            inner,
            entries: Mutex::new(IndexMap::with_capacity(config.capacity)),
            config,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stored keys, oldest first.
    pub fn keys(&self) -> Vec<String> {
        self.entries.lock().keys().cloned().collect()
    }

    fn lookup(&self, key: &str, now: Instant) -> Option<Response> {
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(entry) if entry.is_fresh(now) => Some(entry.response.clone()),
            Some(_) => {
                entries.shift_remove(key);
                None
            }
            None => None,
        }
    }

    fn store(&self, key: String, entry: CacheEntry) {
        let mut entries = self.entries.lock();
        entries.shift_remove(&key);
        entries.insert(key, entry);
        while entries.len() > self.config.capacity {
            if let Some((evicted, _)) = entries.shift_remove_index(0) {
                tracing::debug!(key = %evicted, "lru eviction");
            }
        }
    }
}

#[async_trait]
impl Transport for LruCacheTransport {
    async fn send(&self, req: Request) -> Result<Response> {
        if !self.config.methods.contains(req.method()) {
            return self.inner.send(req).await;
        }

        let key = full_url_signature(&req);
        let now = Instant::now();
        if let Some(hit) = self.lookup(&key, now) {
            tracing::debug!(%key, "lru cache hit");
            return Ok(hit);
        }

        let resp = self.inner.send(req).await?;
        if is_storable(&resp) {
            self.store(
                key,
                CacheEntry {
                    expires_at: now + self.config.ttl,
                    response: resp.clone(),
                },
            );
        }
        Ok(resp)
    }

    fn name(&self) -> &str {
        "lru-cache"
    }
}

/// Wrap the configured transport in a bounded LRU response cache.
pub fn with_cache_lru(config: LruCacheConfig) -> impl Plugin {
    move |base: &Config| {
        let transport = LruCacheTransport::new(base.inner_transport(), config.clone());
        Config::new().with_transport(Arc::new(transport))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::transport_fn;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn lru(capacity: usize, hits: Arc<AtomicU32>) -> LruCacheTransport {
        LruCacheTransport::new(
            transport_fn(move |_req| {
                let hits = hits.clone();
                async move {
                    let n = hits.fetch_add(1, Ordering::SeqCst) + 1;
                    Ok(Response::ok(n.to_string()))
                }
            }),
            LruCacheConfig {
                capacity,
                ..Default::default()
            },
        )
    }

    async fn fetch(t: &LruCacheTransport, url: &str) -> String {
        let req = Request::parse(Method::GET, url).unwrap();
        t.send(req).await.unwrap().text().unwrap()
    }

    #[tokio::test]
    async fn capacity_one_evicts_previous_key() {
        let hits = Arc::new(AtomicU32::new(0));
        let t = lru(1, hits.clone());
        let a = fetch(&t, "http://a.test/data?x=1").await;
        assert_eq!(fetch(&t, "http://a.test/data?x=1").await, a);

        fetch(&t, "http://a.test/data?x=2").await;
        let again = fetch(&t, "http://a.test/data?x=1").await;
        assert_eq!(again, "3");
        assert_eq!(t.len(), 1);
    }

    #[tokio::test]
    async fn evicts_oldest_insertion_not_oldest_read() {
        let hits = Arc::new(AtomicU32::new(0));
        let t = lru(2, hits);
        fetch(&t, "http://a.test/a").await;
        fetch(&t, "http://a.test/b").await;
        // Reading `a` does not refresh its position.
        fetch(&t, "http://a.test/a").await;
        fetch(&t, "http://a.test/c").await;
        assert_eq!(t.keys(), vec!["GET http://a.test/b", "GET http://a.test/c"]);
    }

    #[tokio::test]
    async fn key_includes_host_and_ignores_request_cache_control() {
        let hits = Arc::new(AtomicU32::new(0));
        let t = lru(10, hits.clone());
        fetch(&t, "http://a.test/x").await;
        fetch(&t, "http://b.test/x").await;
        assert_eq!(hits.load(Ordering::SeqCst), 2);

        let req = Request::parse(Method::GET, "http://a.test/x")
            .unwrap()
            .with_header("cache-control", "no-cache")
            .unwrap();
        assert_eq!(t.send(req).await.unwrap().text().unwrap(), "1");
    }

    #[tokio::test]
    async fn response_no_store_is_not_kept() {
        let t = LruCacheTransport::new(
            transport_fn(|_req| async {
                Response::ok("x").with_header("cache-control", "no-store")
            }),
            LruCacheConfig::default(),
        );
        assert_eq!(fetch(&t, "http://a.test/").await, "x");
        assert_eq!(fetch(&t, "http://a.test/").await, "x");
        assert!(t.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn expired_entries_are_refetched() {
        let hits = Arc::new(AtomicU32::new(0));
        let t = lru(10, hits.clone());
        fetch(&t, "http://a.test/x").await;
        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(fetch(&t, "http://a.test/x").await, "2");
    }
}
