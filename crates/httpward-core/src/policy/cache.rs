//! TTL response cache keyed by the canonical request signature.
//!
//! Only successful responses without `no-cache`/`no-store` are stored. A
//! request carrying either directive bypasses the cache in both directions.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use http::Method;
use parking_lot::Mutex;
use tokio::time::Instant;

use crate::config::{Config, Plugin};
use crate::error::Result;
use crate::key::{signature_for, KeyFn};
use crate::request::{Request, Response};
use crate::transport::{SharedTransport, Transport};

/// A stored response and the instant it stops being served.
#[derive(Debug, Clone)]
pub(crate) struct CacheEntry {
    pub(crate) expires_at: Instant,
    pub(crate) response: Response,
}

impl CacheEntry {
    pub(crate) fn is_fresh(&self, now: Instant) -> bool {
        self.expires_at > now
    }
}

/// Returns `true` if `resp` may be stored.
pub(crate) fn is_storable(resp: &Response) -> bool {
    resp.is_success() && !resp.forbids_caching()
}

/// TTL cache configuration.
#[derive(Clone)]
pub struct CacheConfig {
    pub ttl: Duration,
    /// Methods eligible for caching.
    pub methods: Vec<Method>,
    /// Overrides the `"{METHOD} {path}{?query}"` key.
    pub key: Option<KeyFn>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(10),
            methods: vec![Method::GET, Method::HEAD],
            key: None,
        }
    }
}

impl fmt::Debug for CacheConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheConfig")
            .field("ttl", &self.ttl)
            .field("methods", &self.methods)
            .field("key", &self.key.as_ref().map(|_| "custom"))
            .finish()
    }
}

/// Transport decorator serving fresh cached responses.
pub struct CacheTransport {
    inner: SharedTransport,
    config: CacheConfig,
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl CacheTransport {
    pub fn new(inner: SharedTransport, config: CacheConfig) -> Self {
        Self {
            inner,
            config,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Number of stored entries, fresh or not yet evicted.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lookup(&self, key: &str, now: Instant) -> Option<Response> {
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(entry) if entry.is_fresh(now) => Some(entry.response.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }
}

#[async_trait]
impl Transport for CacheTransport {
    async fn send(&self, req: Request) -> Result<Response> {
        if !self.config.methods.contains(req.method()) || req.forbids_caching() {
            return self.inner.send(req).await;
        }

        let key = signature_for(&req, self.config.key.as_ref()).await;
        let now = Instant::now();
        if let Some(hit) = self.lookup(&key, now) {
            tracing::debug!(%key, "cache hit");
            return Ok(hit);
        }

        let resp = self.inner.send(req).await?;
        if is_storable(&resp) {
            self.entries.lock().insert(
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
        "cache"
    }
}

/// Wrap the configured transport in a TTL response cache.
pub fn with_cache(config: CacheConfig) -> impl Plugin {
    move |base: &Config| {
        let transport = CacheTransport::new(base.inner_transport(), config.clone());
        Config::new().with_transport(Arc::new(transport))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::key_fn;
    use crate::transport::transport_fn;
    use http::StatusCode;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn counter(hits: Arc<AtomicU32>) -> SharedTransport {
        transport_fn(move |_req| {
            let hits = hits.clone();
            async move {
                let n = hits.fetch_add(1, Ordering::SeqCst) + 1;
                Ok(Response::ok(n.to_string()))
            }
        })
    }

    fn get(url: &str) -> Request {
        Request::parse(Method::GET, url).unwrap()
    }

    async fn body(t: &CacheTransport, req: Request) -> String {
        t.send(req).await.unwrap().text().unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn caches_get_until_ttl_expires() {
        let hits = Arc::new(AtomicU32::new(0));
        let t = CacheTransport::new(
            counter(hits.clone()),
            CacheConfig {
                ttl: Duration::from_millis(300),
                ..Default::default()
            },
        );
        assert_eq!(body(&t, get("http://a.test/count")).await, "1");
        assert_eq!(body(&t, get("http://a.test/count")).await, "1");

        tokio::time::advance(Duration::from_millis(301)).await;
        assert_eq!(body(&t, get("http://a.test/count")).await, "2");
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn other_methods_always_hit_transport() {
        let hits = Arc::new(AtomicU32::new(0));
        let t = CacheTransport::new(counter(hits.clone()), CacheConfig::default());
        let post = || Request::parse(Method::POST, "http://a.test/mut").unwrap();
        assert_eq!(body(&t, post()).await, "1");
        assert_eq!(body(&t, post()).await, "2");
        assert!(t.is_empty());
    }

    #[tokio::test]
    async fn request_no_cache_bypasses() {
        let hits = Arc::new(AtomicU32::new(0));
        let t = CacheTransport::new(counter(hits.clone()), CacheConfig::default());
        let req = || {
            get("http://a.test/nocache")
                .with_header("cache-control", "no-cache")
                .unwrap()
        };
        assert_eq!(body(&t, req()).await, "1");
        assert_eq!(body(&t, req()).await, "2");
        assert!(t.is_empty());
    }

    #[tokio::test]
    async fn errors_and_no_store_responses_are_not_stored() {
        let t = CacheTransport::new(
            transport_fn(|req: Request| async move {
                if req.url().path() == "/err" {
                    Ok(Response::new(StatusCode::INTERNAL_SERVER_ERROR))
                } else {
                    Response::ok("x").with_header("cache-control", "no-store")
                }
            }),
            CacheConfig::default(),
        );
        t.send(get("http://a.test/err")).await.unwrap();
        t.send(get("http://a.test/private")).await.unwrap();
        assert!(t.is_empty());
    }

    #[tokio::test]
    async fn default_key_ignores_host_and_custom_key_overrides() {
        let hits = Arc::new(AtomicU32::new(0));
        let t = CacheTransport::new(counter(hits.clone()), CacheConfig::default());
        assert_eq!(body(&t, get("http://a.test/x?q=1")).await, "1");
        assert_eq!(body(&t, get("http://b.test/x?q=1")).await, "1");

        let hits = Arc::new(AtomicU32::new(0));
        let t = CacheTransport::new(
            counter(hits.clone()),
            CacheConfig {
                key: Some(key_fn(|r| r.url().to_string())),
                ..Default::default()
            },
        );
        assert_eq!(body(&t, get("http://a.test/x")).await, "1");
        assert_eq!(body(&t, get("http://b.test/x")).await, "2");
    }
}
