//! Coalesces concurrent identical requests into one transport call.
//!
//! The first caller for a key registers a shared future; callers arriving
//! while it is pending await the same future and receive a clone of its
//! outcome. The registration is removed when the call settles.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt, Shared};
use http::Method;
use parking_lot::Mutex;

use crate::config::{Config, Plugin};
use crate::error::Result;
use crate::key::{signature_for, KeyFn};
use crate::request::{Request, Response};
use crate::transport::{SharedTransport, Transport};

type SharedCall = Shared<BoxFuture<'static, Result<Response>>>;

/// Dedup configuration.
#[derive(Clone)]
pub struct DedupConfig {
    /// Methods eligible for coalescing.
    pub methods: Vec<Method>,
    /// Overrides the `"{METHOD} {path}{?query}"` key.
    pub key: Option<KeyFn>,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            methods: vec![Method::GET, Method::HEAD],
            key: None,
        }
    }
}

impl fmt::Debug for DedupConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DedupConfig")
            .field("methods", &self.methods)
            .field("key", &self.key.as_ref().map(|_| "custom"))
            .finish()
    }
}

struct InFlight {
    id: u64,
    call: SharedCall,
}

type InFlightMap = Arc<Mutex<HashMap<String, InFlight>>>;

pub struct DedupTransport {
    inner: SharedTransport,
    config: DedupConfig,
    in_flight: InFlightMap,
    next_id: AtomicU64,
}

impl DedupTransport {
    pub fn new(inner: SharedTransport, config: DedupConfig) -> Self {
        Self {
            inner,
            config,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(0),
        }
    }

    /// Number of keys with a pending call.
    pub fn in_flight(&self) -> usize {
        self.in_flight.lock().len()
    }

    fn register(
        &self,
        pending: &mut HashMap<String, InFlight>,
        key: String,
        req: Request,
    ) -> SharedCall {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let inner = self.inner.clone();
        let map = self.in_flight.clone();
        let settle_key = key.clone();
        let call = async move {
            let outcome = inner.send(req).await;
            let mut map = map.lock();
            // Only remove our own registration.
            if map.get(&settle_key).map(|e| e.id) == Some(id) {
                map.remove(&settle_key);
            }
            outcome
        }
        .boxed()
        .shared();
        pending.insert(
            key,
            InFlight {
                id,
                call: call.clone(),
            },
        );
        call
    }
}

#[async_trait]
impl Transport for DedupTransport {
    async fn send(&self, req: Request) -> Result<Response> {
        if !self.config.methods.contains(req.method()) {
            return self.inner.send(req).await;
        }

        let key = signature_for(&req, self.config.key.as_ref()).await;
        let call = {
            let mut map = self.in_flight.lock();
            match map.get(&key) {
                Some(pending) => {
                    tracing::debug!(%key, "joining in-flight request");
                    pending.call.clone()
                }
                None => self.register(&mut map, key, req),
            }
        };
        call.await
    }

    fn name(&self) -> &str {
        "dedup"
    }
}

/// Wrap the configured transport so concurrent identical requests share one
/// call.
pub fn with_dedup(config: DedupConfig) -> impl Plugin {
    move |base: &Config| {
        let transport = DedupTransport::new(base.inner_transport(), config.clone());
        Config::new().with_transport(Arc::new(transport))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HttpError;
    use crate::transport::transport_fn;
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    fn slow_counter(hits: Arc<AtomicU32>) -> SharedTransport {
        transport_fn(move |_req| {
            let hits = hits.clone();
            async move {
                let n = hits.fetch_add(1, Ordering::SeqCst) + 1;
                tokio::time::sleep(Duration::from_millis(20)).await;
                Ok(Response::ok(n.to_string()))
            }
        })
    }

    fn get(path: &str) -> Request {
        Request::parse(Method::GET, &format!("http://a.test{path}")).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_requests_share_one_call() {
        let hits = Arc::new(AtomicU32::new(0));
        let t = DedupTransport::new(slow_counter(hits.clone()), DedupConfig::default());
        let (a, b) = tokio::join!(t.send(get("/once")), t.send(get("/once")));
        assert_eq!(a.unwrap().text().unwrap(), "1");
        assert_eq!(b.unwrap().text().unwrap(), "1");
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(t.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn sequential_requests_each_call_through() {
        let hits = Arc::new(AtomicU32::new(0));
        let t = DedupTransport::new(slow_counter(hits.clone()), DedupConfig::default());
        assert_eq!(t.send(get("/once")).await.unwrap().text().unwrap(), "1");
        assert_eq!(t.send(get("/once")).await.unwrap().text().unwrap(), "2");
    }

    #[tokio::test(start_paused = true)]
    async fn different_keys_and_methods_are_not_coalesced() {
        let hits = Arc::new(AtomicU32::new(0));
        let t = DedupTransport::new(slow_counter(hits.clone()), DedupConfig::default());
        let post = Request::parse(Method::POST, "http://a.test/once").unwrap();
        let post2 = post.clone();
        let _ = tokio::join!(
            t.send(get("/a")),
            t.send(get("/b")),
            t.send(post),
            t.send(post2)
        );
        assert_eq!(hits.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn failures_are_shared_and_cleared() {
        let hits = Arc::new(AtomicU32::new(0));
        let counter = hits.clone();
        let t = DedupTransport::new(
            transport_fn(move |_req| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    Err(HttpError::Network("refused".into()))
                }
            }),
            DedupConfig::default(),
        );
        let (a, b) = tokio::join!(t.send(get("/x")), t.send(get("/x")));
        assert!(matches!(a, Err(HttpError::Network(_))));
        assert!(matches!(b, Err(HttpError::Network(_))));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(t.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn abandoned_call_is_driven_by_next_joiner() {
        let hits = Arc::new(AtomicU32::new(0));
        let t = DedupTransport::new(slow_counter(hits.clone()), DedupConfig::default());
        let abandoned = tokio::time::timeout(Duration::from_millis(5), t.send(get("/x"))).await;
        assert!(abandoned.is_err());
        assert_eq!(t.in_flight(), 1);

        assert_eq!(t.send(get("/x")).await.unwrap().text().unwrap(), "1");
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(t.in_flight(), 0);
    }
}
