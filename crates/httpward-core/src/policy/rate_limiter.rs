//! Per-scope token bucket rate limiter with a FIFO wait queue.
//!
//! Tokens accrue lazily at `refill_per_second` up to `capacity`. A call
//! consumes one token or, when the bucket is empty, queues until a finishing
//! call hands its slot over. A finishing call with nobody waiting returns one
//! token to the bucket.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::config::{Config, Plugin};
use crate::error::Result;
use crate::key::{host_scope, ScopeFn};
use crate::request::{Request, Response};
use crate::transport::{SharedTransport, Transport};

/// Rate limiter configuration.
#[derive(Clone)]
pub struct RateLimiterConfig {
    /// Maximum tokens in each bucket.
    pub capacity: f64,
    /// Token refill rate (tokens per second).
    pub refill_per_second: f64,
    /// Partitions buckets; defaults to the request host.
    pub scope: Option<ScopeFn>,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            capacity: 10.0,
            refill_per_second: 10.0,
            scope: None,
        }
    }
}

impl fmt::Debug for RateLimiterConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimiterConfig")
            .field("capacity", &self.capacity)
            .field("refill_per_second", &self.refill_per_second)
            .field("scope", &self.scope.as_ref().map(|_| "custom"))
            .finish()
    }
}

struct Bucket {
    tokens: f64,
    last_refill: Instant,
    waiters: VecDeque<oneshot::Sender<()>>,
}

impl Bucket {
    fn full(capacity: f64) -> Self {
        Self {
            tokens: capacity,
            last_refill: Instant::now(),
            waiters: VecDeque::new(),
        }
    }

    fn refill(&mut self, config: &RateLimiterConfig) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * config.refill_per_second).min(config.capacity);
        self.last_refill = now;
    }
}

/// Thread-safe, per-scope token buckets.
#[derive(Clone)]
pub struct RateLimiter {
    config: Arc<RateLimiterConfig>,
    buckets: Arc<Mutex<HashMap<String, Bucket>>>,
}

impl RateLimiter {
    pub fn new(config: RateLimiterConfig) -> Self {
        Self {
            config: Arc::new(config),
            buckets: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Wait for a slot in `scope`. The slot is returned when the [`Permit`]
    /// drops.
    pub async fn acquire(&self, scope: &str) -> Permit {
        loop {
            let rx = {
                let mut buckets = self.buckets.lock();
                let bucket = buckets
                    .entry(scope.to_string())
                    .or_insert_with(|| Bucket::full(self.config.capacity));
                bucket.refill(&self.config);
                if bucket.tokens >= 1.0 {
                    bucket.tokens -= 1.0;
                    return self.permit(scope);
                }
                let (tx, rx) = oneshot::channel();
                bucket.waiters.push_back(tx);
                tracing::debug!(scope, queued = bucket.waiters.len(), "rate limited, queueing");
                rx
            };

            let mut waiting = Waiting {
                limiter: self,
                scope,
                rx,
                settled: false,
            };
            let handed = (&mut waiting.rx).await;
            waiting.settled = true;
            if handed.is_ok() {
                return self.permit(scope);
            }
        }
    }

    /// Tokens currently available in `scope` (after a lazy refill).
    pub fn available(&self, scope: &str) -> f64 {
        let mut buckets = self.buckets.lock();
        match buckets.get_mut(scope) {
            Some(bucket) => {
                bucket.refill(&self.config);
                bucket.tokens
            }
            None => self.config.capacity,
        }
    }

    /// Number of callers queued in `scope`, including abandoned ones not yet
    /// skipped.
    pub fn queued(&self, scope: &str) -> usize {
        self.buckets
            .lock()
            .get(scope)
            .map(|b| b.waiters.len())
            .unwrap_or(0)
    }

    fn permit(&self, scope: &str) -> Permit {
        Permit {
            limiter: self.clone(),
            scope: scope.to_string(),
        }
    }

    fn release(&self, scope: &str) {
        let mut buckets = self.buckets.lock();
        let Some(bucket) = buckets.get_mut(scope) else {
            return;
        };
        while let Some(waiter) = bucket.waiters.pop_front() {
            if waiter.send(()).is_ok() {
                return;
            }
        }
        bucket.refill(&self.config);
        bucket.tokens = (bucket.tokens + 1.0).min(self.config.capacity);
    }
}

impl fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimiter")
            .field("config", &self.config)
            .field("scopes", &self.buckets.lock().len())
            .finish()
    }
}

/// A held rate-limit slot. Dropping it releases the slot.
pub struct Permit {
    limiter: RateLimiter,
    scope: String,
}

impl Drop for Permit {
    fn drop(&mut self) {
        self.limiter.release(&self.scope);
    }
}

impl fmt::Debug for Permit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Permit").field("scope", &self.scope).finish()
    }
}

/// A queued caller. If dropped after a slot was handed over but before it
/// was claimed, the slot is passed on.
struct Waiting<'a> {
    limiter: &'a RateLimiter,
    scope: &'a str,
    rx: oneshot::Receiver<()>,
    settled: bool,
}

impl Drop for Waiting<'_> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        self.rx.close();
        if self.rx.try_recv().is_ok() {
            self.limiter.release(self.scope);
        }
    }
}

/// Transport decorator holding a [`Permit`] for the duration of each call.
pub struct RateLimitTransport {
    inner: SharedTransport,
    limiter: RateLimiter,
    scope: ScopeFn,
}

impl RateLimitTransport {
    pub fn new(inner: SharedTransport, limiter: RateLimiter) -> Self {
        let scope = limiter.config.scope.clone().unwrap_or_else(host_scope);
        Self {
            inner,
            limiter,
            scope,
        }
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }
}

#[async_trait]
impl Transport for RateLimitTransport {
    async fn send(&self, req: Request) -> Result<Response> {
        let scope = (self.scope)(&req);
        let _permit = self.limiter.acquire(&scope).await;
        self.inner.send(req).await
    }

    fn name(&self) -> &str {
        "rate-limiter"
    }
}

/// Wrap the configured transport in a per-scope token bucket.
pub fn with_rate_limiter(config: RateLimiterConfig) -> impl Plugin {
    move |base: &Config| {
        let limiter = RateLimiter::new(config.clone());
        let transport = RateLimitTransport::new(base.inner_transport(), limiter);
        Config::new().with_transport(Arc::new(transport))
    }
}
