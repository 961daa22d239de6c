//! Per-scope three-state circuit breaker: Closed → Open → Half-Open.
//!
//! State transitions:
//! - `Closed` → `Open`:      consecutive failures reach `failure_threshold`
//! - `Open` → `Half-Open`:   `recovery_timeout` has elapsed; one trial call passes
//! - `Half-Open` → `Closed`: the trial call succeeds
//! - `Half-Open` → `Open`:   the trial call fails
//!
//! Each scope (the request host unless overridden) has its own entry, created
//! on first use.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use http::StatusCode;
use parking_lot::Mutex;
use tokio::time::Instant;

use crate::config::{Config, Plugin};
use crate::error::{HttpError, Result};
use crate::key::{host_scope, ScopeFn};
use crate::request::{Request, Response};
use crate::transport::{SharedTransport, Transport};

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation.
    Closed,
    /// All requests short-circuited until `recovery_timeout` elapses.
    Open,
    /// One trial request allowed to test backend health.
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half-open"),
        }
    }
}

/// What a short-circuited call produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OpenBehavior {
    /// A synthetic `503` response with body `Circuit open`.
    #[default]
    Respond,
    /// [`HttpError::CircuitOpen`].
    Reject,
}

/// Configuration for the circuit breaker.
#[derive(Clone)]
pub struct CircuitBreakerConfig {
    /// Number of consecutive failures before opening.
    pub failure_threshold: u32,
    /// How long to stay open before letting a trial call through.
    pub recovery_timeout: Duration,
    /// Response statuses counted as failures.
    pub failure_statuses: Vec<StatusCode>,
    pub open_behavior: OpenBehavior,
    /// Partitions breaker state; defaults to the request host.
    pub scope: Option<ScopeFn>,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(30),
            failure_statuses: vec![
                StatusCode::INTERNAL_SERVER_ERROR,
                StatusCode::BAD_GATEWAY,
                StatusCode::SERVICE_UNAVAILABLE,
                StatusCode::GATEWAY_TIMEOUT,
            ],
            open_behavior: OpenBehavior::default(),
            scope: None,
        }
    }
}

impl fmt::Debug for CircuitBreakerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreakerConfig")
            .field("failure_threshold", &self.failure_threshold)
            .field("recovery_timeout", &self.recovery_timeout)
            .field("failure_statuses", &self.failure_statuses)
            .field("open_behavior", &self.open_behavior)
            .field("scope", &self.scope.as_ref().map(|_| "custom"))
            .finish()
    }
}

struct ScopeEntry {
    state: CircuitState,
    failures: u32,
    next_try_at: Option<Instant>,
    trial_in_flight: bool,
}

impl ScopeEntry {
    fn closed() -> Self {
        Self {
            state: CircuitState::Closed,
            failures: 0,
            next_try_at: None,
            trial_in_flight: false,
        }
    }
}

/// Outcome of asking the breaker for admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Call may proceed; `trial` is set for the single half-open trial call.
    Allow { trial: bool },
    /// Short-circuit without calling the transport.
    Reject,
}

/// Thread-safe, per-scope circuit breaker.
#[derive(Clone)]
pub struct CircuitBreaker {
    config: Arc<CircuitBreakerConfig>,
    scopes: Arc<Mutex<HashMap<String, ScopeEntry>>>,
}

impl CircuitBreaker {
    /// Create a breaker with every scope starting `Closed`.
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config: Arc::new(config),
            scopes: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Current state of `scope`. Unknown scopes are `Closed`.
    pub fn state(&self, scope: &str) -> CircuitState {
        self.scopes
            .lock()
            .get(scope)
            .map(|e| e.state)
            .unwrap_or(CircuitState::Closed)
    }

    /// Decide whether a call for `scope` may reach the transport.
    pub fn try_acquire(&self, scope: &str) -> Admission {
        let now = Instant::now();
        let mut scopes = self.scopes.lock();
        let entry = scopes
            .entry(scope.to_string())
            .or_insert_with(ScopeEntry::closed);
        match entry.state {
            CircuitState::Closed => Admission::Allow { trial: false },
            CircuitState::Open => match entry.next_try_at {
                Some(at) if now < at => Admission::Reject,
                _ => {
                    entry.state = CircuitState::HalfOpen;
                    entry.trial_in_flight = true;
                    tracing::info!(scope, "circuit breaker → half-open");
                    Admission::Allow { trial: true }
                }
            },
            CircuitState::HalfOpen if entry.trial_in_flight => Admission::Reject,
            CircuitState::HalfOpen => {
                entry.trial_in_flight = true;
                Admission::Allow { trial: true }
            }
        }
    }

    /// Record a non-failing outcome.
    pub fn record_success(&self, scope: &str) {
        let mut scopes = self.scopes.lock();
        let entry = scopes
            .entry(scope.to_string())
            .or_insert_with(ScopeEntry::closed);
        match entry.state {
            CircuitState::HalfOpen => {
                *entry = ScopeEntry::closed();
                tracing::info!(scope, "circuit breaker → closed");
            }
            CircuitState::Closed => entry.failures = 0,
            // A call admitted before the breaker opened; the open window stands.
            CircuitState::Open => {}
        }
    }

    /// Record a failing outcome.
    pub fn record_failure(&self, scope: &str) {
        let mut scopes = self.scopes.lock();
        let entry = scopes
            .entry(scope.to_string())
            .or_insert_with(ScopeEntry::closed);
        entry.failures = entry.failures.saturating_add(1);
        // A late failure from a call admitted before the breaker opened; the
        // recovery window keeps counting from the original transition.
        if entry.state == CircuitState::Open {
            return;
        }
        let tripped = entry.state == CircuitState::HalfOpen
            || entry.failures >= self.config.failure_threshold;
        if tripped {
            entry.state = CircuitState::Open;
            entry.next_try_at = Some(Instant::now() + self.config.recovery_timeout);
            entry.trial_in_flight = false;
            tracing::warn!(
                scope,
                failures = entry.failures,
                recovery_ms = self.config.recovery_timeout.as_millis() as u64,
                "circuit breaker → open"
            );
        }
    }

    /// Returns `true` if `outcome` counts against the breaker.
    pub fn is_failure(&self, outcome: &Result<Response>) -> bool {
        match outcome {
            Ok(resp) => self.config.failure_statuses.contains(&resp.status()),
            Err(e) => !e.is_policy_error(),
        }
    }

    fn release_trial(&self, scope: &str) {
        if let Some(entry) = self.scopes.lock().get_mut(scope) {
            entry.trial_in_flight = false;
        }
    }
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("scopes", &self.scopes.lock().len())
            .finish()
    }
}

/// Frees the half-open slot if the trial call is dropped before it settles.
struct TrialGuard<'a> {
    breaker: &'a CircuitBreaker,
    scope: &'a str,
    armed: bool,
}

impl Drop for TrialGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.breaker.release_trial(self.scope);
        }
    }
}

/// Transport decorator consulting a [`CircuitBreaker`] around every call.
pub struct CircuitBreakerTransport {
    inner: SharedTransport,
    breaker: CircuitBreaker,
    scope: ScopeFn,
}

impl CircuitBreakerTransport {
    pub fn new(inner: SharedTransport, breaker: CircuitBreaker) -> Self {
        let scope = breaker.config.scope.clone().unwrap_or_else(host_scope);
        Self {
            inner,
            breaker,
            scope,
        }
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    fn short_circuit(&self, scope: &str) -> Result<Response> {
        tracing::debug!(scope, "circuit open, short-circuiting");
        match self.breaker.config.open_behavior {
            OpenBehavior::Respond => Ok(Response::new(StatusCode::SERVICE_UNAVAILABLE)
                .with_body("Circuit open")
                .mark_short_circuit()),
            OpenBehavior::Reject => Err(HttpError::CircuitOpen {
                scope: scope.to_string(),
            }),
        }
    }
}

#[async_trait]
impl Transport for CircuitBreakerTransport {
    async fn send(&self, req: Request) -> Result<Response> {
        let scope = (self.scope)(&req);
        let trial = match self.breaker.try_acquire(&scope) {
            Admission::Reject => return self.short_circuit(&scope),
            Admission::Allow { trial } => trial,
        };
        let mut guard = TrialGuard {
            breaker: &self.breaker,
            scope: &scope,
            armed: trial,
        };

        let outcome = self.inner.send(req).await;
        if self.breaker.is_failure(&outcome) {
            self.breaker.record_failure(&scope);
        } else {
            self.breaker.record_success(&scope);
        }
        guard.armed = false;
        outcome
    }

    fn name(&self) -> &str {
        "circuit-breaker"
    }
}

/// Wrap the configured transport in a per-scope circuit breaker.
pub fn with_circuit_breaker(config: CircuitBreakerConfig) -> impl Plugin {
    move |base: &Config| {
        let breaker = CircuitBreaker::new(config.clone());
        let transport = CircuitBreakerTransport::new(base.inner_transport(), breaker);
        Config::new().with_transport(Arc::new(transport))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::Deadline;
    use crate::transport::transport_fn;
    use http::Method;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn cb(threshold: u32) -> CircuitBreaker {
        CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: threshold,
            recovery_timeout: Duration::from_secs(60),
            ..Default::default()
        })
    }

    #[test]
    fn starts_closed() {
        let c = cb(5);
        assert_eq!(c.state("a"), CircuitState::Closed);
        assert_eq!(c.try_acquire("a"), Admission::Allow { trial: false });
    }

    #[tokio::test(start_paused = true)]
    async fn opens_after_threshold_failures() {
        let c = cb(3);
        c.record_failure("a");
        c.record_failure("a");
        assert_eq!(c.state("a"), CircuitState::Closed);
        c.record_failure("a");
        assert_eq!(c.state("a"), CircuitState::Open);
        assert_eq!(c.try_acquire("a"), Admission::Reject);
        // Other scopes are unaffected.
        assert_eq!(c.try_acquire("b"), Admission::Allow { trial: false });
    }

    #[tokio::test(start_paused = true)]
    async fn success_resets_failure_count() {
        let c = cb(3);
        c.record_failure("a");
        c.record_failure("a");
        c.record_success("a");
        c.record_failure("a");
        c.record_failure("a");
        assert_eq!(c.state("a"), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn half_open_admits_single_trial() {
        let c = cb(1);
        c.record_failure("a");
        tokio::time::advance(Duration::from_secs(61)).await;

        assert_eq!(c.try_acquire("a"), Admission::Allow { trial: true });
        assert_eq!(c.state("a"), CircuitState::HalfOpen);
        assert_eq!(c.try_acquire("a"), Admission::Reject);

        c.record_success("a");
        assert_eq!(c.state("a"), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_trial_reopens() {
        let c = cb(1);
        c.record_failure("a");
        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(c.try_acquire("a"), Admission::Allow { trial: true });

        c.record_failure("a");
        assert_eq!(c.state("a"), CircuitState::Open);
        assert_eq!(c.try_acquire("a"), Admission::Reject);
    }

    #[tokio::test(start_paused = true)]
    async fn late_failure_keeps_the_recovery_window() {
        let c = cb(1);
        c.record_failure("a");
        tokio::time::advance(Duration::from_secs(40)).await;
        c.record_failure("a");
        assert_eq!(c.state("a"), CircuitState::Open);

        tokio::time::advance(Duration::from_secs(21)).await;
        assert_eq!(c.try_acquire("a"), Admission::Allow { trial: true });
    }

    #[tokio::test(start_paused = true)]
    async fn timed_out_calls_open_the_breaker() {
        let hits = Arc::new(AtomicU32::new(0));
        let seen = hits.clone();
        let hanging = transport_fn(move |_req| {
            seen.fetch_add(1, Ordering::SeqCst);
            async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(Response::ok("late"))
            }
        });
        let base = Config::new().with_transport(hanging);
        let breaker = cb(2);
        let t = CircuitBreakerTransport::new(base.inner_transport(), breaker.clone());

        for _ in 0..2 {
            let mut req = Request::parse(Method::GET, "http://svc.test/x").unwrap();
            req.set_deadline(Some(Deadline::after(Duration::from_millis(10))));
            let err = t.send(req).await.unwrap_err();
            assert!(matches!(err, HttpError::Timeout { ms: 10 }));
        }
        assert_eq!(breaker.state("svc.test"), CircuitState::Open);

        let req = Request::parse(Method::GET, "http://svc.test/x").unwrap();
        assert!(t.send(req).await.unwrap().is_short_circuit());
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn policy_errors_are_not_failures() {
        let c = cb(1);
        assert!(c.is_failure(&Err(HttpError::Network("reset".into()))));
        assert!(!c.is_failure(&Err(HttpError::BodyTooLarge { limit: 1 })));
        assert!(c.is_failure(&Ok(Response::new(StatusCode::BAD_GATEWAY))));
        assert!(!c.is_failure(&Ok(Response::new(StatusCode::NOT_FOUND))));
    }

    fn failing(hits: Arc<AtomicU32>) -> SharedTransport {
        transport_fn(move |_req| {
            let hits = hits.clone();
            async move {
                hits.fetch_add(1, Ordering::SeqCst);
                Ok(Response::new(StatusCode::SERVICE_UNAVAILABLE))
            }
        })
    }

    #[tokio::test(start_paused = true)]
    async fn open_circuit_responds_without_calling_transport() {
        let hits = Arc::new(AtomicU32::new(0));
        let t = CircuitBreakerTransport::new(failing(hits.clone()), cb(2));
        let req = Request::parse(Method::GET, "http://svc.test/x").unwrap();

        t.send(req.clone()).await.unwrap();
        t.send(req.clone()).await.unwrap();
        let resp = t.send(req).await.unwrap();

        assert_eq!(hits.load(Ordering::SeqCst), 2);
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(resp.is_short_circuit());
        assert_eq!(resp.text().unwrap(), "Circuit open");
    }

    #[tokio::test(start_paused = true)]
    async fn reject_behavior_returns_circuit_open() {
        let hits = Arc::new(AtomicU32::new(0));
        let breaker = CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 1,
            open_behavior: OpenBehavior::Reject,
            ..Default::default()
        });
        let t = CircuitBreakerTransport::new(failing(hits), breaker);
        let req = Request::parse(Method::GET, "http://svc.test/x").unwrap();
        t.send(req.clone()).await.unwrap();
        let err = t.send(req).await.unwrap_err();
        assert!(matches!(err, HttpError::CircuitOpen { scope } if scope == "svc.test"));
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_trial_frees_the_slot() {
        let slow = transport_fn(|_req| async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(Response::ok("late"))
        });
        let breaker = cb(1);
        breaker.record_failure("svc.test");
        tokio::time::advance(Duration::from_secs(61)).await;

        let t = CircuitBreakerTransport::new(slow, breaker.clone());
        let req = Request::parse(Method::GET, "http://svc.test/x").unwrap();
        let attempt = tokio::time::timeout(Duration::from_millis(5), t.send(req)).await;
        assert!(attempt.is_err());

        assert_eq!(breaker.state("svc.test"), CircuitState::HalfOpen);
        assert_eq!(breaker.try_acquire("svc.test"), Admission::Allow { trial: true });
    }
}
