//! Policy engine: composable plugins for HTTP reliability.
//!
//! Hook policies append lifecycle handlers; wrapping policies decorate the
//! transport. With `create_client(base, [auth, retry, breaker, cache])` the
//! call path is:
//! ```text
//! before_request(auth) → [Cache] → [CircuitBreaker] → [Transport]
//!                     ← after_response(auth) ← retry loop(before_retry)
//! ```

pub mod auth;
pub mod cache;
pub mod circuit_breaker;
pub mod dedup;
pub mod guard;
pub mod limits;
pub mod lru;
pub mod observability;
pub mod otel;
pub mod rate_limiter;
pub mod redaction;
pub mod request_id;
pub mod retry;

pub use auth::{with_auth, AuthConfig};
pub use cache::{with_cache, CacheConfig, CacheTransport};
pub use circuit_breaker::{
    with_circuit_breaker, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerTransport,
    CircuitState, OpenBehavior,
};
pub use dedup::{with_dedup, DedupConfig, DedupTransport};
pub use guard::{with_policy, RequestPolicyConfig, SigningConfig};
pub use limits::{with_size_guard, with_timeout, SizeGuardTransport};
pub use lru::{with_cache_lru, LruCacheConfig, LruCacheTransport};
pub use observability::{with_observability, ObservabilityConfig, ObservedEvent};
pub use otel::{with_otel, NoopTracer, OtelConfig, Span, Tracer, TracingTracer};
pub use rate_limiter::{
    with_rate_limiter, Permit, RateLimitTransport, RateLimiter, RateLimiterConfig,
};
pub use redaction::{default_redactor, with_redaction, RedactionConfig, Redactor, RequestSummary};
pub use request_id::{with_request_id, RequestIdConfig};
pub use retry::{with_retry_smart, RetryConfig, RetryPolicy};
