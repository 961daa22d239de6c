//! Fixed policy bundles for common deployments.

use std::time::Duration;

use crate::config::{chain, BoxPlugin, Plugin};
use crate::policy::{
    with_circuit_breaker, with_dedup, with_request_id, with_retry_smart, with_size_guard,
    with_timeout, CircuitBreakerConfig, DedupConfig, RequestIdConfig, RetryConfig,
};

/// Options for [`corporate_network`].
#[derive(Debug, Clone)]
pub struct CorporateNetworkOptions {
    /// Per-attempt timeout.
    pub timeout: Duration,
    /// Largest readable response body.
    pub max_response_bytes: usize,
    pub retry: RetryConfig,
    pub request_id: RequestIdConfig,
}

impl Default for CorporateNetworkOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_response_bytes: 10 * 1024 * 1024,
            retry: RetryConfig::default(),
            request_id: RequestIdConfig::default(),
        }
    }
}

/// Request id, attempt timeout, response size guard and smart retry.
pub fn corporate_network(opts: CorporateNetworkOptions) -> impl Plugin {
    let plugins: Vec<BoxPlugin> = vec![
        Box::new(with_request_id(opts.request_id)),
        Box::new(with_timeout(opts.timeout)),
        Box::new(with_size_guard(opts.max_response_bytes)),
        Box::new(with_retry_smart(opts.retry)),
    ];
    chain(plugins)
}

/// Options for [`resilient`].
#[derive(Debug, Clone, Default)]
pub struct ResilientOptions {
    pub request_id: RequestIdConfig,
    pub retry: RetryConfig,
    pub breaker: CircuitBreakerConfig,
    pub dedup: DedupConfig,
}

/// Request id, smart retry, circuit breaker, then dedup as the outermost
/// transport layer.
pub fn resilient(opts: ResilientOptions) -> impl Plugin {
    let plugins: Vec<BoxPlugin> = vec![
        Box::new(with_request_id(opts.request_id)),
        Box::new(with_retry_smart(opts.retry)),
        Box::new(with_circuit_breaker(opts.breaker)),
        Box::new(with_dedup(opts.dedup)),
    ];
    chain(plugins)
}
