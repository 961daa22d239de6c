//! Exponential backoff retry with jitter, driven by a `before_retry` hook.

use std::time::Duration;

use async_trait::async_trait;
use http::{Method, StatusCode};

use crate::config::{Config, Plugin, RetrySpec};
use crate::error::Result;
use crate::hooks::{BeforeRetry, Hooks, RetryAction, RetryState};

/// Configuration for the retry policy.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (not counting the first try).
    pub limit: u32,
    /// Statuses worth retrying. A failure with any other status stops the loop.
    pub statuses: Vec<StatusCode>,
    /// Maximum backoff delay (caps exponential growth and jitter).
    pub backoff_cap: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            limit: 3,
            statuses: [408, 429, 500, 502, 503, 504]
                .into_iter()
                .filter_map(|s| StatusCode::from_u16(s).ok())
                .collect(),
            backoff_cap: Duration::from_millis(2000),
        }
    }
}

/// Methods the retry policy makes eligible.
///
/// Includes POST and PATCH: a retried creation can duplicate its side effect
/// when the first response was lost after the server acted on it.
pub fn retry_methods() -> Vec<Method> {
    vec![
        Method::GET,
        Method::PUT,
        Method::HEAD,
        Method::DELETE,
        Method::OPTIONS,
        Method::TRACE,
        Method::POST,
        Method::PATCH,
    ]
}

/// Stateless backoff calculator.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// `min(cap, 2^attempt * 100ms)` for the 1-based `attempt`.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let ms = 2u64.saturating_pow(attempt).saturating_mul(100);
        Duration::from_millis(ms).min(self.config.backoff_cap)
    }

    /// Delay for `attempt` given a jitter sample in `[0, 1)`.
    pub fn delay_with(&self, attempt: u32, sample: f64) -> Duration {
        let base = self.base_delay(attempt);
        let jitter = base.mul_f64(sample.clamp(0.0, 1.0) * 0.5);
        (base + jitter).min(self.config.backoff_cap)
    }

    /// Jittered delay before the `attempt`-th retry.
    pub fn next_delay(&self, attempt: u32) -> Duration {
        self.delay_with(attempt, rand::random::<f64>())
    }

    /// Returns `true` if `status` may be retried.
    pub fn is_retryable_status(&self, status: StatusCode) -> bool {
        self.config.statuses.contains(&status)
    }
}

struct BackoffHook {
    policy: RetryPolicy,
}

#[async_trait]
impl BeforeRetry for BackoffHook {
    async fn before_retry(&self, state: &RetryState) -> Result<RetryAction> {
        if let Some(status) = state.error.status() {
            if !self.policy.is_retryable_status(status) {
                tracing::debug!(%status, "status not retryable, clearing retry budget");
                return Ok(RetryAction::Stop);
            }
        }
        let delay = self.policy.next_delay(state.retry_count);
        tracing::debug!(
            attempt = state.retry_count,
            delay_ms = delay.as_millis() as u64,
            "backing off before retry"
        );
        tokio::time::sleep(delay).await;
        Ok(RetryAction::Continue)
    }
}

/// Install the retry spec and the jittered backoff hook.
pub fn with_retry_smart(config: RetryConfig) -> impl Plugin {
    move |_: &Config| {
        let spec = RetrySpec {
            limit: config.limit,
            methods: retry_methods(),
            status_codes: config.statuses.clone(),
        };
        let hook = BackoffHook {
            policy: RetryPolicy::new(config.clone()),
        };
        Config::new()
            .with_retry(spec)
            .with_hooks(Hooks::new().on_before_retry(hook))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::Client;
    use crate::request::Response;
    use crate::transport::transport_fn;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn policy(cap_ms: u64) -> RetryPolicy {
        RetryPolicy::new(RetryConfig {
            backoff_cap: Duration::from_millis(cap_ms),
            ..Default::default()
        })
    }

    #[test]
    fn base_delay_doubles_from_200ms() {
        let p = policy(10_000);
        assert_eq!(p.base_delay(1), Duration::from_millis(200));
        assert_eq!(p.base_delay(2), Duration::from_millis(400));
        assert_eq!(p.base_delay(3), Duration::from_millis(800));
    }

    #[test]
    fn jitter_adds_at_most_half_and_respects_cap() {
        let p = policy(2000);
        assert_eq!(p.delay_with(1, 0.0), Duration::from_millis(200));
        assert_eq!(p.delay_with(1, 1.0), Duration::from_millis(300));
        // 2^4 * 100 = 1600, plus up to 800 of jitter, capped at 2000.
        assert_eq!(p.delay_with(4, 1.0), Duration::from_millis(2000));
        assert_eq!(p.delay_with(40, 0.5), Duration::from_millis(2000));
        for attempt in 1..6 {
            let d = p.next_delay(attempt);
            assert!(d >= p.base_delay(attempt) && d <= Duration::from_millis(2000));
        }
    }

    fn flaky(fail_first: u32, status: StatusCode, hits: Arc<AtomicU32>) -> Config {
        Config::new()
            .with_base_url("http://svc.test")
            .with_transport(transport_fn(move |_req| {
                let hits = hits.clone();
                async move {
                    if hits.fetch_add(1, Ordering::SeqCst) < fail_first {
                        Ok(Response::new(status).with_body("fail"))
                    } else {
                        Ok(Response::ok("ok"))
                    }
                }
            }))
    }

    #[tokio::test(start_paused = true)]
    async fn retries_until_backend_recovers() {
        let hits = Arc::new(AtomicU32::new(0));
        let client = Client::builder(flaky(2, StatusCode::SERVICE_UNAVAILABLE, hits.clone()))
            .plugin(with_retry_smart(RetryConfig::default()))
            .build();
        let started = tokio::time::Instant::now();
        assert_eq!(client.get("flaky").text().await.unwrap(), "ok");
        assert_eq!(hits.load(Ordering::SeqCst), 3);
        // Two backoffs: at least 200ms + 400ms.
        assert!(started.elapsed() >= Duration::from_millis(600));
    }

    #[tokio::test(start_paused = true)]
    async fn excluded_status_fails_without_delay() {
        let hits = Arc::new(AtomicU32::new(0));
        let client = Client::builder(flaky(10, StatusCode::BAD_REQUEST, hits.clone()))
            .plugin(with_retry_smart(RetryConfig {
                statuses: vec![StatusCode::INTERNAL_SERVER_ERROR],
                ..Default::default()
            }))
            .build();
        let started = tokio::time::Instant::now();
        let err = client.get("").send().await.unwrap_err();
        assert_eq!(err.status(), Some(StatusCode::BAD_REQUEST));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn post_is_retried_under_smart_retry() {
        // Non-idempotent methods are eligible; a lost response can duplicate
        // the side effect on the server.
        let hits = Arc::new(AtomicU32::new(0));
        let client = Client::builder(flaky(1, StatusCode::BAD_GATEWAY, hits.clone()))
            .plugin(with_retry_smart(RetryConfig::default()))
            .build();
        assert_eq!(client.post("orders").text().await.unwrap(), "ok");
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_limit() {
        let hits = Arc::new(AtomicU32::new(0));
        let client = Client::builder(flaky(100, StatusCode::GATEWAY_TIMEOUT, hits.clone()))
            .plugin(with_retry_smart(RetryConfig {
                limit: 2,
                ..Default::default()
            }))
            .build();
        assert!(client.get("x").send().await.is_err());
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }
}
