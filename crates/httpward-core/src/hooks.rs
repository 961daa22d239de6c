//! Lifecycle hooks and the append-only hook lists carried by a [`Config`].
//!
//! Four fixed points are exposed:
//!
//! ```text
//! before_request → [transport] → after_response → (error?) → before_retry → ...
//!                                                          ↘ before_error → caller
//! ```
//!
//! Handlers run in registration order. Merging two hook sets concatenates
//! each list base-then-patch, so earlier handlers are never reordered.
//!
//! [`Config`]: crate::config::Config

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::client::{Client, RequestOptions};
use crate::error::{HttpError, Result};
use crate::request::{Request, Response};

/// Runs before every attempt; may mutate the outgoing request.
#[async_trait]
pub trait BeforeRequest: Send + Sync {
    async fn before_request(&self, req: &mut Request) -> Result<()>;
}

/// Runs after the transport answered; may replace the response.
#[async_trait]
pub trait AfterResponse: Send + Sync {
    async fn after_response(
        &self,
        ctx: &HookContext,
        req: &Request,
        res: Response,
    ) -> Result<Response>;
}

/// What the executor should do after a `before_retry` handler ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryAction {
    /// Proceed with the retry (after any delay the handler awaited).
    Continue,
    /// Zero the remaining retry budget and surface the current error.
    Stop,
}

/// Snapshot handed to `before_retry` handlers.
#[derive(Debug)]
pub struct RetryState {
    /// The request as built before any `before_request` handler ran.
    pub request: Request,
    /// The error that triggered the retry.
    pub error: HttpError,
    /// 1-based number of the retry about to be dispatched.
    pub retry_count: u32,
}

/// Runs between a failed attempt and the next one.
#[async_trait]
pub trait BeforeRetry: Send + Sync {
    async fn before_retry(&self, state: &RetryState) -> Result<RetryAction>;
}

/// Runs once on an HTTP status error about to be returned to the caller.
#[async_trait]
pub trait BeforeError: Send + Sync {
    async fn before_error(&self, err: HttpError) -> HttpError;
}

/// Context passed to `after_response` handlers.
///
/// Gives access to the owning client so a handler can replay a modified
/// request through the full pipeline.
pub struct HookContext {
    client: Client,
    options: RequestOptions,
}

impl HookContext {
    pub(crate) fn new(client: Client, options: RequestOptions) -> Self {
        Self { client, options }
    }

    /// The per-request options of the call being processed.
    pub fn options(&self) -> &RequestOptions {
        &self.options
    }

    /// Send `req` through the whole client again (hooks, retries, transport
    /// stack) using the same per-request options.
    pub async fn replay(&self, req: Request) -> Result<Response> {
        self.client.execute(req, self.options.clone()).await
    }
}

/// Adapter for synchronous `before_request` closures.
pub struct FnBeforeRequest<F>(pub F);

#[async_trait]
impl<F> BeforeRequest for FnBeforeRequest<F>
where
    F: Fn(&mut Request) -> Result<()> + Send + Sync,
{
    async fn before_request(&self, req: &mut Request) -> Result<()> {
        (self.0)(req)
    }
}

/// The four ordered handler lists.
#[derive(Clone, Default)]
pub struct Hooks {
    before_request: Vec<Arc<dyn BeforeRequest>>,
    after_response: Vec<Arc<dyn AfterResponse>>,
    before_retry: Vec<Arc<dyn BeforeRetry>>,
    before_error: Vec<Arc<dyn BeforeError>>,
}

impl Hooks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a `before_request` handler.
    pub fn on_before_request(mut self, hook: impl BeforeRequest + 'static) -> Self {
        self.before_request.push(Arc::new(hook));
        self
    }

    /// Append an `after_response` handler.
    pub fn on_after_response(mut self, hook: impl AfterResponse + 'static) -> Self {
        self.after_response.push(Arc::new(hook));
        self
    }

    /// Append a `before_retry` handler.
    pub fn on_before_retry(mut self, hook: impl BeforeRetry + 'static) -> Self {
        self.before_retry.push(Arc::new(hook));
        self
    }

    /// Append a `before_error` handler.
    pub fn on_before_error(mut self, hook: impl BeforeError + 'static) -> Self {
        self.before_error.push(Arc::new(hook));
        self
    }

    pub fn before_request(&self) -> &[Arc<dyn BeforeRequest>] {
        &self.before_request
    }

    pub fn after_response(&self) -> &[Arc<dyn AfterResponse>] {
        &self.after_response
    }

    pub fn before_retry(&self) -> &[Arc<dyn BeforeRetry>] {
        &self.before_retry
    }

    pub fn before_error(&self) -> &[Arc<dyn BeforeError>] {
        &self.before_error
    }

    /// Concatenate `self` then `patch`, list by list.
    pub fn merge(&self, patch: &Hooks) -> Hooks {
        fn concat<T: ?Sized>(a: &[Arc<T>], b: &[Arc<T>]) -> Vec<Arc<T>> {
            a.iter().chain(b.iter()).cloned().collect()
        }
        Hooks {
            before_request: concat(&self.before_request, &patch.before_request),
            after_response: concat(&self.after_response, &patch.after_response),
            before_retry: concat(&self.before_retry, &patch.before_retry),
            before_error: concat(&self.before_error, &patch.before_error),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.before_request.is_empty()
            && self.after_response.is_empty()
            && self.before_retry.is_empty()
            && self.before_error.is_empty()
    }
}

impl fmt::Debug for Hooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hooks")
            .field("before_request", &self.before_request.len())
            .field("after_response", &self.after_response.len())
            .field("before_retry", &self.before_retry.len())
            .field("before_error", &self.before_error.len())
            .finish()
    }
}
