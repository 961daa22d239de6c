//! The `Transport` trait: the unit every wrapping policy decorates.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{HttpError, Result};
use crate::request::{Request, Response};

/// The central async trait every transport must implement.
///
/// # Thread Safety
/// Implementations must be `Send + Sync` for use across Tokio tasks.
///
/// # Object Safety
/// The trait is object-safe and is stored as [`SharedTransport`]. Wrapping
/// policies hold the transport they received as their `inner` and install
/// themselves as the new outermost layer.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Perform a single request.
    async fn send(&self, req: Request) -> Result<Response>;

    /// Short identifier used in logs.
    fn name(&self) -> &str {
        "transport"
    }
}

/// Shared, type-erased transport.
pub type SharedTransport = Arc<dyn Transport>;

/// Adapter turning an async closure into a [`Transport`].
pub struct FnTransport<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> Transport for FnTransport<F>
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Response>> + Send + 'static,
{
    async fn send(&self, req: Request) -> Result<Response> {
        (self.f)(req).await
    }

    fn name(&self) -> &str {
        "fn"
    }
}

/// Wrap an async closure as a shared transport.
///
/// ```
/// use httpward_core::{transport_fn, Response};
///
/// let transport = transport_fn(|_req| async { Ok(Response::ok("pong")) });
/// # let _ = transport;
/// ```
pub fn transport_fn<F, Fut>(f: F) -> SharedTransport
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Response>> + Send + 'static,
{
    Arc::new(FnTransport { f })
}

/// Placeholder installed when a policy wraps a configuration that has no
/// transport yet. Every call fails with [`HttpError::NoTransport`].
pub struct MissingTransport;

#[async_trait]
impl Transport for MissingTransport {
    async fn send(&self, _req: Request) -> Result<Response> {
        Err(HttpError::NoTransport)
    }

    fn name(&self) -> &str {
        "missing"
    }
}

/// Enforces the request's [`Deadline`](crate::Deadline) around its inner
/// transport.
///
/// [`Config::inner_transport`](crate::Config::inner_transport) puts one under
/// every wrapping policy, so a timed-out call surfaces as
/// [`HttpError::Timeout`] inside each decorator instead of being dropped
/// from above.
pub struct DeadlineTransport {
    inner: SharedTransport,
}

impl DeadlineTransport {
    pub fn new(inner: SharedTransport) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl Transport for DeadlineTransport {
    async fn send(&self, req: Request) -> Result<Response> {
        match req.deadline() {
            Some(deadline) => tokio::time::timeout_at(deadline.at, self.inner.send(req))
                .await
                .map_err(|_| deadline.error())?,
            None => self.inner.send(req).await,
        }
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}
