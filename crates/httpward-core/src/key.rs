//! Canonical request signatures and scope keys.
//!
//! Caches and the dedup policy key their state by a *signature* identifying
//! "the same logical request"; breakers and limiters partition their state by
//! a *scope* (the request host unless overridden).

use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;

use crate::request::Request;

/// Async function deriving a cache/dedup key from a request.
pub type KeyFn = Arc<dyn Fn(&Request) -> BoxFuture<'static, String> + Send + Sync>;

/// Function deriving a breaker/limiter scope from a request.
pub type ScopeFn = Arc<dyn Fn(&Request) -> String + Send + Sync>;

/// `"{METHOD} {path}{?query}"`.
pub fn canonical_signature(req: &Request) -> String {
    format!("{} {}", req.method(), req.path_and_query())
}

/// `"{METHOD} {full url}"`.
pub fn full_url_signature(req: &Request) -> String {
    format!("{} {}", req.method(), req.url())
}

/// Compute the key for `req`, using `key` when supplied.
pub async fn signature_for(req: &Request, key: Option<&KeyFn>) -> String {
    match key {
        Some(f) => f(req).await,
        None => canonical_signature(req),
    }
}

/// Build a [`KeyFn`] from a synchronous closure.
pub fn key_fn<F>(f: F) -> KeyFn
where
    F: Fn(&Request) -> String + Send + Sync + 'static,
{
    Arc::new(move |req: &Request| -> BoxFuture<'static, String> {
        let key = f(req);
        Box::pin(async move { key })
    })
}

/// Build a [`KeyFn`] from an async closure. The closure receives its own copy
/// of the request.
pub fn async_key_fn<F, Fut>(f: F) -> KeyFn
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = String> + Send + 'static,
{
    Arc::new(move |req: &Request| -> BoxFuture<'static, String> { Box::pin(f(req.clone())) })
}

/// Scope every request by its host.
pub fn host_scope() -> ScopeFn {
    Arc::new(|req: &Request| req.host().to_string())
}

/// Build a [`ScopeFn`] from a closure.
pub fn scope_fn<F>(f: F) -> ScopeFn
where
    F: Fn(&Request) -> String + Send + Sync + 'static,
{
    Arc::new(f)
}
