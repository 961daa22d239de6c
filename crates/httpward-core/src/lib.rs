//! httpward-core: composable resilience policies around an HTTP transport.
//!
//! # Overview
//!
//! A [`Client`] is built from a base [`Config`] and an ordered list of
//! [`Plugin`]s. Each plugin returns a patch that is folded into the running
//! configuration: hook policies append lifecycle handlers, wrapping policies
//! install a new outermost [`Transport`] that delegates to the previous one.
//!
//! - [`Transport`]: the async request/response trait every layer implements
//! - [`Request`] / [`Response`]: value types passed through the stack
//! - [`HttpError`]: structured, cloneable error type
//! - [`Hooks`]: `before_request`, `after_response`, `before_retry`,
//!   `before_error` handler lists
//! - [`policy`] module: auth, retry, caches, dedup, circuit breaker, rate
//!   limiter, observability and friends
//! - [`presets`] module: fixed policy bundles
//!
//! ```no_run
//! use httpward_core::policy::{with_cache, with_retry_smart, CacheConfig, RetryConfig};
//! use httpward_core::{transport_fn, Client, Config, Response};
//!
//! # async fn demo() -> httpward_core::Result<()> {
//! let base = Config::new()
//!     .with_base_url("https://api.example.com")
//!     .with_transport(transport_fn(|_req| async { Ok(Response::ok("{}")) }));
//! let client = Client::builder(base)
//!     .plugin(with_retry_smart(RetryConfig::default()))
//!     .plugin(with_cache(CacheConfig::default()))
//!     .build();
//! let body = client.get("users").text().await?;
//! # let _ = body;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod hooks;
pub mod key;
pub mod policy;
pub mod presets;
pub mod request;
pub mod transport;

pub use client::{create_client, Client, ClientBuilder, RequestBuilder, RequestOptions};
pub use config::{chain, compose, BoxPlugin, Config, Plugin, RetrySpec};
pub use error::{HttpError, Result};
pub use hooks::{
    AfterResponse, BeforeError, BeforeRequest, BeforeRetry, FnBeforeRequest, HookContext, Hooks,
    RetryAction, RetryState,
};
pub use key::{async_key_fn, key_fn, scope_fn, KeyFn, ScopeFn};
pub use request::{Deadline, Request, Response};
pub use transport::{transport_fn, DeadlineTransport, SharedTransport, Transport};
