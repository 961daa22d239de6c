//! Client configuration, the plugin contract and the merge engine.
//!
//! A [`Plugin`] receives the configuration accumulated so far and returns a
//! *patch*: a [`Config`] holding only the fields it wants to change. The
//! engine folds patches left to right with [`Config::merge`]:
//!
//! - base URL, default headers, transport, retry spec, timeout and redactor
//!   are overridden when the patch sets them;
//! - each hook list is concatenated base-then-patch.
//!
//! A plugin that installs a transport must delegate to the one it found in
//! the configuration it was given, so the last-applied wrapper ends up
//! outermost.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use http::header::{HeaderMap, HeaderName, HeaderValue};
use http::{Method, StatusCode};

use crate::error::Result;
use crate::hooks::Hooks;
use crate::policy::redaction::Redactor;
use crate::transport::{DeadlineTransport, MissingTransport, SharedTransport};

/// Which failures the executor may retry, and how many times.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetrySpec {
    /// Maximum number of retries (not counting the first attempt).
    pub limit: u32,
    /// Methods eligible for retry.
    pub methods: Vec<Method>,
    /// Response statuses eligible for retry.
    pub status_codes: Vec<StatusCode>,
}

impl RetrySpec {
    /// A spec that never retries.
    pub fn none() -> Self {
        Self {
            limit: 0,
            ..Self::default()
        }
    }

    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = limit;
        self
    }

    pub fn allows_method(&self, method: &Method) -> bool {
        self.methods.contains(method)
    }

    pub fn allows_status(&self, status: StatusCode) -> bool {
        self.status_codes.contains(&status)
    }
}

impl Default for RetrySpec {
    fn default() -> Self {
        Self {
            limit: 2,
            methods: vec![
                Method::GET,
                Method::PUT,
                Method::HEAD,
                Method::DELETE,
                Method::OPTIONS,
                Method::TRACE,
            ],
            status_codes: [408, 413, 429, 500, 502, 503, 504]
                .into_iter()
                .filter_map(|s| StatusCode::from_u16(s).ok())
                .collect(),
        }
    }
}

/// Immutable client configuration.
///
/// Every field is optional so the same type doubles as a patch.
#[derive(Clone, Default)]
pub struct Config {
    base_url: Option<String>,
    headers: Option<HeaderMap>,
    transport: Option<SharedTransport>,
    retry: Option<RetrySpec>,
    timeout: Option<Duration>,
    redactor: Option<Redactor>,
    hooks: Hooks,
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Prefix joined in front of every request path.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    /// Add a default header sent with every request.
    pub fn with_header(mut self, name: &str, value: &str) -> Result<Self> {
        let name = HeaderName::from_bytes(name.as_bytes())?;
        let value = HeaderValue::from_str(value)?;
        self.headers
            .get_or_insert_with(HeaderMap::new)
            .insert(name, value);
        Ok(self)
    }

    /// Replace the default headers.
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = Some(headers);
        self
    }

    pub fn with_transport(mut self, transport: SharedTransport) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn with_retry(mut self, retry: RetrySpec) -> Self {
        self.retry = Some(retry);
        self
    }

    /// Per-attempt timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Publish a redaction function for observability policies.
    pub fn with_redactor(mut self, redactor: Redactor) -> Self {
        self.redactor = Some(redactor);
        self
    }

    pub fn with_hooks(mut self, hooks: Hooks) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn base_url(&self) -> Option<&str> {
        self.base_url.as_deref()
    }

    pub fn headers(&self) -> Option<&HeaderMap> {
        self.headers.as_ref()
    }

    pub fn transport(&self) -> Option<&SharedTransport> {
        self.transport.as_ref()
    }

    /// The transport a wrapping policy should delegate to, behind a
    /// [`DeadlineTransport`] so the policy sees attempt timeouts as errors.
    pub fn inner_transport(&self) -> SharedTransport {
        let inner = self
            .transport
            .clone()
            .unwrap_or_else(|| Arc::new(MissingTransport));
        Arc::new(DeadlineTransport::new(inner))
    }

    pub fn retry(&self) -> Option<&RetrySpec> {
        self.retry.as_ref()
    }

    /// The retry spec in effect (the configured one, or the built-in default).
    pub fn effective_retry(&self) -> RetrySpec {
        self.retry.clone().unwrap_or_default()
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn redactor(&self) -> Option<&Redactor> {
        self.redactor.as_ref()
    }

    pub fn hooks(&self) -> &Hooks {
        &self.hooks
    }

    /// Fold `patch` into `self`: fields set in the patch override, hook lists
    /// concatenate.
    pub fn merge(&self, patch: Config) -> Config {
        Config {
            base_url: patch.base_url.or_else(|| self.base_url.clone()),
            headers: patch.headers.or_else(|| self.headers.clone()),
            transport: patch.transport.or_else(|| self.transport.clone()),
            retry: patch.retry.or_else(|| self.retry.clone()),
            timeout: patch.timeout.or(self.timeout),
            redactor: patch.redactor.or_else(|| self.redactor.clone()),
            hooks: self.hooks.merge(&patch.hooks),
        }
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("base_url", &self.base_url)
            .field("headers", &self.headers)
            .field("transport", &self.transport.as_ref().map(|t| t.name().to_string()))
            .field("retry", &self.retry)
            .field("timeout", &self.timeout)
            .field("redactor", &self.redactor.is_some())
            .field("hooks", &self.hooks)
            .finish()
    }
}

/// A composable transform adding one cross-cutting behavior.
///
/// `apply` runs once per composition. Private state (caches, breakers,
/// buckets) must be created inside `apply` so each composed client owns its
/// own copy.
pub trait Plugin: Send + Sync {
    fn apply(&self, config: &Config) -> Config;
}

impl<F> Plugin for F
where
    F: Fn(&Config) -> Config + Send + Sync,
{
    fn apply(&self, config: &Config) -> Config {
        self(config)
    }
}

/// Boxed plugin, for heterogeneous plugin lists.
pub type BoxPlugin = Box<dyn Plugin>;

/// Fold `plugins` over `base`, left to right.
pub fn compose<I>(base: Config, plugins: I) -> Config
where
    I: IntoIterator<Item = BoxPlugin>,
{
    plugins.into_iter().fold(base, |acc, plugin| {
        let patch = plugin.apply(&acc);
        acc.merge(patch)
    })
}

/// Bundle several plugins into one.
///
/// The returned plugin applies each member against the running configuration
/// and yields the combined patch, so composing a chain is equivalent to
/// composing its members in order.
pub fn chain(plugins: Vec<BoxPlugin>) -> impl Plugin {
    move |config: &Config| {
        let mut running = config.clone();
        let mut patch = Config::default();
        for plugin in &plugins {
            let step = plugin.apply(&running);
            running = running.merge(step.clone());
            patch = patch.merge(step);
        }
        patch
    }
}
