//! The composed client: request building, hook execution and the generic
//! retry loop.
//!
//! Per attempt:
//! ```text
//! before_request* → transport (with timeout) → after_response* → status check
//! ```
//! A failed attempt is retried when the method and failure are eligible under
//! the [`RetrySpec`] in effect; `before_retry` handlers run first and may
//! stop the loop. The final HTTP status error passes through `before_error`.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::future::BoxFuture;
use http::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use http::Method;
use serde::de::DeserializeOwned;
use serde::Serialize;
use url::Url;

use crate::config::{compose, BoxPlugin, Config, Plugin, RetrySpec};
use crate::error::{HttpError, Result};
use crate::hooks::{HookContext, RetryAction, RetryState};
use crate::request::{Deadline, Request, Response};

/// Per-request options, carried into replays.
#[derive(Debug, Clone)]
pub struct RequestOptions {
    /// Turn non-2xx responses into [`HttpError::Status`] (default `true`).
    pub throw_http_errors: bool,
    /// Overrides the configured per-attempt timeout.
    pub timeout: Option<Duration>,
    /// Overrides the configured retry spec.
    pub retry: Option<RetrySpec>,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            throw_http_errors: true,
            timeout: None,
            retry: None,
        }
    }
}

/// A configured HTTP client. Cheap to clone; clones share policy state.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    config: Config,
}

impl Client {
    /// Wrap an already-composed configuration.
    pub fn new(config: Config) -> Self {
        Self {
            inner: Arc::new(ClientInner { config }),
        }
    }

    /// Start an ordered composition over `base`.
    pub fn builder(base: Config) -> ClientBuilder {
        ClientBuilder {
            base,
            plugins: Vec::new(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn get(&self, path: &str) -> RequestBuilder {
        self.request(Method::GET, path)
    }

    pub fn post(&self, path: &str) -> RequestBuilder {
        self.request(Method::POST, path)
    }

    pub fn put(&self, path: &str) -> RequestBuilder {
        self.request(Method::PUT, path)
    }

    pub fn patch(&self, path: &str) -> RequestBuilder {
        self.request(Method::PATCH, path)
    }

    pub fn delete(&self, path: &str) -> RequestBuilder {
        self.request(Method::DELETE, path)
    }

    pub fn head(&self, path: &str) -> RequestBuilder {
        self.request(Method::HEAD, path)
    }

    pub fn request(&self, method: Method, path: &str) -> RequestBuilder {
        RequestBuilder {
            client: self.clone(),
            method,
            path: path.to_string(),
            headers: HeaderMap::new(),
            body: None,
            options: RequestOptions::default(),
            error: None,
        }
    }

    /// Join `path` onto the configured base URL, or parse it as an absolute
    /// URL when no base is configured.
    pub fn resolve_url(&self, path: &str) -> Result<Url> {
        match self.config().base_url() {
            Some(base) => {
                let joined = format!(
                    "{}/{}",
                    base.trim_end_matches('/'),
                    path.trim_start_matches('/')
                );
                Ok(Url::parse(&joined)?)
            }
            None => Ok(Url::parse(path)?),
        }
    }

    /// Run `req` through hooks, retries and the transport stack.
    pub fn execute(
        &self,
        req: Request,
        options: RequestOptions,
    ) -> BoxFuture<'static, Result<Response>> {
        let client = self.clone();
        Box::pin(async move { client.run(req, options).await })
    }

    async fn run(&self, req: Request, options: RequestOptions) -> Result<Response> {
        let spec = options
            .retry
            .clone()
            .unwrap_or_else(|| self.config().effective_retry());
        let mut retry_count = 0u32;

        loop {
            let failure = match self.attempt(req.clone(), &options).await {
                Ok(resp) => return Ok(resp),
                Err(failure) => failure,
            };

            if !should_retry(&spec, req.method(), &failure.error, retry_count) {
                return Err(self.finalize(failure).await);
            }

            retry_count += 1;
            let state = RetryState {
                request: req.clone(),
                error: failure.error,
                retry_count,
            };
            let mut action = RetryAction::Continue;
            for hook in self.config().hooks().before_retry() {
                action = hook.before_retry(&state).await?;
                if action == RetryAction::Stop {
                    break;
                }
            }
            if action == RetryAction::Stop {
                tracing::debug!(
                    retry_count,
                    url = %req.url(),
                    "retry budget cleared by hook"
                );
                return Err(self
                    .finalize(AttemptError {
                        error: state.error,
                        raised_here: failure.raised_here,
                    })
                    .await);
            }

            tracing::warn!(
                retry_count,
                limit = spec.limit,
                method = %req.method(),
                url = %req.url(),
                error = %state.error,
                "retrying request"
            );
        }
    }

    async fn attempt(
        &self,
        mut req: Request,
        options: &RequestOptions,
    ) -> std::result::Result<Response, AttemptError> {
        let config = self.config();
        for hook in config.hooks().before_request() {
            hook.before_request(&mut req).await?;
        }

        req.set_deadline(options.timeout.or(config.timeout()).map(Deadline::after));
        let mut resp = config.inner_transport().send(req.clone()).await?;

        if !config.hooks().after_response().is_empty() {
            let ctx = HookContext::new(self.clone(), options.clone());
            for hook in config.hooks().after_response() {
                resp = hook.after_response(&ctx, &req, resp).await?;
            }
        }

        if options.throw_http_errors && !resp.is_success() {
            return Err(AttemptError {
                error: HttpError::Status {
                    status: resp.status(),
                    method: req.method().clone(),
                    url: req.url().to_string(),
                    response: Box::new(resp),
                },
                raised_here: true,
            });
        }
        Ok(resp)
    }

    /// Pass a status error raised by this client's own status check through
    /// the `before_error` handlers. Errors bubbling out of hooks (including
    /// replays, which already ran their own handlers) are returned as is.
    async fn finalize(&self, failure: AttemptError) -> HttpError {
        let mut err = failure.error;
        if !failure.raised_here {
            return err;
        }
        for hook in self.config().hooks().before_error() {
            err = hook.before_error(err).await;
        }
        err
    }
}

/// A failed attempt, remembering whether the status check in this attempt
/// produced the error.
struct AttemptError {
    error: HttpError,
    raised_here: bool,
}

impl From<HttpError> for AttemptError {
    fn from(error: HttpError) -> Self {
        Self {
            error,
            raised_here: false,
        }
    }
}

fn should_retry(spec: &RetrySpec, method: &Method, err: &HttpError, retry_count: u32) -> bool {
    if retry_count >= spec.limit || !spec.allows_method(method) {
        return false;
    }
    match err {
        HttpError::Network(_) => true,
        HttpError::Status {
            status, response, ..
        } => !response.is_short_circuit() && spec.allows_status(*status),
        _ => false,
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("config", self.config())
            .finish()
    }
}

/// Explicit ordered-composition builder.
pub struct ClientBuilder {
    base: Config,
    plugins: Vec<BoxPlugin>,
}

impl ClientBuilder {
    /// Append a plugin; plugins apply in the order they are added.
    pub fn plugin(mut self, plugin: impl Plugin + 'static) -> Self {
        self.plugins.push(Box::new(plugin));
        self
    }

    /// Append several boxed plugins.
    pub fn plugins(mut self, plugins: impl IntoIterator<Item = BoxPlugin>) -> Self {
        self.plugins.extend(plugins);
        self
    }

    pub fn build(self) -> Client {
        Client::new(compose(self.base, self.plugins))
    }
}

/// Compose `plugins` over `base` and build a client.
pub fn create_client(base: Config, plugins: Vec<BoxPlugin>) -> Client {
    Client::builder(base).plugins(plugins).build()
}

/// A request being assembled against a [`Client`].
pub struct RequestBuilder {
    client: Client,
    method: Method,
    path: String,
    headers: HeaderMap,
    body: Option<Bytes>,
    options: RequestOptions,
    error: Option<HttpError>,
}

impl RequestBuilder {
    /// Set a per-request header (overrides a default header of the same name).
    pub fn header(mut self, name: &str, value: &str) -> Self {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                self.headers.insert(name, value);
            }
            (Err(e), _) => self.error = Some(e.into()),
            (_, Err(e)) => self.error = Some(e.into()),
        }
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Serialize `value` as the JSON body.
    pub fn json_body<T: Serialize>(mut self, value: &T) -> Self {
        match serde_json::to_vec(value) {
            Ok(body) => {
                self.body = Some(body.into());
                self.headers
                    .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
            }
            Err(e) => self.error = Some(e.into()),
        }
        self
    }

    pub fn throw_http_errors(mut self, throw: bool) -> Self {
        self.options.throw_http_errors = throw;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.options.timeout = Some(timeout);
        self
    }

    pub fn retry(mut self, retry: RetrySpec) -> Self {
        self.options.retry = Some(retry);
        self
    }

    /// Materialize the request without sending it.
    pub fn build(self) -> Result<(Client, Request, RequestOptions)> {
        if let Some(err) = self.error {
            return Err(err);
        }
        let url = self.client.resolve_url(&self.path)?;
        let mut req = Request::new(self.method, url);
        if let Some(defaults) = self.client.config().headers() {
            for (name, value) in defaults {
                req.headers_mut().insert(name.clone(), value.clone());
            }
        }
        for (name, value) in &self.headers {
            req.headers_mut().insert(name.clone(), value.clone());
        }
        if let Some(body) = self.body {
            req = req.with_body(body);
        }
        Ok((self.client, req, self.options))
    }

    pub async fn send(self) -> Result<Response> {
        let (client, req, options) = self.build()?;
        client.execute(req, options).await
    }

    pub async fn text(self) -> Result<String> {
        self.send().await?.text()
    }

    pub async fn bytes(self) -> Result<Bytes> {
        self.send().await?.bytes()
    }

    pub async fn json<T: DeserializeOwned>(self) -> Result<T> {
        self.send().await?.json()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::{BeforeError, BeforeRetry, FnBeforeRequest, Hooks};
    use crate::transport::transport_fn;
    use async_trait::async_trait;
    use http::StatusCode;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn counting(status: StatusCode, hits: Arc<AtomicU32>) -> Config {
        Config::new()
            .with_base_url("http://svc.test")
            .with_transport(transport_fn(move |_req| {
                let hits = hits.clone();
                async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                    Ok(Response::new(status))
                }
            }))
    }

    #[test]
    fn resolves_against_base_url() {
        let client = Client::new(Config::new().with_base_url("http://svc.test/api/"));
        let url = client.resolve_url("users?page=1").unwrap();
        assert_eq!(url.as_str(), "http://svc.test/api/users?page=1");

        let bare = Client::new(Config::new());
        assert!(bare.resolve_url("relative").is_err());
    }

    #[tokio::test]
    async fn default_and_request_headers_are_applied() {
        let config = Config::new()
            .with_base_url("http://svc.test")
            .with_header("x-default", "d")
            .unwrap()
            .with_transport(transport_fn(|req: Request| async move {
                let seen = format!(
                    "{}|{}",
                    req.header("x-default").unwrap_or(""),
                    req.header("x-call").unwrap_or("")
                );
                Ok(Response::ok(seen))
            }));
        let client = Client::new(config);
        let body = client.get("h").header("x-call", "c").text().await.unwrap();
        assert_eq!(body, "d|c");
    }

    #[tokio::test]
    async fn eligible_status_is_retried_up_to_limit() {
        let hits = Arc::new(AtomicU32::new(0));
        let client = Client::new(counting(StatusCode::SERVICE_UNAVAILABLE, hits.clone()));
        let err = client.get("x").send().await.unwrap_err();
        assert_eq!(err.status(), Some(StatusCode::SERVICE_UNAVAILABLE));
        // First attempt plus the default limit of two retries.
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn ineligible_status_and_method_are_not_retried() {
        let hits = Arc::new(AtomicU32::new(0));
        let client = Client::new(counting(StatusCode::BAD_REQUEST, hits.clone()));
        assert!(client.get("x").send().await.is_err());
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        let hits = Arc::new(AtomicU32::new(0));
        let client = Client::new(counting(StatusCode::SERVICE_UNAVAILABLE, hits.clone()));
        assert!(client.post("x").send().await.is_err());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn throw_http_errors_false_returns_response() {
        let hits = Arc::new(AtomicU32::new(0));
        let client = Client::new(counting(StatusCode::NOT_FOUND, hits));
        let resp = client.get("x").throw_http_errors(false).send().await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn network_errors_are_retried() {
        let hits = Arc::new(AtomicU32::new(0));
        let counter = hits.clone();
        let config = Config::new()
            .with_base_url("http://svc.test")
            .with_transport(transport_fn(move |_req| {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err(HttpError::Network("connection reset".into()))
                    } else {
                        Ok(Response::ok("ok"))
                    }
                }
            }));
        let client = Client::new(config);
        assert_eq!(client.get("x").text().await.unwrap(), "ok");
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    struct StopAll;

    #[async_trait]
    impl BeforeRetry for StopAll {
        async fn before_retry(&self, _state: &RetryState) -> Result<RetryAction> {
            Ok(RetryAction::Stop)
        }
    }

    #[tokio::test]
    async fn before_retry_stop_surfaces_error() {
        let hits = Arc::new(AtomicU32::new(0));
        let config = counting(StatusCode::BAD_GATEWAY, hits.clone())
            .with_hooks(Hooks::new().on_before_retry(StopAll));
        let client = Client::new(config);
        assert!(client.get("x").send().await.is_err());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    struct Relabel;

    #[async_trait]
    impl BeforeError for Relabel {
        async fn before_error(&self, err: HttpError) -> HttpError {
            HttpError::Hook(format!("relabelled: {err}"))
        }
    }

    #[tokio::test]
    async fn before_error_runs_once_on_final_status_error() {
        let hits = Arc::new(AtomicU32::new(0));
        let config = counting(StatusCode::INTERNAL_SERVER_ERROR, hits)
            .with_retry(RetrySpec::none())
            .with_hooks(Hooks::new().on_before_error(Relabel));
        let client = Client::new(config);
        let err = client.get("x").send().await.unwrap_err();
        assert!(matches!(err, HttpError::Hook(m) if m.starts_with("relabelled")));
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_applies_per_attempt() {
        let config = Config::new()
            .with_base_url("http://svc.test")
            .with_timeout(Duration::from_millis(10))
            .with_transport(transport_fn(|_req| async {
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok(Response::ok("late"))
            }));
        let client = Client::new(config);
        let err = client.get("slow").send().await.unwrap_err();
        assert!(matches!(err, HttpError::Timeout { ms: 10 }));
    }

    #[tokio::test]
    async fn before_request_hooks_run_per_attempt() {
        let seen = Arc::new(AtomicU32::new(0));
        let counter = seen.clone();
        let hits = Arc::new(AtomicU32::new(0));
        let config = counting(StatusCode::SERVICE_UNAVAILABLE, hits).with_hooks(
            Hooks::new().on_before_request(FnBeforeRequest(move |_req: &mut Request| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })),
        );
        let client = Client::new(config);
        let _ = client.get("x").send().await;
        assert_eq!(seen.load(Ordering::SeqCst), 3);
    }
}
