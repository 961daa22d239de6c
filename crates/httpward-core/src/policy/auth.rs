//! Credential injection with a single refresh-and-replay on `401`.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use http::StatusCode;

use crate::config::{Config, Plugin};
use crate::error::Result;
use crate::hooks::{AfterResponse, BeforeRequest, HookContext, Hooks};
use crate::request::{Request, Response};

/// Header marking a request that was already replayed after a refresh.
pub const REFRESH_MARKER: &str = "x-httpward-auth-refreshed";

type TokenFn = Arc<dyn Fn() -> BoxFuture<'static, Result<String>> + Send + Sync>;
type RefreshFn = Arc<dyn Fn() -> BoxFuture<'static, Result<()>> + Send + Sync>;

#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Credential header name.
    pub header: String,
    /// Prefix placed before the token. Empty sends the bare token.
    pub scheme: String,
    /// Refresh and replay once on `401`.
    pub retry_once: bool,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            header: "Authorization".to_string(),
            scheme: "Bearer".to_string(),
            retry_once: true,
        }
    }
}

impl AuthConfig {
    fn credential(&self, token: &str) -> String {
        if self.scheme.is_empty() {
            token.to_string()
        } else {
            format!("{} {}", self.scheme, token)
        }
    }

    /// Set the credential header when `token` is non-empty.
    fn apply(&self, req: &mut Request, token: &str) -> Result<()> {
        if token.is_empty() {
            return Ok(());
        }
        req.set_header(&self.header, &self.credential(token))
    }
}

struct AttachCredential {
    config: Arc<AuthConfig>,
    get_token: TokenFn,
}

#[async_trait]
impl BeforeRequest for AttachCredential {
    async fn before_request(&self, req: &mut Request) -> Result<()> {
        let token = (self.get_token)().await?;
        self.config.apply(req, &token)
    }
}

struct RefreshOnUnauthorized {
    config: Arc<AuthConfig>,
    get_token: TokenFn,
    refresh: RefreshFn,
}

#[async_trait]
impl AfterResponse for RefreshOnUnauthorized {
    async fn after_response(
        &self,
        ctx: &HookContext,
        req: &Request,
        res: Response,
    ) -> Result<Response> {
        if res.status() != StatusCode::UNAUTHORIZED
            || !self.config.retry_once
            || req.headers().contains_key(REFRESH_MARKER)
        {
            return Ok(res);
        }

        tracing::info!(url = %req.url(), "401 received, refreshing credentials");
        (self.refresh)().await?;
        let token = (self.get_token)().await?;

        let mut replay = req.clone();
        replay.set_header(REFRESH_MARKER, "1")?;
        self.config.apply(&mut replay, &token)?;
        ctx.replay(replay).await
    }
}

/// Attach a credential from `get_token` to every request and, on `401`,
/// await `refresh` then replay the request once with a fresh token.
pub fn with_auth<G, GFut, R, RFut>(get_token: G, refresh: R, config: AuthConfig) -> impl Plugin
where
    G: Fn() -> GFut + Send + Sync + 'static,
    GFut: Future<Output = Result<String>> + Send + 'static,
    R: Fn() -> RFut + Send + Sync + 'static,
    RFut: Future<Output = Result<()>> + Send + 'static,
{
    let get_token: TokenFn =
        Arc::new(move || -> BoxFuture<'static, Result<String>> { Box::pin(get_token()) });
    let refresh: RefreshFn =
        Arc::new(move || -> BoxFuture<'static, Result<()>> { Box::pin(refresh()) });
    let config = Arc::new(config);

    move |_: &Config| {
        let hooks = Hooks::new()
            .on_before_request(AttachCredential {
                config: config.clone(),
                get_token: get_token.clone(),
            })
            .on_after_response(RefreshOnUnauthorized {
                config: config.clone(),
                get_token: get_token.clone(),
                refresh: refresh.clone(),
            });
        Config::new().with_hooks(hooks)
    }
}
