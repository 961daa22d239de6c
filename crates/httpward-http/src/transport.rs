//! Network transport backed by `reqwest`.

use std::time::Duration;

use async_trait::async_trait;
use httpward_core::{HttpError, Request, Response, Transport};

use crate::error::SetupError;
use crate::tls::TlsConfig;

/// Sends requests over the network through a pooled `reqwest::Client`.
///
/// Redirects are not followed and system proxy settings are ignored; proxy
/// routing is the job of [`with_proxy`](crate::proxy::with_proxy). The whole
/// body is buffered before the response is handed back.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
    proxy: Option<String>,
}

impl ReqwestTransport {
    /// Direct transport with default settings.
    pub fn new() -> Result<Self, SetupError> {
        Self::builder().build()
    }

    pub fn builder() -> ReqwestTransportBuilder {
        ReqwestTransportBuilder::default()
    }

    /// Wrap an already configured client.
    pub fn from_client(client: reqwest::Client) -> Self {
        Self {
            client,
            proxy: None,
        }
    }

    /// Proxy URL every request is tunnelled through, if any.
    pub fn proxy(&self) -> Option<&str> {
        self.proxy.as_deref()
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, req: Request) -> httpward_core::Result<Response> {
        let mut call = self
            .client
            .request(req.method().clone(), req.url().clone())
            .headers(req.headers().clone());
        if let Some(body) = req.body() {
            call = call.body(body.clone());
        }

        tracing::trace!(
            method = %req.method(),
            url = %req.url(),
            proxy = self.proxy.as_deref().unwrap_or("-"),
            "sending request"
        );

        let resp = call.send().await.map_err(network_error)?;
        let status = resp.status();
        let headers = resp.headers().clone();
        let body = resp.bytes().await.map_err(network_error)?;
        Ok(Response::new(status).with_headers(headers).with_body(body))
    }

    fn name(&self) -> &str {
        if self.proxy.is_some() {
            "reqwest-proxied"
        } else {
            "reqwest"
        }
    }
}

/// Builder for [`ReqwestTransport`].
#[derive(Debug, Clone, Default)]
pub struct ReqwestTransportBuilder {
    proxy: Option<String>,
    tls: TlsConfig,
    connect_timeout: Option<Duration>,
    user_agent: Option<String>,
}

impl ReqwestTransportBuilder {
    /// Tunnel every request through `url`.
    pub fn proxy(mut self, url: impl Into<String>) -> Self {
        self.proxy = Some(url.into());
        self
    }

    /// Trust an extra CA and present a client identity.
    pub fn tls(mut self, tls: TlsConfig) -> Self {
        self.tls = tls;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    pub fn user_agent(mut self, agent: impl Into<String>) -> Self {
        self.user_agent = Some(agent.into());
        self
    }

    pub fn build(self) -> Result<ReqwestTransport, SetupError> {
        let mut builder = reqwest::Client::builder()
            .no_proxy()
            .redirect(reqwest::redirect::Policy::none());

        if let Some(url) = &self.proxy {
            let proxy = reqwest::Proxy::all(url.as_str()).map_err(|e| SetupError::Proxy {
                url: url.clone(),
                reason: e.to_string(),
            })?;
            builder = builder.proxy(proxy);
        }
        if let Some(timeout) = self.connect_timeout {
            builder = builder.connect_timeout(timeout);
        }
        if let Some(agent) = &self.user_agent {
            builder = builder.user_agent(agent.as_str());
        }
        builder = self.tls.apply(builder)?;

        Ok(ReqwestTransport {
            client: builder.build()?,
            proxy: self.proxy,
        })
    }
}

/// Stand-in installed when a transport could not be built. Every call fails
/// with the setup error.
pub(crate) struct Unavailable {
    error: HttpError,
}

impl Unavailable {
    pub(crate) fn new(error: SetupError) -> Self {
        Self {
            error: error.into(),
        }
    }
}

#[async_trait]
impl Transport for Unavailable {
    async fn send(&self, _req: Request) -> httpward_core::Result<Response> {
        Err(self.error.clone())
    }

    fn name(&self) -> &str {
        "unavailable"
    }
}

fn network_error(e: reqwest::Error) -> HttpError {
    let mut message = e.to_string();
    let mut source = std::error::Error::source(&e);
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    HttpError::Network(message)
}
