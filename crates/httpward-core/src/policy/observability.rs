//! Start/success/error callbacks around every transport call.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use http::header::HeaderMap;
use http::{Method, StatusCode};
use tokio::time::Instant;

use super::redaction::{Redactor, RequestSummary};
use crate::config::{Config, Plugin};
use crate::error::{HttpError, Result};
use crate::hooks::{BeforeError, Hooks};
use crate::request::{Request, Response};
use crate::transport::{SharedTransport, Transport};

/// One lifecycle event, after redaction.
#[derive(Debug, Clone)]
pub struct ObservedEvent {
    pub url: String,
    pub method: Method,
    pub headers: HeaderMap,
    /// Set on success events.
    pub status: Option<StatusCode>,
    /// Time spent in the transport; absent on start events and on errors
    /// reported after the call completed.
    pub duration: Option<Duration>,
    /// Rendered error on error events.
    pub error: Option<String>,
}

impl ObservedEvent {
    fn from_summary(summary: RequestSummary) -> Self {
        Self {
            url: summary.url,
            method: summary.method,
            headers: summary.headers,
            status: None,
            duration: None,
            error: None,
        }
    }
}

type EventFn = Arc<dyn Fn(&ObservedEvent) + Send + Sync>;

#[derive(Clone, Default)]
pub struct ObservabilityConfig {
    /// Falls back to the redactor published by `with_redaction`.
    pub redact: Option<Redactor>,
    pub on_start: Option<EventFn>,
    pub on_success: Option<EventFn>,
    pub on_error: Option<EventFn>,
}

impl ObservabilityConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn redact(
        mut self,
        f: impl Fn(RequestSummary) -> RequestSummary + Send + Sync + 'static,
    ) -> Self {
        self.redact = Some(Arc::new(f));
        self
    }

    pub fn on_start(mut self, f: impl Fn(&ObservedEvent) + Send + Sync + 'static) -> Self {
        self.on_start = Some(Arc::new(f));
        self
    }

    pub fn on_success(mut self, f: impl Fn(&ObservedEvent) + Send + Sync + 'static) -> Self {
        self.on_success = Some(Arc::new(f));
        self
    }

    pub fn on_error(mut self, f: impl Fn(&ObservedEvent) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(f));
        self
    }
}

impl fmt::Debug for ObservabilityConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObservabilityConfig")
            .field("redact", &self.redact.is_some())
            .field("on_start", &self.on_start.is_some())
            .field("on_success", &self.on_success.is_some())
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

fn summarize(redact: Option<&Redactor>, summary: RequestSummary) -> RequestSummary {
    match redact {
        Some(f) => f(summary),
        None => summary,
    }
}

fn emit(callback: Option<&EventFn>, event: &ObservedEvent) {
    if let Some(f) = callback {
        f(event);
    }
}

struct ObservedTransport {
    inner: SharedTransport,
    config: ObservabilityConfig,
}

#[async_trait]
impl Transport for ObservedTransport {
    async fn send(&self, req: Request) -> Result<Response> {
        let summary = summarize(self.config.redact.as_ref(), RequestSummary::from_request(&req));
        let mut event = ObservedEvent::from_summary(summary);
        tracing::debug!(method = %event.method, url = %event.url, "request start");
        emit(self.config.on_start.as_ref(), &event);

        let started = Instant::now();
        let outcome = self.inner.send(req).await;
        event.duration = Some(started.elapsed());
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match &outcome {
            Ok(resp) => {
                event.status = Some(resp.status());
                tracing::info!(
                    method = %event.method,
                    url = %event.url,
                    status = resp.status().as_u16(),
                    elapsed_ms,
                    "request complete"
                );
                emit(self.config.on_success.as_ref(), &event);
            }
            Err(e) => {
                event.error = Some(e.to_string());
                tracing::warn!(
                    method = %event.method,
                    url = %event.url,
                    error = %e,
                    elapsed_ms,
                    "request failed"
                );
                emit(self.config.on_error.as_ref(), &event);
            }
        }
        outcome
    }

    fn name(&self) -> &str {
        "observability"
    }
}

/// Routes HTTP status errors finalized by the client to `on_error`.
struct ErrorRouter {
    redact: Option<Redactor>,
    on_error: Option<EventFn>,
}

#[async_trait]
impl BeforeError for ErrorRouter {
    async fn before_error(&self, err: HttpError) -> HttpError {
        if let HttpError::Status {
            status, method, url, ..
        } = &err
        {
            let summary = RequestSummary {
                url: url.clone(),
                method: method.clone(),
                headers: HeaderMap::new(),
            };
            let mut event = ObservedEvent::from_summary(summarize(self.redact.as_ref(), summary));
            event.status = Some(*status);
            event.error = Some(err.to_string());
            tracing::warn!(
                url = %event.url,
                status = status.as_u16(),
                "request finalized with HTTP error"
            );
            emit(self.on_error.as_ref(), &event);
        }
        err
    }
}

/// Wrap the transport with lifecycle callbacks and route final HTTP errors
/// to `on_error`.
pub fn with_observability(config: ObservabilityConfig) -> impl Plugin {
    move |base: &Config| {
        let mut config = config.clone();
        if config.redact.is_none() {
            config.redact = base.redactor().cloned();
        }
        let router = ErrorRouter {
            redact: config.redact.clone(),
            on_error: config.on_error.clone(),
        };
        let transport = ObservedTransport {
            inner: base.inner_transport(),
            config,
        };
        Config::new()
            .with_transport(Arc::new(transport))
            .with_hooks(Hooks::new().on_before_error(router))
    }
}
