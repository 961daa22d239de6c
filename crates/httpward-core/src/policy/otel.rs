//! Client spans around each transport call, through an injected [`Tracer`].
//!
//! The default tracer does nothing. [`TracingTracer`] maps spans onto
//! `tracing` spans so any subscriber (including an OpenTelemetry layer) sees
//! them. Span bookkeeping never fails the call.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::{Config, Plugin};
use crate::error::{HttpError, Result};
use crate::request::{Request, Response};
use crate::transport::{SharedTransport, Transport};

/// An in-progress span.
pub trait Span: Send {
    fn set_attribute(&mut self, key: &'static str, value: String);
    fn record_error(&mut self, err: &HttpError);
    fn end(self: Box<Self>);
}

/// Creates spans.
pub trait Tracer: Send + Sync {
    fn start_span(&self, name: &str) -> Box<dyn Span>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTracer;

struct NoopSpan;

impl Span for NoopSpan {
    fn set_attribute(&mut self, _key: &'static str, _value: String) {}
    fn record_error(&mut self, _err: &HttpError) {}
    fn end(self: Box<Self>) {}
}

impl Tracer for NoopTracer {
    fn start_span(&self, _name: &str) -> Box<dyn Span> {
        Box::new(NoopSpan)
    }
}

/// Emits spans through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingTracer;

struct TracingSpan {
    span: tracing::Span,
}

impl Span for TracingSpan {
    fn set_attribute(&mut self, key: &'static str, value: String) {
        self.span.record(key, value.as_str());
    }

    fn record_error(&mut self, err: &HttpError) {
        self.span.record("otel.status_code", "ERROR");
        self.span.record("error.message", err.to_string().as_str());
    }

    fn end(self: Box<Self>) {}
}

impl Tracer for TracingTracer {
    fn start_span(&self, name: &str) -> Box<dyn Span> {
        let span = tracing::info_span!(
            "http.client",
            otel.name = name,
            http.method = tracing::field::Empty,
            http.url = tracing::field::Empty,
            http.status_code = tracing::field::Empty,
            otel.status_code = tracing::field::Empty,
            error.message = tracing::field::Empty,
        );
        Box::new(TracingSpan { span })
    }
}

#[derive(Clone)]
pub struct OtelConfig {
    pub tracer: Arc<dyn Tracer>,
}

impl Default for OtelConfig {
    fn default() -> Self {
        Self {
            tracer: Arc::new(NoopTracer),
        }
    }
}

impl OtelConfig {
    pub fn with_tracer(tracer: impl Tracer + 'static) -> Self {
        Self {
            tracer: Arc::new(tracer),
        }
    }
}

impl fmt::Debug for OtelConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OtelConfig").finish_non_exhaustive()
    }
}

struct SpanTransport {
    inner: SharedTransport,
    tracer: Arc<dyn Tracer>,
}

#[async_trait]
impl Transport for SpanTransport {
    async fn send(&self, req: Request) -> Result<Response> {
        let mut span = self.tracer.start_span(&format!("HTTP {}", req.method()));
        span.set_attribute("http.method", req.method().to_string());
        span.set_attribute("http.url", req.url().to_string());

        let outcome = self.inner.send(req).await;
        match &outcome {
            Ok(resp) => span.set_attribute("http.status_code", resp.status().as_u16().to_string()),
            Err(e) => span.record_error(e),
        }
        span.end();
        outcome
    }

    fn name(&self) -> &str {
        "otel"
    }
}

/// Wrap each transport call in a client span.
pub fn with_otel(config: OtelConfig) -> impl Plugin {
    move |base: &Config| {
        let transport = SpanTransport {
            inner: base.inner_transport(),
            tracer: config.tracer.clone(),
        };
        Config::new().with_transport(Arc::new(transport))
    }
}
