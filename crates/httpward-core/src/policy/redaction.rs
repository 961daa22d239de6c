//! Masking of credentials before request data reaches logs or callbacks.
//!
//! [`with_redaction`] publishes a [`Redactor`] on the configuration; the
//! observability policy picks it up when it was not given one of its own.

use std::fmt;
use std::sync::Arc;

use http::header::{HeaderMap, HeaderName, HeaderValue};
use http::Method;
use url::Url;

use crate::config::{Config, Plugin};
use crate::request::Request;

/// The request fields exposed to observers.
#[derive(Debug, Clone)]
pub struct RequestSummary {
    pub url: String,
    pub method: Method,
    pub headers: HeaderMap,
}

impl RequestSummary {
    pub fn from_request(req: &Request) -> Self {
        Self {
            url: req.url().to_string(),
            method: req.method().clone(),
            headers: req.headers().clone(),
        }
    }
}

/// Maps a summary to its redacted form.
pub type Redactor = Arc<dyn Fn(RequestSummary) -> RequestSummary + Send + Sync>;

#[derive(Debug, Clone)]
pub struct RedactionConfig {
    /// Header names to mask (case-insensitive).
    pub headers: Vec<String>,
    /// Query parameter names to mask (case-insensitive).
    pub query_params: Vec<String>,
    pub replacement: String,
}

impl Default for RedactionConfig {
    fn default() -> Self {
        Self {
            headers: [
                "authorization",
                "cookie",
                "set-cookie",
                "proxy-authorization",
                "x-api-key",
            ]
            .map(String::from)
            .to_vec(),
            query_params: ["token", "access_token", "api_key", "password"]
                .map(String::from)
                .to_vec(),
            replacement: "[REDACTED]".to_string(),
        }
    }
}

struct Masker {
    headers: Vec<HeaderName>,
    query_params: Vec<String>,
    replacement: String,
    header_value: HeaderValue,
}

impl Masker {
    fn new(config: RedactionConfig) -> Self {
        let header_value = HeaderValue::from_str(&config.replacement)
            .unwrap_or_else(|_| HeaderValue::from_static("[REDACTED]"));
        Self {
            headers: config
                .headers
                .iter()
                .filter_map(|h| HeaderName::from_bytes(h.as_bytes()).ok())
                .collect(),
            query_params: config
                .query_params
                .iter()
                .map(|p| p.to_ascii_lowercase())
                .collect(),
            replacement: config.replacement,
            header_value,
        }
    }

    fn redact(&self, mut summary: RequestSummary) -> RequestSummary {
        for name in &self.headers {
            // `insert` collapses multi-valued headers such as `set-cookie`.
            if summary.headers.contains_key(name) {
                summary.headers.insert(name.clone(), self.header_value.clone());
            }
        }
        summary.url = self.redact_url(&summary.url);
        summary
    }

    fn redact_url(&self, raw: &str) -> String {
        let Ok(mut url) = Url::parse(raw) else {
            return raw.to_string();
        };
        let Some(query) = url.query() else {
            return raw.to_string();
        };
        let masked: Vec<String> = query
            .split('&')
            .map(|pair| match pair.split_once('=') {
                Some((name, _)) if self.query_params.contains(&name.to_ascii_lowercase()) => {
                    format!("{name}={}", self.replacement)
                }
                _ => pair.to_string(),
            })
            .collect();
        url.set_query(Some(&masked.join("&")));
        url.to_string()
    }
}

impl fmt::Debug for Masker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Masker")
            .field("headers", &self.headers)
            .field("query_params", &self.query_params)
            .finish()
    }
}

/// Build the default header and query-parameter masking function.
pub fn default_redactor(config: RedactionConfig) -> Redactor {
    let masker = Masker::new(config);
    Arc::new(move |summary: RequestSummary| masker.redact(summary))
}

/// Publish a redactor for observability policies composed after this one.
pub fn with_redaction(config: RedactionConfig) -> impl Plugin {
    let redactor = default_redactor(config);
    move |_: &Config| Config::new().with_redactor(redactor.clone())
}
