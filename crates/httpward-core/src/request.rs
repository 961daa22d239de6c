//! Request and response value types passed through transports and hooks.

use std::time::Duration;

use bytes::Bytes;
use http::header::{HeaderMap, HeaderName, HeaderValue, CACHE_CONTROL};
use http::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::time::Instant;
use url::Url;

use crate::error::{HttpError, Result};

/// An outbound HTTP request.
///
/// Header names are case-insensitive. The body is reference-counted, so
/// cloning a request for a retry or a replay is cheap.
#[derive(Debug, Clone)]
pub struct Request {
    method: Method,
    url: Url,
    headers: HeaderMap,
    body: Option<Bytes>,
    deadline: Option<Deadline>,
}

/// Point in time at which the current attempt times out.
///
/// The client stamps it on the request before handing it to the transport
/// stack, so every layer races the same instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    pub at: Instant,
    pub limit: Duration,
}

impl Deadline {
    /// A deadline `limit` from now.
    pub fn after(limit: Duration) -> Self {
        Self {
            at: Instant::now() + limit,
            limit,
        }
    }

    /// The error reported when the deadline passes.
    pub fn error(&self) -> HttpError {
        HttpError::Timeout {
            ms: self.limit.as_millis() as u64,
        }
    }
}

impl Request {
    /// Create a request with no headers and no body.
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: HeaderMap::new(),
            body: None,
            deadline: None,
        }
    }

    /// Parse `url` and create a request.
    pub fn parse(method: Method, url: &str) -> Result<Self> {
        Ok(Self::new(method, Url::parse(url)?))
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    pub fn body(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }

    pub fn deadline(&self) -> Option<Deadline> {
        self.deadline
    }

    pub fn set_deadline(&mut self, deadline: Option<Deadline>) {
        self.deadline = deadline;
    }

    /// Replace the body.
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Set a header, replacing any previous value for the same name.
    pub fn set_header(&mut self, name: &str, value: &str) -> Result<()> {
        let name = HeaderName::from_bytes(name.as_bytes())?;
        let value = HeaderValue::from_str(value)?;
        self.headers.insert(name, value);
        Ok(())
    }

    /// Builder-style [`Request::set_header`].
    pub fn with_header(mut self, name: &str, value: &str) -> Result<Self> {
        self.set_header(name, value)?;
        Ok(self)
    }

    /// Returns the value of `name` as a string, if present and valid UTF-8.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Host component of the URL, or the empty string for host-less URLs.
    pub fn host(&self) -> &str {
        self.url.host_str().unwrap_or("")
    }

    /// `path` plus `?query` when a query is present.
    pub fn path_and_query(&self) -> String {
        match self.url.query() {
            Some(q) => format!("{}?{}", self.url.path(), q),
            None => self.url.path().to_string(),
        }
    }

    /// Returns `true` if the request carries a `no-cache` or `no-store`
    /// cache-control directive.
    pub fn forbids_caching(&self) -> bool {
        forbids_caching(&self.headers)
    }
}

/// A response produced by a transport.
///
/// The body is fully buffered. A size guard may attach a read limit, in which
/// case status and headers stay accessible but reading the body fails.
#[derive(Debug, Clone)]
pub struct Response {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
    body_limit: Option<usize>,
    short_circuit: bool,
}

impl Response {
    /// Create an empty response with the given status.
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: Bytes::new(),
            body_limit: None,
            short_circuit: false,
        }
    }

    /// Create a `200 OK` response with a body.
    pub fn ok(body: impl Into<Bytes>) -> Self {
        Self::new(StatusCode::OK).with_body(body)
    }

    /// Create a `200 OK` response with a JSON body.
    pub fn json_body<T: Serialize>(value: &T) -> Result<Self> {
        let body = serde_json::to_vec(value)?;
        Self::ok(body).with_header("content-type", "application/json")
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Result<Self> {
        let name = HeaderName::from_bytes(name.as_bytes())?;
        let value = HeaderValue::from_str(value)?;
        self.headers.insert(name, value);
        Ok(self)
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Returns `true` for 2xx statuses.
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Returns `true` if the response carries a `no-cache` or `no-store`
    /// cache-control directive.
    pub fn forbids_caching(&self) -> bool {
        forbids_caching(&self.headers)
    }

    /// Attach a read limit; reading a larger body fails with
    /// [`HttpError::BodyTooLarge`].
    pub fn with_body_limit(mut self, limit: usize) -> Self {
        self.body_limit = Some(match self.body_limit {
            Some(existing) => existing.min(limit),
            None => limit,
        });
        self
    }

    pub fn body_limit(&self) -> Option<usize> {
        self.body_limit
    }

    /// Returns `true` if this response was synthesized by a circuit breaker
    /// instead of coming from the transport.
    pub fn is_short_circuit(&self) -> bool {
        self.short_circuit
    }

    pub(crate) fn mark_short_circuit(mut self) -> Self {
        self.short_circuit = true;
        self
    }

    /// Read the raw body.
    pub fn bytes(&self) -> Result<Bytes> {
        if let Some(limit) = self.body_limit {
            if self.body.len() > limit {
                return Err(HttpError::BodyTooLarge { limit });
            }
        }
        Ok(self.body.clone())
    }

    /// Read the body as UTF-8 text.
    pub fn text(&self) -> Result<String> {
        let bytes = self.bytes()?;
        String::from_utf8(bytes.to_vec()).map_err(|e| HttpError::Decode(e.to_string()))
    }

    /// Deserialize the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        let bytes = self.bytes()?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Deserialize the body as JSON and run a caller-supplied validator over
    /// the decoded value.
    pub fn json_validated<T, U, F>(&self, validate: F) -> Result<U>
    where
        T: DeserializeOwned,
        F: FnOnce(T) -> std::result::Result<U, String>,
    {
        let value: T = self.json()?;
        validate(value).map_err(HttpError::Validation)
    }
}

fn forbids_caching(headers: &HeaderMap) -> bool {
    headers
        .get_all(CACHE_CONTROL)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .any(|v| {
            let v = v.to_ascii_lowercase();
            v.contains("no-cache") || v.contains("no-store")
        })
}
