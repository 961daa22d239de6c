//! Correlation id header on every outgoing request.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use crate::config::{Config, Plugin};
use crate::error::Result;
use crate::hooks::{BeforeRequest, Hooks};
use crate::request::Request;

type IdFn = Arc<dyn Fn() -> String + Send + Sync>;

#[derive(Clone)]
pub struct RequestIdConfig {
    pub header: String,
    /// Replaces the UUID v4 generator.
    pub generator: Option<IdFn>,
}

impl Default for RequestIdConfig {
    fn default() -> Self {
        Self {
            header: "X-Request-ID".to_string(),
            generator: None,
        }
    }
}

impl RequestIdConfig {
    pub fn generator(mut self, f: impl Fn() -> String + Send + Sync + 'static) -> Self {
        self.generator = Some(Arc::new(f));
        self
    }
}

impl fmt::Debug for RequestIdConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestIdConfig")
            .field("header", &self.header)
            .field("generator", &self.generator.as_ref().map(|_| "custom"))
            .finish()
    }
}

struct StampRequestId {
    config: RequestIdConfig,
}

#[async_trait]
impl BeforeRequest for StampRequestId {
    async fn before_request(&self, req: &mut Request) -> Result<()> {
        if req.header(&self.config.header).is_some() {
            return Ok(());
        }
        let id = match &self.config.generator {
            Some(f) => f(),
            None => Uuid::new_v4().to_string(),
        };
        req.set_header(&self.config.header, &id)
    }
}

/// Set the request id header when the caller did not supply one.
pub fn with_request_id(config: RequestIdConfig) -> impl Plugin {
    move |_: &Config| {
        Config::new().with_hooks(Hooks::new().on_before_request(StampRequestId {
            config: config.clone(),
        }))
    }
}
