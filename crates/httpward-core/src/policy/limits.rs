//! Per-attempt timeout and response size guard.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::{Config, Plugin};
use crate::error::Result;
use crate::request::{Request, Response};
use crate::transport::{SharedTransport, Transport};

/// Abort any single attempt that runs longer than `timeout`.
pub fn with_timeout(timeout: Duration) -> impl Plugin {
    move |_: &Config| Config::new().with_timeout(timeout)
}

/// Attaches a read limit to every response. Status and headers stay
/// readable; reading a larger body fails with `BodyTooLarge`.
pub struct SizeGuardTransport {
    inner: SharedTransport,
    max_bytes: usize,
}

impl SizeGuardTransport {
    pub fn new(inner: SharedTransport, max_bytes: usize) -> Self {
        Self { inner, max_bytes }
    }
}

#[async_trait]
impl Transport for SizeGuardTransport {
    async fn send(&self, req: Request) -> Result<Response> {
        let resp = self.inner.send(req).await?;
        Ok(resp.with_body_limit(self.max_bytes))
    }

    fn name(&self) -> &str {
        "size-guard"
    }
}

/// Cap readable response bodies at `max_bytes`.
pub fn with_size_guard(max_bytes: usize) -> impl Plugin {
    move |base: &Config| {
        let transport = SizeGuardTransport::new(base.inner_transport(), max_bytes);
        Config::new().with_transport(Arc::new(transport))
    }
}
