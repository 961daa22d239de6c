//! httpward-http: network transport and environment plumbing for httpward.
//!
//! - [`ReqwestTransport`]: the default transport, backed by `reqwest` (rustls)
//! - [`proxy::with_proxy`]: per-host proxies with NO_PROXY host and CIDR bypass
//! - [`tls::with_tls`]: extra CA and client identity from PEM files
//! - [`logging::init_tracing`]: `tracing-subscriber` setup from a [`LogConfig`]
//! - [`presets::corporate_network`]: the core corporate preset plus proxy and TLS
//!
//! ```no_run
//! use httpward_core::policy::{with_retry_smart, RetryConfig};
//! use httpward_core::{BoxPlugin, Config};
//!
//! # async fn demo() -> anyhow::Result<()> {
//! let plugins: Vec<BoxPlugin> = vec![Box::new(with_retry_smart(RetryConfig::default()))];
//! let client = httpward_http::create_client(
//!     Config::new().with_base_url("https://api.example.com"),
//!     plugins,
//! )?;
//! let body = client.get("status").text().await?;
//! # let _ = body;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod logging;
pub mod presets;
pub mod proxy;
pub mod tls;
pub mod transport;

use std::sync::Arc;

use httpward_core::{BoxPlugin, Client, Config};

pub use error::SetupError;
pub use logging::{init_tracing, LogConfig, LogFormat};
pub use proxy::{with_proxy, ProxyConfig, ProxyRules, ProxyTransport, Route};
pub use tls::{with_tls, TlsConfig};
pub use transport::{ReqwestTransport, ReqwestTransportBuilder};

/// Compose `plugins` over `base`, installing a direct [`ReqwestTransport`]
/// first when `base` has no transport.
pub fn create_client(base: Config, plugins: Vec<BoxPlugin>) -> Result<Client, SetupError> {
    let base = match base.transport() {
        Some(_) => base,
        None => base.with_transport(Arc::new(ReqwestTransport::new()?)),
    };
    Ok(httpward_core::create_client(base, plugins))
}
