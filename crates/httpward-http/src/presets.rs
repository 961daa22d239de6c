//! Network-aware presets.

use httpward_core::presets as core_presets;
use httpward_core::{chain, BoxPlugin, Plugin};

use crate::proxy::{with_proxy, ProxyConfig};
use crate::tls::{with_tls, TlsConfig};

/// Options for [`corporate_network`].
#[derive(Debug, Clone)]
pub struct CorporateNetworkOptions {
    /// Request id, timeout, size guard and retry settings.
    pub core: core_presets::CorporateNetworkOptions,
    pub proxy: ProxyConfig,
    pub tls: TlsConfig,
}

impl Default for CorporateNetworkOptions {
    fn default() -> Self {
        Self {
            core: core_presets::CorporateNetworkOptions::default(),
            proxy: ProxyConfig::from_env(),
            tls: TlsConfig::default(),
        }
    }
}

/// TLS material, proxy routing from the environment, then the core
/// corporate preset on top.
pub fn corporate_network(opts: CorporateNetworkOptions) -> impl Plugin {
    let mut proxy = opts.proxy;
    if proxy.tls.is_empty() {
        proxy.tls = opts.tls.clone();
    }
    let plugins: Vec<BoxPlugin> = vec![
        Box::new(with_tls(opts.tls)),
        Box::new(with_proxy(proxy)),
        Box::new(core_presets::corporate_network(opts.core)),
    ];
    chain(plugins)
}
