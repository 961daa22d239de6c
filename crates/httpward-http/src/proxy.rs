//! Per-request proxy routing.
//!
//! Each request is routed either directly, through the transport that was
//! configured before this policy, or through a proxied reqwest transport.
//! Bypass rules are checked first, then the per-host map, then the
//! scheme's proxy from the environment.
//!
//! NO_PROXY entries understood:
//! - `*` bypasses everything
//! - `example.com` matches that host only
//! - `.example.com` and `*.example.com` match the domain and its subdomains
//! - `10.0.0.0/8`, `fd00::/8` match addresses inside the range; a bare IP
//!   matches itself

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;

use async_trait::async_trait;
use httpward_core::{Config, Plugin, Request, Response, SharedTransport, Transport};
use parking_lot::Mutex;
use url::Url;

use crate::tls::TlsConfig;
use crate::transport::ReqwestTransport;

/// Proxy routing options.
#[derive(Debug, Clone, Default)]
pub struct ProxyConfig {
    /// Host to proxy URL. Hosts are matched case-insensitively.
    pub per_host: HashMap<String, String>,
    /// Bypass entries. `None` falls back to `NO_PROXY` when `use_env` is set.
    pub no_proxy: Option<Vec<String>>,
    /// Read `HTTP_PROXY`, `HTTPS_PROXY` and `NO_PROXY` (either case).
    pub use_env: bool,
    /// TLS material for proxied transports.
    pub tls: TlsConfig,
}

impl ProxyConfig {
    /// Routing driven entirely by the environment.
    pub fn from_env() -> Self {
        Self {
            use_env: true,
            ..Default::default()
        }
    }
}

/// Where a request goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Direct,
    Proxy(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Bypass {
    Any,
    Host(String),
    Domain(String),
    Network(IpAddr, u8),
}

impl Bypass {
    fn parse(entry: &str) -> Option<Self> {
        let entry = entry.trim().to_ascii_lowercase();
        if entry.is_empty() {
            return None;
        }
        if entry == "*" {
            return Some(Self::Any);
        }
        if let Some((addr, prefix)) = entry.split_once('/') {
            let addr: IpAddr = addr.parse().ok()?;
            let prefix: u8 = prefix.parse().ok()?;
            return Some(Self::Network(addr, prefix.min(max_prefix(&addr))));
        }
        if let Ok(addr) = entry.trim_matches(['[', ']']).parse::<IpAddr>() {
            return Some(Self::Network(addr, max_prefix(&addr)));
        }
        if let Some(domain) = entry.strip_prefix("*.").or_else(|| entry.strip_prefix('.')) {
            return Some(Self::Domain(domain.to_string()));
        }
        Some(Self::Host(entry))
    }

    fn matches(&self, host: &str, addr: Option<IpAddr>) -> bool {
        match self {
            Self::Any => true,
            Self::Host(h) => h == host,
            Self::Domain(d) => {
                host == d
                    || host
                        .strip_suffix(d.as_str())
                        .is_some_and(|rest| rest.ends_with('.'))
            }
            Self::Network(net, prefix) => addr.is_some_and(|a| in_network(a, *net, *prefix)),
        }
    }
}

fn max_prefix(addr: &IpAddr) -> u8 {
    match addr {
        IpAddr::V4(_) => 32,
        IpAddr::V6(_) => 128,
    }
}

fn in_network(addr: IpAddr, net: IpAddr, prefix: u8) -> bool {
    if prefix == 0 {
        return addr.is_ipv4() == net.is_ipv4();
    }
    match (addr, net) {
        (IpAddr::V4(a), IpAddr::V4(n)) => {
            let mask = u32::MAX << (32 - u32::from(prefix));
            u32::from(a) & mask == u32::from(n) & mask
        }
        (IpAddr::V6(a), IpAddr::V6(n)) => {
            let mask = u128::MAX << (128 - u32::from(prefix));
            u128::from(a) & mask == u128::from(n) & mask
        }
        _ => false,
    }
}

/// Resolved routing table.
#[derive(Debug, Clone, Default)]
pub struct ProxyRules {
    per_host: HashMap<String, String>,
    bypass: Vec<Bypass>,
    http: Option<String>,
    https: Option<String>,
}

impl ProxyRules {
    /// Resolve `config`, reading the process environment when `use_env` is set.
    pub fn new(config: &ProxyConfig) -> Self {
        Self::with_env(config, |name| std::env::var(name).ok())
    }

    /// Resolve `config` against a custom variable lookup.
    pub fn with_env(config: &ProxyConfig, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let env = |upper: &str| {
            if !config.use_env {
                return None;
            }
            lookup(upper)
                .or_else(|| lookup(&upper.to_ascii_lowercase()))
                .filter(|v| !v.trim().is_empty())
        };

        let bypass = match &config.no_proxy {
            Some(entries) => entries.iter().filter_map(|e| Bypass::parse(e)).collect(),
            None => env("NO_PROXY")
                .map(|list| list.split(',').filter_map(Bypass::parse).collect())
                .unwrap_or_default(),
        };

        Self {
            per_host: config
                .per_host
                .iter()
                .map(|(host, proxy)| (host.to_ascii_lowercase(), proxy.clone()))
                .collect(),
            bypass,
            http: env("HTTP_PROXY"),
            https: env("HTTPS_PROXY"),
        }
    }

    pub fn route(&self, url: &Url) -> Route {
        let host = url
            .host_str()
            .unwrap_or("")
            .trim_matches(['[', ']'])
            .to_ascii_lowercase();
        let addr = host.parse::<IpAddr>().ok();

        if self.bypass.iter().any(|rule| rule.matches(&host, addr)) {
            return Route::Direct;
        }
        if let Some(proxy) = self.per_host.get(&host) {
            return Route::Proxy(proxy.clone());
        }
        let from_env = match url.scheme() {
            "https" => self.https.as_ref(),
            "http" => self.http.as_ref(),
            _ => None,
        };
        match from_env {
            Some(proxy) => Route::Proxy(proxy.clone()),
            None => Route::Direct,
        }
    }
}

/// Routes each request directly or through a proxy.
///
/// One proxied transport is built per distinct proxy URL, on first use.
pub struct ProxyTransport {
    direct: SharedTransport,
    rules: ProxyRules,
    tls: TlsConfig,
    proxied: Mutex<HashMap<String, SharedTransport>>,
}

impl ProxyTransport {
    pub fn new(direct: SharedTransport, rules: ProxyRules, tls: TlsConfig) -> Self {
        Self {
            direct,
            rules,
            tls,
            proxied: Mutex::new(HashMap::new()),
        }
    }

    pub fn rules(&self) -> &ProxyRules {
        &self.rules
    }

    fn proxied(&self, proxy: &str) -> httpward_core::Result<SharedTransport> {
        let mut proxied = self.proxied.lock();
        if let Some(transport) = proxied.get(proxy) {
            return Ok(transport.clone());
        }
        let transport: SharedTransport = Arc::new(
            ReqwestTransport::builder()
                .proxy(proxy)
                .tls(self.tls.clone())
                .build()?,
        );
        proxied.insert(proxy.to_string(), transport.clone());
        Ok(transport)
    }
}

#[async_trait]
impl Transport for ProxyTransport {
    async fn send(&self, req: Request) -> httpward_core::Result<Response> {
        match self.rules.route(req.url()) {
            Route::Direct => self.direct.send(req).await,
            Route::Proxy(proxy) => {
                tracing::debug!(host = req.host(), proxy = %proxy, "routing through proxy");
                let transport = self.proxied(&proxy)?;
                transport.send(req).await
            }
        }
    }

    fn name(&self) -> &str {
        "proxy"
    }
}

/// Route requests through proxies per host, honouring bypass rules.
///
/// Bypassed and unproxied requests go to the transport configured before
/// this policy.
pub fn with_proxy(config: ProxyConfig) -> impl Plugin {
    move |base: &Config| {
        let rules = ProxyRules::new(&config);
        let transport = ProxyTransport::new(base.inner_transport(), rules, config.tls.clone());
        Config::new().with_transport(Arc::new(transport))
    }
}
