//! Outbound request policy: header blocklist and best-effort HMAC signing.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::config::{Config, Plugin};
use crate::error::{HttpError, Result};
use crate::hooks::{BeforeRequest, Hooks};
use crate::request::Request;

type HmacSha256 = Hmac<Sha256>;

type KeyProvider = Arc<dyn Fn() -> BoxFuture<'static, Result<String>> + Send + Sync>;

/// Signs `"{METHOD} {url}"` with HMAC-SHA256 into `header` (lowercase hex).
#[derive(Clone)]
pub struct SigningConfig {
    pub header: String,
    key: KeyProvider,
}

impl SigningConfig {
    pub fn new<F, Fut>(header: impl Into<String>, key: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<String>> + Send + 'static,
    {
        Self {
            header: header.into(),
            key: Arc::new(move || -> BoxFuture<'static, Result<String>> { Box::pin(key()) }),
        }
    }
}

impl fmt::Debug for SigningConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningConfig")
            .field("header", &self.header)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Default)]
pub struct RequestPolicyConfig {
    /// Headers removed from every request (case-insensitive).
    pub block_headers: Vec<String>,
    pub sign: Option<SigningConfig>,
}

/// Hex HMAC-SHA256 of `message` under `key`.
pub fn sign_message(key: &str, message: &str) -> Result<String> {
    let mut mac = HmacSha256::new_from_slice(key.as_bytes())
        .map_err(|e| HttpError::Hook(format!("invalid signing key: {e}")))?;
    mac.update(message.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

struct EnforcePolicy {
    config: RequestPolicyConfig,
}

impl EnforcePolicy {
    async fn sign(&self, signing: &SigningConfig, req: &mut Request) -> Result<()> {
        let key = (signing.key)().await?;
        let signature = sign_message(&key, &format!("{} {}", req.method(), req.url()))?;
        req.set_header(&signing.header, &signature)
    }
}

#[async_trait]
impl BeforeRequest for EnforcePolicy {
    async fn before_request(&self, req: &mut Request) -> Result<()> {
        for name in &self.config.block_headers {
            req.headers_mut().remove(name.as_str());
        }
        if let Some(signing) = &self.config.sign {
            if let Err(e) = self.sign(signing, req).await {
                tracing::warn!(error = %e, header = %signing.header, "request signing skipped");
            }
        }
        Ok(())
    }
}

/// Strip blocked headers and, when configured, sign each request.
pub fn with_policy(config: RequestPolicyConfig) -> impl Plugin {
    move |_: &Config| {
        Config::new().with_hooks(Hooks::new().on_before_request(EnforcePolicy {
            config: config.clone(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::Client;
    use crate::request::Response;
    use crate::transport::transport_fn;

    fn echo_headers() -> Config {
        Config::new()
            .with_base_url("http://policy.test")
            .with_transport(transport_fn(|req: Request| async move {
                Response::json_body(&serde_json::json!({
                    "sensitive": req.header("sensitive").is_some(),
                    "sig": req.header("x-sig"),
                }))
            }))
    }

    #[test]
    fn known_hmac_vector() {
        let sig = sign_message("key", "The quick brown fox jumps over the lazy dog").unwrap();
        assert_eq!(sig, "f7bc83f430538424b13298e6aa6fb143ef4d59a14946175997479dbc2d1a3cd8");
    }

    #[tokio::test]
    async fn strips_blocked_headers() {
        let client = Client::builder(echo_headers())
            .plugin(with_policy(RequestPolicyConfig {
                block_headers: vec!["Sensitive".into()],
                sign: None,
            }))
            .build();
        let body: serde_json::Value = client
            .get("hdr")
            .header("sensitive", "secret")
            .json()
            .await
            .unwrap();
        assert_eq!(body["sensitive"], false);
    }

    #[tokio::test]
    async fn signs_method_and_url() {
        let client = Client::builder(echo_headers())
            .plugin(with_policy(RequestPolicyConfig {
                block_headers: vec![],
                sign: Some(SigningConfig::new("x-sig", || async { Ok("key".to_string()) })),
            }))
            .build();
        let body: serde_json::Value = client.get("hdr").json().await.unwrap();
        let expected = sign_message("key", "GET http://policy.test/hdr").unwrap();
        assert_eq!(body["sig"], expected);
    }

    #[tokio::test]
    async fn key_failure_degrades_to_unsigned() {
        let client = Client::builder(echo_headers())
            .plugin(with_policy(RequestPolicyConfig {
                block_headers: vec![],
                sign: Some(SigningConfig::new("x-sig", || async {
                    Err::<String, _>(HttpError::Hook("vault unavailable".into()))
                })),
            }))
            .build();
        let body: serde_json::Value = client.get("hdr").json().await.unwrap();
        assert!(body["sig"].is_null());
    }
}
