//! Custom TLS material: an extra trust anchor and a client identity.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use httpward_core::{Config, Plugin};

use crate::error::SetupError;
use crate::transport::{ReqwestTransport, Unavailable};

/// PEM files loaded into the network transport.
///
/// `cert_file` and `key_file` go together; either alone is rejected.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TlsConfig {
    /// Extra CA certificate trusted next to the built-in roots.
    pub ca_file: Option<PathBuf>,
    /// Client certificate chain.
    pub cert_file: Option<PathBuf>,
    /// Private key for `cert_file`.
    pub key_file: Option<PathBuf>,
}

impl TlsConfig {
    pub fn is_empty(&self) -> bool {
        self.ca_file.is_none() && self.cert_file.is_none() && self.key_file.is_none()
    }

    pub(crate) fn apply(
        &self,
        mut builder: reqwest::ClientBuilder,
    ) -> Result<reqwest::ClientBuilder, SetupError> {
        if let Some(path) = &self.ca_file {
            let pem = read(path)?;
            let cert = reqwest::Certificate::from_pem(&pem).map_err(|e| SetupError::Tls {
                path: path.clone(),
                reason: e.to_string(),
            })?;
            builder = builder.add_root_certificate(cert);
        }

        match (&self.cert_file, &self.key_file) {
            (Some(cert_path), Some(key_path)) => {
                let mut pem = read(cert_path)?;
                pem.push(b'\n');
                pem.extend_from_slice(&read(key_path)?);
                let identity = reqwest::Identity::from_pem(&pem).map_err(|e| SetupError::Tls {
                    path: cert_path.clone(),
                    reason: e.to_string(),
                })?;
                builder = builder.identity(identity);
            }
            (None, None) => {}
            _ => return Err(SetupError::IncompleteIdentity),
        }

        Ok(builder)
    }
}

fn read(path: &Path) -> Result<Vec<u8>, SetupError> {
    std::fs::read(path).map_err(|source| SetupError::Read {
        path: path.to_path_buf(),
        source,
    })
}

/// Install a network transport carrying the given TLS material.
///
/// With no files this is a no-op. Otherwise the configured transport is
/// replaced, so apply it before any wrapping policy. When the material cannot
/// be loaded every call fails with the load error instead of silently going
/// out without it.
pub fn with_tls(config: TlsConfig) -> impl Plugin {
    move |_: &Config| {
        if config.is_empty() {
            return Config::new();
        }
        match ReqwestTransport::builder().tls(config.clone()).build() {
            Ok(transport) => Config::new().with_transport(Arc::new(transport)),
            Err(e) => {
                tracing::error!(error = %e, "TLS material could not be loaded");
                Config::new().with_transport(Arc::new(Unavailable::new(e)))
            }
        }
    }
}
