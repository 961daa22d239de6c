//! Errors raised while building network transports.

use std::path::PathBuf;

use httpward_core::HttpError;
use thiserror::Error;

/// Failures that happen while setting up a transport, before any request is
/// sent.
#[derive(Debug, Error)]
pub enum SetupError {
    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),

    #[error("failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid TLS material in {}: {reason}", .path.display())]
    Tls { path: PathBuf, reason: String },

    #[error("TLS client key given without a certificate (or the reverse)")]
    IncompleteIdentity,

    #[error("invalid proxy URL {url}: {reason}")]
    Proxy { url: String, reason: String },

    #[error("failed to initialise logging: {0}")]
    Logging(String),
}

impl From<SetupError> for HttpError {
    fn from(e: SetupError) -> Self {
        HttpError::Setup(e.to_string())
    }
}
