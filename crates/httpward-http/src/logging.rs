//! `tracing-subscriber` setup for applications that use httpward.
//!
//! The filter starts from two levels: one for httpward's own crates and one
//! for everything else (reqwest, hyper, the application). Per-target
//! overrides come last so they win. When `RUST_LOG` is set and
//! [`LogConfig::env_override`] is on, it replaces the computed filter.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::error::SetupError;

/// Tracing targets owned by httpward.
pub const HTTPWARD_TARGETS: [&str; 2] = ["httpward_core", "httpward_http"];

/// Output encoding of log lines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Level for httpward's own targets.
    pub httpward: String,
    /// Level for every other target.
    pub others: String,
    /// Extra `target = level` pairs. Dashes in crate names are accepted.
    pub targets: BTreeMap<String, String>,
    pub format: LogFormat,
    /// Let a non-empty `RUST_LOG` take precedence over the fields above.
    pub env_override: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            httpward: "info".to_string(),
            others: "warn".to_string(),
            targets: BTreeMap::new(),
            format: LogFormat::Text,
            env_override: true,
        }
    }
}

impl LogConfig {
    /// Verbose httpward output; other crates stay at `warn`.
    pub fn debug() -> Self {
        Self {
            httpward: "debug".to_string(),
            ..Self::default()
        }
    }

    /// Filter directives, e.g. `"warn,httpward_core=info,httpward_http=info"`.
    pub fn directives(&self) -> String {
        let mut directives = vec![self.others.clone()];
        directives.extend(
            HTTPWARD_TARGETS
                .iter()
                .map(|target| format!("{target}={}", self.httpward)),
        );
        directives.extend(
            self.targets
                .iter()
                .map(|(target, level)| format!("{}={level}", target.replace('-', "_"))),
        );
        directives.join(",")
    }

    /// Build the filter. Bad directives are an error rather than a silent
    /// fallback, so a typo in configuration is caught at startup.
    pub fn filter(&self) -> Result<EnvFilter, SetupError> {
        if self.env_override {
            if let Some(filter) = env_filter() {
                return Ok(filter);
            }
        }
        EnvFilter::try_new(self.directives()).map_err(|e| {
            SetupError::Logging(format!("invalid directives {:?}: {e}", self.directives()))
        })
    }
}

fn env_filter() -> Option<EnvFilter> {
    let raw = std::env::var(EnvFilter::DEFAULT_ENV).ok()?;
    if raw.trim().is_empty() {
        return None;
    }
    EnvFilter::try_new(raw).ok()
}

/// Install the global subscriber. Call once at startup; a second call fails.
pub fn init_tracing(config: &LogConfig) -> Result<(), SetupError> {
    let filter = config.filter()?;
    let registry = tracing_subscriber::registry().with(filter);
    let installed = match config.format {
        LogFormat::Text => registry.with(fmt::layer().with_target(true)).try_init(),
        LogFormat::Json => registry
            .with(fmt::layer().json().flatten_event(true).with_current_span(false))
            .try_init(),
    };
    installed.map_err(|e| SetupError::Logging(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_env() -> LogConfig {
        LogConfig {
            env_override: false,
            ..LogConfig::default()
        }
    }

    #[test]
    fn defaults_cover_own_targets() {
        assert_eq!(
            no_env().directives(),
            "warn,httpward_core=info,httpward_http=info"
        );
        assert!(LogConfig::debug().directives().contains("httpward_http=debug"));
    }

    #[test]
    fn target_overrides_come_last() {
        let config = LogConfig {
            others: "error".into(),
            targets: BTreeMap::from([
                ("reqwest".to_string(), "debug".to_string()),
                ("httpward-core".to_string(), "trace".to_string()),
            ]),
            ..no_env()
        };
        assert_eq!(
            config.directives(),
            "error,httpward_core=info,httpward_http=info,httpward_core=trace,reqwest=debug"
        );
    }

    #[test]
    fn invalid_level_is_reported() {
        let config = LogConfig {
            httpward: "loud".into(),
            ..no_env()
        };
        match config.filter() {
            Err(SetupError::Logging(msg)) => assert!(msg.contains("httpward_core=loud")),
            other => panic!("expected logging error, got {other:?}"),
        }
    }

    #[test]
    fn deserializes_with_defaults() {
        let config: LogConfig = serde_json::from_str(r#"{"format": "json"}"#).unwrap();
        assert_eq!(config.format, LogFormat::Json);
        assert_eq!(config.httpward, "info");
        assert_eq!(config.others, "warn");
        assert!(config.env_override);
    }

    #[test]
    fn second_init_fails() {
        let config = no_env();
        let _ = init_tracing(&config);
        assert!(matches!(init_tracing(&config), Err(SetupError::Logging(_))));
    }
}
