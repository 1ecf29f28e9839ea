//! Storage gateway configuration.

use std::time::Duration;

use casekit_http::TlsRootConfig;
use serde::Deserialize;
use thiserror::Error;

/// Rejected configuration values.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid root namespace '{root}': {reason}")]
    InvalidRoot { root: String, reason: &'static str },

    #[error("invalid health segment '{segment}'")]
    InvalidHealthSegment { segment: String },

    #[error("retry: {0}")]
    Retry(&'static str),

    #[error("invalid {field} url '{url}'")]
    InvalidUrl { field: &'static str, url: String },
}

/// Storage gateway configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GatewayConfig {
    /// Root namespace every path is confined to.
    pub root: String,
    /// Diagnostic folder below the root, exempt from the dot-segment ban.
    pub health_segment: String,

    #[serde(with = "casekit_utils::humantime_serde")]
    pub list_cache_ttl: Duration,
    /// Reads are only cached when set.
    #[serde(with = "casekit_utils::humantime_serde::option")]
    pub read_cache_ttl: Option<Duration>,
    /// How long a constructed backend handle is reused.
    #[serde(with = "casekit_utils::humantime_serde")]
    pub client_ttl: Duration,

    pub search_max_results: u32,

    pub retry: RetryConfig,
    pub dropbox: DropboxConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            root: "/CASES".to_owned(),
            health_segment: ".health".to_owned(),
            list_cache_ttl: Duration::from_secs(300),
            read_cache_ttl: None,
            client_ttl: Duration::from_secs(300),
            search_max_results: 1000,
            retry: RetryConfig::default(),
            dropbox: DropboxConfig::default(),
        }
    }
}

/// Backoff schedule for retryable backend failures.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetryConfig {
    /// Delay before attempt `n + 1` is `delays[n - 1]`; the last value
    /// repeats if `max_attempts` outruns the list.
    #[serde(with = "casekit_utils::humantime_serde::vec")]
    pub delays: Vec<Duration>,
    /// Total attempts including the first.
    pub max_attempts: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            delays: vec![
                Duration::from_millis(200),
                Duration::from_millis(600),
                Duration::from_millis(1500),
            ],
            max_attempts: 3,
        }
    }
}

impl RetryConfig {
    /// # Errors
    /// `ConfigError::Retry` when no attempt would be made or there is no delay to use.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::Retry("max_attempts must be at least 1"));
        }
        if self.max_attempts > 1 && self.delays.is_empty() {
            return Err(ConfigError::Retry("delays must not be empty"));
        }
        Ok(())
    }
}

/// Dropbox HTTP API endpoints and limits.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DropboxConfig {
    pub api_base: String,
    pub content_base: String,
    #[serde(with = "casekit_utils::humantime_serde")]
    pub request_timeout: Duration,
    pub max_body_size: usize,
    /// Root store for TLS: `web_pki` (bundled Mozilla roots) or `native`.
    pub tls_roots: TlsRootConfig,
}

impl Default for DropboxConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.dropboxapi.com".to_owned(),
            content_base: "https://content.dropboxapi.com".to_owned(),
            request_timeout: Duration::from_secs(30),
            max_body_size: 100 * 1024 * 1024,
            tls_roots: TlsRootConfig::WebPki,
        }
    }
}

impl DropboxConfig {
    /// # Errors
    /// `ConfigError::InvalidUrl` when a base is not an absolute http(s) URL.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, url) in [("api_base", &self.api_base), ("content_base", &self.content_base)] {
            let parsed: Result<http::Uri, _> = url.parse();
            let ok = parsed.is_ok_and(|u| {
                matches!(u.scheme_str(), Some("http" | "https")) && u.host().is_some()
            });
            if !ok {
                return Err(ConfigError::InvalidUrl {
                    field,
                    url: url.clone(),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = GatewayConfig::default();
        assert_eq!(cfg.root, "/CASES");
        assert_eq!(cfg.list_cache_ttl, Duration::from_secs(300));
        assert_eq!(cfg.client_ttl, Duration::from_secs(300));
        assert!(cfg.read_cache_ttl.is_none());
        assert_eq!(cfg.retry.max_attempts, 3);
        assert_eq!(cfg.retry.delays[0], Duration::from_millis(200));
        assert_eq!(cfg.search_max_results, 1000);
    }

    #[test]
    fn humantime_fields_deserialize() {
        let cfg: GatewayConfig = serde_json::from_value(json!({
            "root": "/Clients",
            "list_cache_ttl": "30s",
            "read_cache_ttl": "1m",
            "retry": { "delays": ["10ms", "20ms"], "max_attempts": 2 }
        }))
        .unwrap();
        assert_eq!(cfg.root, "/Clients");
        assert_eq!(cfg.list_cache_ttl, Duration::from_secs(30));
        assert_eq!(cfg.read_cache_ttl, Some(Duration::from_secs(60)));
        assert_eq!(
            cfg.retry.delays,
            vec![Duration::from_millis(10), Duration::from_millis(20)]
        );
        assert_eq!(cfg.dropbox.api_base, "https://api.dropboxapi.com");
        assert_eq!(cfg.dropbox.tls_roots, TlsRootConfig::WebPki);
    }

    #[test]
    fn native_tls_roots_are_selectable() {
        let cfg: GatewayConfig =
            serde_json::from_value(json!({ "dropbox": { "tls_roots": "native" } })).unwrap();
        assert_eq!(cfg.dropbox.tls_roots, TlsRootConfig::Native);
        assert!(
            serde_json::from_value::<GatewayConfig>(json!({ "dropbox": { "tls_roots": "system" } }))
                .is_err()
        );
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let res: Result<GatewayConfig, _> = serde_json::from_value(json!({ "rooot": "/X" }));
        assert!(res.is_err());
    }

    #[test]
    fn retry_validation() {
        let mut cfg = RetryConfig::default();
        assert!(cfg.validate().is_ok());
        cfg.max_attempts = 0;
        assert!(cfg.validate().is_err());
        cfg.max_attempts = 2;
        cfg.delays.clear();
        assert!(cfg.validate().is_err());
        cfg.max_attempts = 1;
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn dropbox_urls_are_validated() {
        assert!(DropboxConfig::default().validate().is_ok());
        let cfg = DropboxConfig {
            api_base: "api.dropboxapi.com".to_owned(),
            ..DropboxConfig::default()
        };
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::InvalidUrl { field: "api_base", .. })
        ));
    }
}
