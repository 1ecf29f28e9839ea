use std::time::Duration;

use serde::Deserialize;

/// Default User-Agent sent with every request.
pub const DEFAULT_USER_AGENT: &str = concat!("casevault/", env!("CARGO_PKG_VERSION"));

/// Which root certificates the TLS connector trusts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TlsRootConfig {
    /// Mozilla roots bundled through `webpki-roots`.
    #[default]
    WebPki,
    /// Roots from the operating system certificate store.
    Native,
}

/// Transport security mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TransportSecurity {
    /// Require TLS for all connections.
    #[default]
    TlsOnly,
    /// Allow plain `http://` URLs.
    ///
    /// Only meant for local mock servers in tests.
    AllowInsecureHttp,
}

/// HTTP client configuration.
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    /// Timeout applied to a single request, including reading the body.
    pub request_timeout: Duration,
    /// Largest response body that will be buffered.
    pub max_body_size: usize,
    pub user_agent: String,
    pub tls_roots: TlsRootConfig,
    pub transport: TransportSecurity,
    /// Idle pooled connections are closed after this long (`None` keeps them).
    pub pool_idle_timeout: Option<Duration>,
    pub pool_max_idle_per_host: usize,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            max_body_size: 64 * 1024 * 1024,
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            tls_roots: TlsRootConfig::default(),
            transport: TransportSecurity::default(),
            pool_idle_timeout: Some(Duration::from_secs(90)),
            pool_max_idle_per_host: 8,
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_tls_only() {
        let cfg = HttpClientConfig::default();
        assert_eq!(cfg.transport, TransportSecurity::TlsOnly);
        assert_eq!(cfg.request_timeout, Duration::from_secs(30));
        assert!(cfg.user_agent.starts_with("casevault/"));
    }

    #[test]
    fn tls_roots_deserialize_by_name() {
        let roots: TlsRootConfig = serde_json::from_str(r#""native""#).unwrap();
        assert_eq!(roots, TlsRootConfig::Native);
        let roots: TlsRootConfig = serde_json::from_str(r#""web_pki""#).unwrap();
        assert_eq!(roots, TlsRootConfig::WebPki);
        assert_eq!(TlsRootConfig::default(), TlsRootConfig::WebPki);
    }
}
