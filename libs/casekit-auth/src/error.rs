use thiserror::Error;

/// Errors raised by the credential lifecycle.
///
/// No variant ever carries a token or client secret; HTTP failures are
/// rendered through `format_http_error`, which drops response bodies.
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum AuthError {
    /// No credential source is configured at all.
    #[error("credentials unavailable: {0}")]
    Unavailable(String),

    /// Every configured source failed to produce a credential.
    #[error("credential refresh failed: {0}")]
    Refresh(String),

    /// Nothing to refresh from: no stored refresh token.
    #[error("not connected: {0}")]
    NotConnected(String),

    /// HTTP transport or status error while talking to an auth endpoint.
    #[error("{0}")]
    Http(String),

    /// The endpoint answered with something we could not use.
    #[error("invalid token response: {0}")]
    InvalidResponse(String),

    #[error("unsupported token type: {0}")]
    UnsupportedTokenType(String),

    #[error("auth config error: {0}")]
    ConfigError(String),

    /// Token store could not be read or written.
    #[error("token store error: {0}")]
    Store(String),
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn refresh_renders() {
        let e = AuthError::Refresh("oauth: not connected; connector: HTTP 500".into());
        assert_eq!(
            e.to_string(),
            "credential refresh failed: oauth: not connected; connector: HTTP 500"
        );
    }

    #[test]
    fn unavailable_renders() {
        let e = AuthError::Unavailable("no credential source configured".into());
        assert_eq!(
            e.to_string(),
            "credentials unavailable: no credential source configured"
        );
    }

    #[test]
    fn store_renders() {
        let e = AuthError::Store("permission denied".into());
        assert_eq!(e.to_string(), "token store error: permission denied");
    }
}
