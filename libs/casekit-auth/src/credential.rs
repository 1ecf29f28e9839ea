use std::fmt;
use std::time::Duration;

use casekit_utils::SecretString;
use time::OffsetDateTime;

/// A bearer credential for the storage backend.
///
/// Replaced as a whole on refresh; never patched in place.
#[derive(Clone)]
pub struct Credential {
    pub access_token: SecretString,
    pub refresh_token: Option<SecretString>,
    pub issued_at: OffsetDateTime,
    /// Lifetime announced by the issuer. `None` means the issuer gave no
    /// expiry and the token is treated as long-lived.
    pub ttl_seconds: Option<u64>,
    pub refreshed_at: Option<OffsetDateTime>,
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("access_token", &self.access_token)
            .field("has_refresh_token", &self.refresh_token.is_some())
            .field("issued_at", &self.issued_at)
            .field("ttl_seconds", &self.ttl_seconds)
            .field("refreshed_at", &self.refreshed_at)
            .finish()
    }
}

impl Credential {
    #[must_use]
    pub fn new(access_token: SecretString, issued_at: OffsetDateTime) -> Self {
        Self {
            access_token,
            refresh_token: None,
            issued_at,
            ttl_seconds: None,
            refreshed_at: None,
        }
    }

    #[must_use]
    pub fn with_refresh_token(mut self, refresh_token: Option<SecretString>) -> Self {
        self.refresh_token = refresh_token;
        self
    }

    #[must_use]
    pub fn with_ttl(mut self, ttl_seconds: Option<u64>) -> Self {
        self.ttl_seconds = ttl_seconds;
        self
    }

    /// Near expiry once `now - issued_at` exceeds `ttl - margin`.
    ///
    /// A credential whose TTL is smaller than the margin is always near
    /// expiry. Without a TTL it never is.
    #[must_use]
    pub fn is_near_expiry(&self, now: OffsetDateTime, margin: Duration) -> bool {
        let Some(ttl) = self.ttl_seconds else {
            return false;
        };
        let usable = i128::from(ttl) - i128::from(margin.as_secs());
        // clock skew: an issue time in the future counts as just issued
        let elapsed = i128::from((now - self.issued_at).whole_seconds().max(0));
        elapsed > usable
    }

    #[must_use]
    pub fn expires_at(&self) -> Option<OffsetDateTime> {
        let secs = i64::try_from(self.ttl_seconds?).ok()?;
        self.issued_at.checked_add(time::Duration::seconds(secs))
    }
}
