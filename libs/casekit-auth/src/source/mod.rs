//! Credential sources: the strategies the broker refreshes through.

mod connector;
mod oauth;

use async_trait::async_trait;
use time::OffsetDateTime;

use crate::credential::Credential;
use crate::error::AuthError;

pub use connector::ConnectorSource;
pub use oauth::OAuthRefreshSource;
pub(crate) use oauth::TokenEndpoint;

/// Something that can produce a fresh [`Credential`].
#[async_trait]
pub trait CredentialSource: Send + Sync {
    /// Short label used in logs and combined error messages.
    fn name(&self) -> &'static str;

    /// Whether credentials from this source should be written to the token
    /// store. Delegated short-lived tokens are not.
    fn persists(&self) -> bool {
        true
    }

    /// Obtain a new credential. `current` is the credential being replaced,
    /// if any; `now` stamps the result.
    ///
    /// # Errors
    /// Any [`AuthError`]; the broker moves on to the next source.
    async fn fetch(
        &self,
        current: Option<&Credential>,
        now: OffsetDateTime,
    ) -> Result<Credential, AuthError>;
}
