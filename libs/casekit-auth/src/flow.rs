use std::sync::Arc;

use casekit_http::HttpClient;
use time::OffsetDateTime;
use url::Url;
use zeroize::Zeroizing;

use crate::config::OAuthConfig;
use crate::credential::Credential;
use crate::error::AuthError;
use crate::source::TokenEndpoint;
use crate::store::TokenStore;

/// One-time OAuth2 onboarding: authorization URL plus authorization-code
/// exchange. The resulting refresh token is what [`OAuthRefreshSource`]
/// later lives on.
///
/// [`OAuthRefreshSource`]: crate::OAuthRefreshSource
pub struct OAuthFlow {
    client_id: String,
    redirect_uri: Option<String>,
    authorize_url: Url,
    endpoint: TokenEndpoint,
    store: Arc<dyn TokenStore>,
}

impl OAuthFlow {
    /// # Errors
    /// `AuthError::ConfigError` when the registration is incomplete.
    pub fn new(
        client: HttpClient,
        config: &OAuthConfig,
        store: Arc<dyn TokenStore>,
    ) -> Result<Self, AuthError> {
        let (authorize_url, token_url) = config.validate()?;
        Ok(Self {
            client_id: config.client_id.clone(),
            redirect_uri: config.redirect_uri.clone(),
            authorize_url,
            endpoint: TokenEndpoint::new(client, token_url, config),
            store,
        })
    }

    /// URL the user visits to grant offline access.
    #[must_use]
    pub fn authorize_url(&self, state: Option<&str>) -> Url {
        let mut url = self.authorize_url.clone();
        {
            let mut q = url.query_pairs_mut();
            q.append_pair("client_id", &self.client_id)
                .append_pair("response_type", "code")
                .append_pair("token_access_type", "offline");
            if let Some(redirect) = &self.redirect_uri {
                q.append_pair("redirect_uri", redirect);
            }
            if let Some(state) = state {
                q.append_pair("state", state);
            }
        }
        url
    }

    /// Exchange an authorization code and persist the resulting credential.
    ///
    /// # Errors
    /// `AuthError::Http` / `InvalidResponse` from the token endpoint,
    /// `AuthError::Store` if persisting fails.
    pub async fn exchange_code(&self, code: &str) -> Result<Credential, AuthError> {
        let code = Zeroizing::new(code.trim().to_owned());
        let mut fields = vec![
            ("grant_type", "authorization_code"),
            ("code", code.as_str()),
        ];
        if let Some(redirect) = &self.redirect_uri {
            fields.push(("redirect_uri", redirect.as_str()));
        }

        let credential = self
            .endpoint
            .grant(&fields, None, OffsetDateTime::now_utc(), "OAuth2 code exchange")
            .await?;
        if credential.refresh_token.is_none() {
            tracing::warn!("code exchange returned no refresh token; offline access was not granted");
        }
        self.store.save(&credential).await?;
        tracing::info!("storage provider connected");
        Ok(credential)
    }

    /// Whether a refresh token is stored.
    ///
    /// # Errors
    /// `AuthError::Store` if the store cannot be read.
    pub async fn is_connected(&self) -> Result<bool, AuthError> {
        Ok(self
            .store
            .load()
            .await?
            .is_some_and(|c| c.refresh_token.is_some()))
    }

    /// Forget the stored credential.
    ///
    /// # Errors
    /// `AuthError::Store` if the store cannot be cleared.
    pub async fn disconnect(&self) -> Result<(), AuthError> {
        self.store.clear().await?;
        tracing::info!("storage provider disconnected");
        Ok(())
    }
}
