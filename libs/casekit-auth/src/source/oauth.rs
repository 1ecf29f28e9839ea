use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose};
use casekit_http::HttpClient;
use casekit_utils::SecretString;
use serde::Deserialize;
use time::OffsetDateTime;
use url::Url;
use zeroize::Zeroizing;

use super::CredentialSource;
use crate::config::OAuthConfig;
use crate::credential::Credential;
use crate::error::AuthError;
use crate::http_error::http_err;

/// Token endpoint response. Deliberately `Deserialize`-only.
#[derive(Deserialize)]
pub(crate) struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<u64>,
    #[serde(default)]
    token_type: Option<String>,
}

/// Client for the provider's `/oauth2/token` endpoint, authenticating with
/// HTTP Basic.
pub(crate) struct TokenEndpoint {
    client: HttpClient,
    url: Url,
    client_id: String,
    client_secret: SecretString,
}

impl TokenEndpoint {
    pub(crate) fn new(client: HttpClient, url: Url, config: &OAuthConfig) -> Self {
        Self {
            client,
            url,
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
        }
    }

    /// POST a grant and turn the answer into a credential.
    ///
    /// `previous_refresh` is kept when the response carries no new refresh
    /// token; refresh-token grants usually omit it.
    pub(crate) async fn grant(
        &self,
        fields: &[(&str, &str)],
        previous_refresh: Option<&SecretString>,
        now: OffsetDateTime,
        context: &'static str,
    ) -> Result<Credential, AuthError> {
        let credentials = Zeroizing::new(format!(
            "{}:{}",
            self.client_id,
            self.client_secret.expose()
        ));
        let encoded = Zeroizing::new(general_purpose::STANDARD.encode(credentials.as_bytes()));

        let resp: TokenResponse = self
            .client
            .post(self.url.as_str())
            .basic(&encoded)
            .header("accept", "application/json")
            .form(fields)
            .map_err(http_err(context))?
            .send()
            .await
            .map_err(http_err(context))?
            .json()
            .await
            .map_err(http_err(context))?;

        if let Some(ref tt) = resp.token_type
            && !tt.eq_ignore_ascii_case("bearer")
        {
            return Err(AuthError::UnsupportedTokenType(tt.clone()));
        }
        if resp.access_token.is_empty() {
            return Err(AuthError::InvalidResponse("empty access_token".into()));
        }

        let refresh_token = resp
            .refresh_token
            .as_deref()
            .map(SecretString::new)
            .or_else(|| previous_refresh.cloned());

        let mut credential = Credential::new(SecretString::new(resp.access_token.as_str()), now)
            .with_refresh_token(refresh_token)
            .with_ttl(resp.expires_in);
        credential.refreshed_at = Some(now);
        Ok(credential)
    }
}

/// Refresh-token grant against the provider's token endpoint.
///
/// Needs a credential that carries a refresh token, normally seeded from the
/// token store after the one-time OAuth onboarding.
pub struct OAuthRefreshSource {
    endpoint: TokenEndpoint,
}

impl OAuthRefreshSource {
    /// # Errors
    /// `AuthError::ConfigError` when the registration is incomplete.
    pub fn new(client: HttpClient, config: &OAuthConfig) -> Result<Self, AuthError> {
        let (_, token_url) = config.validate()?;
        Ok(Self {
            endpoint: TokenEndpoint::new(client, token_url, config),
        })
    }
}

#[async_trait]
impl CredentialSource for OAuthRefreshSource {
    fn name(&self) -> &'static str {
        "oauth"
    }

    async fn fetch(
        &self,
        current: Option<&Credential>,
        now: OffsetDateTime,
    ) -> Result<Credential, AuthError> {
        let Some(refresh) = current.and_then(|c| c.refresh_token.as_ref()) else {
            return Err(AuthError::NotConnected("no refresh token stored".into()));
        };
        let refresh_value = Zeroizing::new(refresh.expose().to_owned());
        self.endpoint
            .grant(
                &[
                    ("grant_type", "refresh_token"),
                    ("refresh_token", refresh_value.as_str()),
                ],
                Some(refresh),
                now,
                "OAuth2 refresh",
            )
            .await
    }
}
