use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use casekit_utils::SecretString;
use serde::Deserialize;
use url::Url;

use crate::error::AuthError;

/// Credential lifecycle configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AuthConfig {
    /// How long before expiry a credential counts as near-expiry.
    #[serde(with = "casekit_utils::humantime_serde")]
    pub refresh_margin: Duration,
    /// JSON file holding the persisted credential.
    pub token_store: PathBuf,
    /// Direct OAuth2 refresh-token source. Tried first.
    pub oauth: Option<OAuthConfig>,
    /// Delegated connector source. Tried when OAuth is absent or fails.
    pub connector: Option<ConnectorConfig>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            refresh_margin: Duration::from_secs(60),
            token_store: PathBuf::from("data/dropbox.json"),
            oauth: None,
            connector: None,
        }
    }
}

/// OAuth2 app registration with the storage provider.
///
/// `Debug` is manual to keep the client secret out of logs.
#[derive(Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OAuthConfig {
    pub client_id: String,
    pub client_secret: SecretString,
    #[serde(default)]
    pub redirect_uri: Option<String>,
    #[serde(default = "default_authorize_endpoint")]
    pub authorize_endpoint: String,
    #[serde(default = "default_token_endpoint")]
    pub token_endpoint: String,
}

fn default_authorize_endpoint() -> String {
    "https://www.dropbox.com/oauth2/authorize".to_owned()
}

fn default_token_endpoint() -> String {
    "https://api.dropboxapi.com/oauth2/token".to_owned()
}

impl fmt::Debug for OAuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OAuthConfig")
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .field("redirect_uri", &self.redirect_uri)
            .field("authorize_endpoint", &self.authorize_endpoint)
            .field("token_endpoint", &self.token_endpoint)
            .finish()
    }
}

impl OAuthConfig {
    /// Check the registration and parse the endpoints.
    ///
    /// # Errors
    /// `AuthError::ConfigError` for empty credentials or unparseable URLs.
    pub fn validate(&self) -> Result<(Url, Url), AuthError> {
        if self.client_id.trim().is_empty() {
            return Err(AuthError::ConfigError("client_id must not be empty".into()));
        }
        if self.client_secret.is_empty() {
            return Err(AuthError::ConfigError(
                "client_secret must not be empty".into(),
            ));
        }
        let authorize = parse_url("authorize_endpoint", &self.authorize_endpoint)?;
        let token = parse_url("token_endpoint", &self.token_endpoint)?;
        Ok((authorize, token))
    }
}

/// Delegated connector returning short-lived provider tokens.
#[derive(Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConnectorConfig {
    pub endpoint: String,
    #[serde(default = "default_connector_name")]
    pub connector_name: String,
    pub identity_token: SecretString,
}

fn default_connector_name() -> String {
    "dropbox".to_owned()
}

impl fmt::Debug for ConnectorConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectorConfig")
            .field("endpoint", &self.endpoint)
            .field("connector_name", &self.connector_name)
            .field("identity_token", &"[REDACTED]")
            .finish()
    }
}

impl ConnectorConfig {
    /// # Errors
    /// `AuthError::ConfigError` for an empty identity or unparseable endpoint.
    pub fn validate(&self) -> Result<Url, AuthError> {
        if self.identity_token.is_empty() {
            return Err(AuthError::ConfigError(
                "connector identity_token must not be empty".into(),
            ));
        }
        parse_url("connector endpoint", &self.endpoint)
    }
}

fn parse_url(field: &str, raw: &str) -> Result<Url, AuthError> {
    Url::parse(raw).map_err(|e| AuthError::ConfigError(format!("{field} '{raw}': {e}")))
}
