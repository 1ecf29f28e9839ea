use async_trait::async_trait;
use casekit_http::HttpClient;
use casekit_utils::SecretString;
use serde::Deserialize;
use time::OffsetDateTime;
use url::Url;

use super::CredentialSource;
use crate::config::ConnectorConfig;
use crate::credential::Credential;
use crate::error::AuthError;
use crate::http_error::http_err;

const IDENTITY_HEADER: &str = "x_replit_token";

#[derive(Deserialize)]
struct ConnectionList {
    #[serde(default)]
    items: Vec<Connection>,
}

#[derive(Deserialize)]
struct Connection {
    #[serde(default)]
    settings: Settings,
}

#[derive(Deserialize, Default)]
struct Settings {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    expires_in: Option<u64>,
    #[serde(default)]
    oauth: Option<ConnectorOAuth>,
}

#[derive(Deserialize)]
struct ConnectorOAuth {
    #[serde(default)]
    credentials: Option<ConnectorCredentials>,
}

#[derive(Deserialize)]
struct ConnectorCredentials {
    #[serde(default)]
    access_token: Option<String>,
}

/// Short-lived provider tokens handed out by a delegated secrets broker.
///
/// These tokens carry no refresh token and are never persisted.
pub struct ConnectorSource {
    client: HttpClient,
    url: Url,
    identity: SecretString,
}

impl ConnectorSource {
    /// # Errors
    /// `AuthError::ConfigError` when the endpoint or identity is unusable.
    pub fn new(client: HttpClient, config: &ConnectorConfig) -> Result<Self, AuthError> {
        let mut url = config.validate()?;
        url.query_pairs_mut()
            .append_pair("include_secrets", "true")
            .append_pair("connector_names", &config.connector_name);
        Ok(Self {
            client,
            url,
            identity: config.identity_token.clone(),
        })
    }
}

#[async_trait]
impl CredentialSource for ConnectorSource {
    fn name(&self) -> &'static str {
        "connector"
    }

    fn persists(&self) -> bool {
        false
    }

    async fn fetch(
        &self,
        _current: Option<&Credential>,
        now: OffsetDateTime,
    ) -> Result<Credential, AuthError> {
        let list: ConnectionList = self
            .client
            .get(self.url.as_str())
            .header("accept", "application/json")
            .header(IDENTITY_HEADER, self.identity.expose())
            .send()
            .await
            .map_err(http_err("connector"))?
            .json()
            .await
            .map_err(http_err("connector"))?;

        let settings = list
            .items
            .into_iter()
            .next()
            .map(|c| c.settings)
            .ok_or_else(|| AuthError::InvalidResponse("connector returned no connection".into()))?;

        let token = settings
            .access_token
            .filter(|t| !t.is_empty())
            .or_else(|| {
                settings
                    .oauth
                    .and_then(|o| o.credentials)
                    .and_then(|c| c.access_token)
                    .filter(|t| !t.is_empty())
            })
            .ok_or_else(|| {
                AuthError::InvalidResponse("connector connection has no access token".into())
            })?;

        Ok(Credential::new(SecretString::new(token), now).with_ttl(settings.expires_in))
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;

    fn source(server: &MockServer) -> ConnectorSource {
        let cfg = ConnectorConfig {
            endpoint: server.url("/api/v2/connection"),
            connector_name: "dropbox".into(),
            identity_token: SecretString::new("repl abc"),
        };
        let client = HttpClient::builder().allow_insecure_http().build().unwrap();
        ConnectorSource::new(client, &cfg).unwrap()
    }

    fn now() -> OffsetDateTime {
        OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap()
    }

    #[tokio::test]
    async fn reads_top_level_access_token() {
        let server = MockServer::start();
        let m = server.mock(|when, then| {
            when.method(GET)
                .path("/api/v2/connection")
                .query_param("include_secrets", "true")
                .query_param("connector_names", "dropbox")
                .header("x_replit_token", "repl abc");
            then.status(200).json_body(json!({
                "items": [{"settings": {"access_token": "sl.conn", "expires_in": 3600}}]
            }));
        });

        let cred = source(&server).fetch(None, now()).await.unwrap();
        m.assert();
        assert_eq!(cred.access_token.expose(), "sl.conn");
        assert_eq!(cred.ttl_seconds, Some(3600));
        assert!(cred.refresh_token.is_none());
    }

    #[tokio::test]
    async fn falls_back_to_nested_oauth_credentials() {
        let server = MockServer::start();
        let _m = server.mock(|when, then| {
            when.method(GET).path("/api/v2/connection");
            then.status(200).json_body(json!({
                "items": [{"settings": {"oauth": {"credentials": {"access_token": "sl.nested"}}}}]
            }));
        });

        let cred = source(&server).fetch(None, now()).await.unwrap();
        assert_eq!(cred.access_token.expose(), "sl.nested");
        assert_eq!(cred.ttl_seconds, None);
    }

    #[tokio::test]
    async fn empty_item_list_is_invalid_response() {
        let server = MockServer::start();
        let _m = server.mock(|when, then| {
            when.method(GET).path("/api/v2/connection");
            then.status(200).json_body(json!({"items": []}));
        });

        let err = source(&server).fetch(None, now()).await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidResponse(_)));
    }

    #[test]
    fn connector_tokens_are_not_persisted() {
        let server = MockServer::start();
        assert!(!source(&server).persists());
    }
}
