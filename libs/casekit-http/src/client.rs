use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http_body_util::Full;
use hyper_rustls::HttpsConnector;
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::{TokioExecutor, TokioTimer};

use crate::config::{HttpClientConfig, TlsRootConfig, TransportSecurity};
use crate::error::HttpError;
use crate::request::RequestBuilder;
use crate::tls;

pub(crate) type HyperClient = Client<HttpsConnector<HttpConnector>, Full<Bytes>>;

/// Shared state behind every clone of an [`HttpClient`].
pub(crate) struct Inner {
    pub(crate) hyper: HyperClient,
    pub(crate) config: HttpClientConfig,
}

/// HTTP client over a pooled hyper connector.
///
/// `HttpClient` is `Clone + Send + Sync`; clones share the connection pool.
/// `send()` returns `Ok` for every HTTP status. Non-2xx only becomes an
/// error through [`HttpResponse::error_for_status`](crate::HttpResponse::error_for_status)
/// or the checked body readers.
#[derive(Clone)]
pub struct HttpClient {
    pub(crate) inner: Arc<Inner>,
}

impl std::fmt::Debug for HttpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpClient")
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

impl HttpClient {
    /// Create a client with default configuration.
    ///
    /// # Errors
    /// Returns an error if TLS initialization fails.
    pub fn new() -> Result<Self, HttpError> {
        HttpClientBuilder::new().build()
    }

    #[must_use]
    pub fn builder() -> HttpClientBuilder {
        HttpClientBuilder::new()
    }

    #[must_use]
    pub fn config(&self) -> &HttpClientConfig {
        &self.inner.config
    }

    fn request(&self, method: http::Method, url: &str) -> RequestBuilder {
        RequestBuilder::new(Arc::clone(&self.inner), method, url.to_owned())
    }

    pub fn get(&self, url: &str) -> RequestBuilder {
        self.request(http::Method::GET, url)
    }

    pub fn post(&self, url: &str) -> RequestBuilder {
        self.request(http::Method::POST, url)
    }
}

/// Builder for [`HttpClient`].
#[derive(Debug, Clone, Default)]
pub struct HttpClientBuilder {
    config: HttpClientConfig,
}

impl HttpClientBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    #[must_use]
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.user_agent = user_agent.into();
        self
    }

    #[must_use]
    pub fn max_body_size(mut self, size: usize) -> Self {
        self.config.max_body_size = size;
        self
    }

    #[must_use]
    pub fn tls_roots(mut self, roots: TlsRootConfig) -> Self {
        self.config.tls_roots = roots;
        self
    }

    #[must_use]
    pub fn transport(mut self, transport: TransportSecurity) -> Self {
        self.config.transport = transport;
        self
    }

    /// Permit `http://` URLs. Only for tests against local mock servers.
    #[must_use]
    pub fn allow_insecure_http(self) -> Self {
        self.transport(TransportSecurity::AllowInsecureHttp)
    }

    /// Build the client.
    ///
    /// # Errors
    /// Returns `HttpError::Tls` if the TLS connector cannot be built, or
    /// `HttpError::InvalidHeaderValue` for an unusable user agent.
    pub fn build(self) -> Result<HttpClient, HttpError> {
        if self.config.transport == TransportSecurity::AllowInsecureHttp {
            tracing::warn!(
                "insecure HTTP enabled (TransportSecurity::AllowInsecureHttp); \
                 use only for testing with mock servers"
            );
        }
        http::HeaderValue::try_from(self.config.user_agent.as_str())?;

        let https = tls::build_https_connector(self.config.tls_roots, self.config.transport)?;

        let mut builder = Client::builder(TokioExecutor::new());
        // pool_idle_timeout needs a timer to take effect
        builder
            .pool_timer(TokioTimer::new())
            .pool_max_idle_per_host(self.config.pool_max_idle_per_host);
        if let Some(idle) = self.config.pool_idle_timeout {
            builder.pool_idle_timeout(idle);
        }
        let hyper = builder.build::<_, Full<Bytes>>(https);

        Ok(HttpClient {
            inner: Arc::new(Inner {
                hyper,
                config: self.config,
            }),
        })
    }
}
