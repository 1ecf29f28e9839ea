use std::sync::Arc;

use bytes::Bytes;
use http::Request;
use http_body_util::Full;
use serde::Serialize;

use crate::client::Inner;
use crate::config::TransportSecurity;
use crate::error::{HttpError, InvalidUriKind};
use crate::response::HttpResponse;

#[derive(Clone, Debug)]
enum BodyKind {
    Empty,
    Bytes(Bytes),
    Json(Bytes),
    Form(Bytes),
}

/// HTTP request builder with a fluent API.
///
/// Header errors are captured and reported by [`send()`](RequestBuilder::send)
/// so the chain never has to be broken up. Query strings are the caller's
/// business: pass the final URL.
///
/// ```ignore
/// let resp = client
///     .post("https://content.dropboxapi.com/2/files/upload")
///     .bearer(token.expose())
///     .header("dropbox-api-arg", &arg)
///     .body_bytes(bytes)
///     .send()
///     .await?;
/// ```
#[must_use = "RequestBuilder does nothing until .send() is called"]
pub struct RequestBuilder {
    inner: Arc<Inner>,
    method: http::Method,
    url: String,
    headers: Vec<(http::header::HeaderName, http::header::HeaderValue)>,
    body: BodyKind,
    error: Option<HttpError>,
}

impl RequestBuilder {
    pub(crate) fn new(inner: Arc<Inner>, method: http::Method, url: String) -> Self {
        Self {
            inner,
            method,
            url,
            headers: Vec::new(),
            body: BodyKind::Empty,
            error: None,
        }
    }

    /// Add a header.
    pub fn header(mut self, name: &str, value: &str) -> Self {
        if self.error.is_some() {
            return self;
        }

        match (
            http::header::HeaderName::try_from(name),
            http::header::HeaderValue::try_from(value),
        ) {
            (Ok(name), Ok(value)) => self.headers.push((name, value)),
            (Err(e), _) => self.error = Some(HttpError::InvalidHeaderName(e)),
            (_, Err(e)) => self.error = Some(HttpError::InvalidHeaderValue(e)),
        }
        self
    }

    /// Add `Authorization: Bearer <token>`. The header value is marked sensitive.
    pub fn bearer(self, token: &str) -> Self {
        self.sensitive_header(http::header::AUTHORIZATION, &format!("Bearer {token}"))
    }

    /// Add `Authorization: Basic <credentials>` where `credentials` is
    /// already base64-encoded.
    pub fn basic(self, encoded: &str) -> Self {
        self.sensitive_header(http::header::AUTHORIZATION, &format!("Basic {encoded}"))
    }

    fn sensitive_header(mut self, name: http::header::HeaderName, value: &str) -> Self {
        if self.error.is_some() {
            return self;
        }
        match http::header::HeaderValue::try_from(value) {
            Ok(mut value) => {
                value.set_sensitive(true);
                self.headers.push((name, value));
            }
            Err(e) => self.error = Some(HttpError::InvalidHeaderValue(e)),
        }
        self
    }

    /// Set a JSON body. `Content-Type` defaults to `application/json`.
    ///
    /// # Errors
    /// Returns a deferred header error, or `HttpError::Json` if serialization fails.
    pub fn json<T: Serialize + ?Sized>(mut self, body: &T) -> Result<Self, HttpError> {
        if let Some(e) = self.error.take() {
            return Err(e);
        }
        self.body = BodyKind::Json(Bytes::from(serde_json::to_vec(body)?));
        Ok(self)
    }

    /// Set a form body. `Content-Type` defaults to
    /// `application/x-www-form-urlencoded`.
    ///
    /// # Errors
    /// Returns a deferred header error, or `HttpError::FormEncode` if encoding fails.
    pub fn form(mut self, fields: &[(&str, &str)]) -> Result<Self, HttpError> {
        if let Some(e) = self.error.take() {
            return Err(e);
        }
        self.body = BodyKind::Form(Bytes::from(serde_urlencoded::to_string(fields)?));
        Ok(self)
    }

    pub fn body_bytes(mut self, body: Bytes) -> Self {
        self.body = BodyKind::Bytes(body);
        self
    }

    fn validate_url(&self) -> Result<http::Uri, HttpError> {
        let uri: http::Uri =
            self.url
                .parse()
                .map_err(|e: http::uri::InvalidUri| HttpError::InvalidUri {
                    url: self.url.clone(),
                    kind: InvalidUriKind::ParseError,
                    reason: e.to_string(),
                })?;

        if uri.authority().is_none() {
            return Err(HttpError::InvalidUri {
                url: self.url.clone(),
                kind: InvalidUriKind::MissingAuthority,
                reason: "missing host/authority".to_owned(),
            });
        }

        match uri.scheme_str() {
            Some("https") => Ok(uri),
            Some("http") => match self.inner.config.transport {
                TransportSecurity::AllowInsecureHttp => Ok(uri),
                TransportSecurity::TlsOnly => Err(HttpError::InvalidScheme {
                    scheme: "http".to_owned(),
                    reason: "HTTPS required (transport security is TlsOnly)".to_owned(),
                }),
            },
            Some(scheme) => Err(HttpError::InvalidScheme {
                scheme: scheme.to_owned(),
                reason: "only http:// and https:// schemes are supported".to_owned(),
            }),
            None => Err(HttpError::InvalidUri {
                url: self.url.clone(),
                kind: InvalidUriKind::MissingScheme,
                reason: "missing scheme".to_owned(),
            }),
        }
    }

    /// Send the request.
    ///
    /// The configured request timeout starts here and also bounds the
    /// body read on the returned [`HttpResponse`].
    ///
    /// # Errors
    /// Deferred builder errors, URL/scheme violations, transport failures
    /// and `HttpError::Timeout`.
    pub async fn send(mut self) -> Result<HttpResponse, HttpError> {
        if let Some(e) = self.error.take() {
            return Err(e);
        }

        let uri = self.validate_url()?;
        let config = &self.inner.config;
        let mut builder = Request::builder()
            .method(self.method)
            .uri(uri)
            .header(http::header::USER_AGENT, config.user_agent.as_str());

        let has_content_type = self
            .headers
            .iter()
            .any(|(name, _)| name == http::header::CONTENT_TYPE);
        if !has_content_type {
            match &self.body {
                BodyKind::Json(_) => {
                    builder = builder.header(http::header::CONTENT_TYPE, "application/json");
                }
                BodyKind::Form(_) => {
                    builder = builder.header(
                        http::header::CONTENT_TYPE,
                        "application/x-www-form-urlencoded",
                    );
                }
                BodyKind::Empty | BodyKind::Bytes(_) => {}
            }
        }

        for (name, value) in self.headers {
            builder = builder.header(name, value);
        }

        let body = match self.body {
            BodyKind::Empty => Bytes::new(),
            BodyKind::Bytes(b) | BodyKind::Json(b) | BodyKind::Form(b) => b,
        };
        let request = builder.body(Full::new(body))?;

        let timeout = config.request_timeout;
        let deadline = tokio::time::Instant::now() + timeout;
        let response = tokio::time::timeout_at(deadline, self.inner.hyper.request(request))
            .await
            .map_err(|_| HttpError::Timeout(timeout))??;

        Ok(HttpResponse {
            inner: response,
            max_body_size: config.max_body_size,
            deadline,
            timeout,
        })
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use crate::{HttpClient, HttpError, InvalidUriKind};

    fn client() -> HttpClient {
        HttpClient::builder().allow_insecure_http().build().unwrap()
    }

    #[tokio::test]
    async fn invalid_header_is_deferred_to_send() {
        let err = client()
            .get("http://localhost:1/")
            .header("bad header", "v")
            .send()
            .await
            .unwrap_err();
        assert!(matches!(err, HttpError::InvalidHeaderName(_)));
    }

    #[tokio::test]
    async fn deferred_error_surfaces_from_json() {
        let res = client()
            .post("http://localhost:1/")
            .header("x-ok", "bad\nvalue")
            .json(&serde_json::json!({}));
        assert!(matches!(res, Err(HttpError::InvalidHeaderValue(_))));
    }

    #[tokio::test]
    async fn relative_url_is_rejected() {
        let err = client().get("/just/a/path").send().await.unwrap_err();
        match err {
            HttpError::InvalidUri { kind, .. } => assert_eq!(kind, InvalidUriKind::MissingAuthority),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn ftp_scheme_is_rejected() {
        let err = client().get("ftp://example.com/x").send().await.unwrap_err();
        assert!(matches!(err, HttpError::InvalidScheme { .. }));
    }
}
