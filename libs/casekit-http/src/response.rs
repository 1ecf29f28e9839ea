use std::time::{Duration, SystemTime};

use bytes::Bytes;
use http::{HeaderMap, Response, StatusCode};
use http_body_util::BodyExt;
use hyper::body::Incoming;
use serde::de::DeserializeOwned;

use crate::error::HttpError;

/// Maximum body preview kept in `HttpError::HttpStatus` (8KB).
pub const ERROR_BODY_PREVIEW_LIMIT: usize = 8 * 1024;

/// Parse a `Retry-After` header into a `Duration`.
///
/// Accepts delta-seconds (`"120"`) and HTTP-dates. Returns `None` when the
/// header is missing, malformed, negative or already in the past.
#[must_use]
pub fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    let value = headers.get(http::header::RETRY_AFTER)?.to_str().ok()?;
    let trimmed = value.trim();

    if let Ok(seconds) = trimmed.parse::<i64>() {
        if seconds < 0 {
            return None;
        }
        return Some(Duration::from_secs(seconds.cast_unsigned()));
    }

    let parsed = httpdate::parse_http_date(trimmed).ok()?;
    parsed.duration_since(SystemTime::now()).ok()
}

/// HTTP response with body-reading helpers.
///
/// All body reads enforce the client's `max_body_size` and the deadline set
/// when the request was sent.
#[derive(Debug)]
pub struct HttpResponse {
    pub(crate) inner: Response<Incoming>,
    pub(crate) max_body_size: usize,
    pub(crate) deadline: tokio::time::Instant,
    pub(crate) timeout: Duration,
}

impl HttpResponse {
    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.inner.status()
    }

    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        self.inner.headers()
    }

    /// Header value as a string, if present and valid UTF-8.
    #[must_use]
    pub fn header_str(&self, name: &str) -> Option<&str> {
        self.inner.headers().get(name).and_then(|v| v.to_str().ok())
    }

    /// Return `HttpError::HttpStatus` for non-2xx, without reading the body.
    ///
    /// # Errors
    /// Returns `HttpError::HttpStatus` if the status is not 2xx.
    pub fn error_for_status(self) -> Result<Self, HttpError> {
        if self.inner.status().is_success() {
            return Ok(self);
        }
        Err(HttpError::HttpStatus {
            status: self.inner.status(),
            body_preview: String::new(),
            content_type: content_type(self.inner.headers()),
            retry_after: parse_retry_after(self.inner.headers()),
        })
    }

    /// Read the body without checking the status.
    ///
    /// # Errors
    /// `BodyTooLarge`, `Timeout` or `Transport`.
    pub async fn bytes(self) -> Result<Bytes, HttpError> {
        let limit = self.max_body_size;
        self.read_limited(limit).await
    }

    /// Read the body, turning non-2xx into `HttpError::HttpStatus` with a
    /// preview of the error body.
    ///
    /// # Errors
    /// `HttpStatus`, `BodyTooLarge`, `Timeout` or `Transport`.
    pub async fn checked_bytes(self) -> Result<Bytes, HttpError> {
        let status = self.inner.status();
        if status.is_success() {
            return self.bytes().await;
        }

        let content_type = content_type(self.inner.headers());
        let retry_after = parse_retry_after(self.inner.headers());
        let preview_limit = self.max_body_size.min(ERROR_BODY_PREVIEW_LIMIT);
        let body_preview = match self.read_limited(preview_limit).await {
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(HttpError::BodyTooLarge { .. }) => "<body too large for preview>".to_owned(),
            Err(e) => return Err(e),
        };

        Err(HttpError::HttpStatus {
            status,
            body_preview,
            content_type,
            retry_after,
        })
    }

    /// Parse the body as JSON after a status check.
    ///
    /// # Errors
    /// Everything `checked_bytes` returns, plus `HttpError::Json`.
    pub async fn json<T: DeserializeOwned>(self) -> Result<T, HttpError> {
        let body = self.checked_bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }

    /// Read the body as UTF-8 text (lossy) after a status check.
    ///
    /// # Errors
    /// Everything `checked_bytes` returns.
    pub async fn text(self) -> Result<String, HttpError> {
        let body = self.checked_bytes().await?;
        Ok(String::from_utf8_lossy(&body).into_owned())
    }

    async fn read_limited(self, limit: usize) -> Result<Bytes, HttpError> {
        let deadline = self.deadline;
        let timeout = self.timeout;
        tokio::time::timeout_at(deadline, read_body_limited(self.inner, limit))
            .await
            .map_err(|_| HttpError::Timeout(timeout))?
    }
}

fn content_type(headers: &HeaderMap) -> Option<String> {
    headers
        .get(http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(String::from)
}

async fn read_body_limited(response: Response<Incoming>, limit: usize) -> Result<Bytes, HttpError> {
    let mut body = response.into_body();
    let mut collected = Vec::new();

    while let Some(frame) = body.frame().await {
        let frame = frame?;
        if let Some(chunk) = frame.data_ref() {
            if collected.len() + chunk.len() > limit {
                return Err(HttpError::BodyTooLarge {
                    limit,
                    actual: collected.len() + chunk.len(),
                });
            }
            collected.extend_from_slice(chunk);
        }
    }

    Ok(Bytes::from(collected))
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::HttpClient;
    use httpmock::prelude::*;

    #[test]
    fn retry_after_seconds() {
        let mut headers = HeaderMap::new();
        headers.insert(http::header::RETRY_AFTER, "  120 ".parse().unwrap());
        assert_eq!(parse_retry_after(&headers), Some(Duration::from_secs(120)));
    }

    #[test]
    fn retry_after_negative_or_garbage() {
        let mut headers = HeaderMap::new();
        headers.insert(http::header::RETRY_AFTER, "-5".parse().unwrap());
        assert_eq!(parse_retry_after(&headers), None);
        headers.insert(http::header::RETRY_AFTER, "later".parse().unwrap());
        assert_eq!(parse_retry_after(&headers), None);
        assert_eq!(parse_retry_after(&HeaderMap::new()), None);
    }

    #[test]
    fn retry_after_past_http_date() {
        let mut headers = HeaderMap::new();
        headers.insert(
            http::header::RETRY_AFTER,
            "Wed, 21 Oct 2015 07:28:00 GMT".parse().unwrap(),
        );
        assert_eq!(parse_retry_after(&headers), None);
    }

    #[tokio::test]
    async fn checked_bytes_reports_status_with_preview() {
        let server = MockServer::start();
        let _m = server.mock(|when, then| {
            when.method(POST).path("/rate");
            then.status(429)
                .header("retry-after", "7")
                .header("content-type", "application/json")
                .body(r#"{"error_summary":"too_many_requests/.."}"#);
        });

        let client = HttpClient::builder().allow_insecure_http().build().unwrap();
        let err = client
            .post(&server.url("/rate"))
            .send()
            .await
            .unwrap()
            .checked_bytes()
            .await
            .unwrap_err();

        match err {
            HttpError::HttpStatus {
                status,
                body_preview,
                content_type,
                retry_after,
            } => {
                assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
                assert!(body_preview.contains("too_many_requests"));
                assert_eq!(content_type.as_deref(), Some("application/json"));
                assert_eq!(retry_after, Some(Duration::from_secs(7)));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn body_limit_is_enforced() {
        let server = MockServer::start();
        let _m = server.mock(|when, then| {
            when.method(GET).path("/big");
            then.status(200).body(vec![b'x'; 4096]);
        });

        let client = HttpClient::builder()
            .allow_insecure_http()
            .max_body_size(1024)
            .build()
            .unwrap();
        let err = client
            .get(&server.url("/big"))
            .send()
            .await
            .unwrap()
            .bytes()
            .await
            .unwrap_err();
        assert!(matches!(err, HttpError::BodyTooLarge { limit: 1024, .. }));
    }

    #[tokio::test]
    async fn header_str_reads_result_header() {
        let server = MockServer::start();
        let _m = server.mock(|when, then| {
            when.method(POST).path("/download");
            then.status(200)
                .header("dropbox-api-result", r#"{"name":"a.txt"}"#)
                .body("hello");
        });

        let client = HttpClient::builder().allow_insecure_http().build().unwrap();
        let resp = client.post(&server.url("/download")).send().await.unwrap();
        assert_eq!(resp.header_str("dropbox-api-result"), Some(r#"{"name":"a.txt"}"#));
        assert_eq!(resp.bytes().await.unwrap(), Bytes::from_static(b"hello"));
    }
}
