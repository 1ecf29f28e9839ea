use casekit_http::HttpError;

use crate::error::AuthError;

/// Render an [`HttpError`] with a context prefix.
///
/// `HttpStatus` errors keep only the status code; auth endpoints echo request
/// parameters in error bodies, so those never reach logs.
#[must_use]
pub fn format_http_error(e: &HttpError, prefix: &str) -> String {
    match e {
        HttpError::HttpStatus { status, .. } => format!("{prefix} HTTP {status}"),
        HttpError::Json(err) => format!("{prefix} JSON parse failed: {err}"),
        HttpError::Timeout(duration) => format!("{prefix} request timed out after {duration:?}"),
        HttpError::Transport(err) => format!("{prefix} transport error: {err}"),
        HttpError::BodyTooLarge { limit, actual } => {
            format!("{prefix} response too large: limit {limit} bytes, got {actual} bytes")
        }
        HttpError::Tls(err) => format!("{prefix} TLS error: {err}"),
        HttpError::RequestBuild(err) => format!("{prefix} request build failed: {err}"),
        HttpError::InvalidHeaderName(err) => format!("{prefix} invalid header name: {err}"),
        HttpError::InvalidHeaderValue(_) => format!("{prefix} invalid header value"),
        HttpError::FormEncode(err) => format!("{prefix} form encode error: {err}"),
        HttpError::InvalidUri { url, reason, .. } => {
            format!("{prefix} invalid URL '{url}': {reason}")
        }
        HttpError::InvalidScheme { scheme, reason } => {
            format!("{prefix} invalid scheme '{scheme}': {reason}")
        }
        _ => format!("{prefix} request failed"),
    }
}

pub(crate) fn http_err(prefix: &'static str) -> impl Fn(HttpError) -> AuthError {
    move |e| AuthError::Http(format_http_error(&e, prefix))
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn status_error_omits_body() {
        let e = HttpError::HttpStatus {
            status: http::StatusCode::BAD_REQUEST,
            body_preview: "refresh_token=secret".into(),
            content_type: None,
            retry_after: None,
        };
        let msg = format_http_error(&e, "token");
        assert_eq!(msg, "token HTTP 400 Bad Request");
        assert!(!msg.contains("secret"));
    }

    #[test]
    fn timeout_is_prefixed() {
        let msg = format_http_error(&HttpError::Timeout(Duration::from_secs(3)), "connector");
        assert_eq!(msg, "connector request timed out after 3s");
    }
}
