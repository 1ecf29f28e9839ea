//! Dropbox failures normalized into [`ClassifiedError`].
//!
//! Dropbox reports endpoint-specific errors as HTTP 409 with an
//! `error_summary` such as `path/not_found/..`. Only summaries naming a
//! `conflict` keep 409. `not_found` becomes 404, `no_write_permission` 403,
//! and every other endpoint error 400 with its leaf tag, so none of them is
//! retried.

use std::time::Duration;

use casekit_http::HttpError;

use super::wire::ApiErrorBody;
use crate::domain::ports::ClassifiedError;

const SUMMARY_LIMIT: usize = 200;

/// Normalize a failed Dropbox call.
pub fn classify(err: HttpError) -> ClassifiedError {
    match err {
        HttpError::HttpStatus {
            status,
            body_preview,
            retry_after,
            ..
        } => classify_status(status.as_u16(), &body_preview, retry_after),
        e if e.is_transport() => ClassifiedError::transport(e.to_string()),
        // a body cut short is indistinguishable from a dropped connection
        e @ HttpError::Json(_) => ClassifiedError::new(None, "invalid_response", e.to_string()),
        e @ HttpError::BodyTooLarge { .. } => {
            ClassifiedError::new(Some(413), "body_too_large", e.to_string())
        }
        e => ClassifiedError::new(Some(400), "invalid_request", e.to_string()),
    }
}

fn classify_status(status: u16, body: &str, retry_after: Option<Duration>) -> ClassifiedError {
    let parsed: Option<ApiErrorBody> = serde_json::from_str(body).ok();
    let summary = match &parsed {
        Some(b) if !b.error_summary.is_empty() => b.error_summary.clone(),
        _ => truncate(body.trim()),
    };
    let retry_after = retry_after.or_else(|| {
        parsed
            .as_ref()
            .and_then(ApiErrorBody::retry_after_secs)
            .map(Duration::from_secs)
    });

    let (status, tag) = match status {
        409 if summary.contains("not_found") => (404, "not_found".to_owned()),
        409 if summary.contains("conflict") => (409, "conflict".to_owned()),
        409 if summary.contains("no_write_permission") => (403, "no_write_permission".to_owned()),
        409 => (400, leaf_tag(&summary).unwrap_or("endpoint_error").to_owned()),
        401 => (401, leaf_tag(&summary).unwrap_or("invalid_access_token").to_owned()),
        400 if summary.contains("invalid_access_token") => (400, "invalid_access_token".to_owned()),
        400 if summary.contains("expired_access_token") => (400, "expired_access_token".to_owned()),
        400 => (400, "bad_request".to_owned()),
        429 => (429, "too_many_requests".to_owned()),
        s if s >= 500 => (s, "server_error".to_owned()),
        s => (s, leaf_tag(&summary).unwrap_or("http_error").to_owned()),
    };

    ClassifiedError::new(Some(status), tag, summary).with_retry_after(retry_after)
}

/// Most specific tag of an `a/b/..` summary: the last named segment.
fn leaf_tag(summary: &str) -> Option<&str> {
    summary
        .split('/')
        .map(str::trim)
        .filter(|s| !s.is_empty() && !s.starts_with('.'))
        .next_back()
}

fn truncate(body: &str) -> String {
    match body.char_indices().nth(SUMMARY_LIMIT) {
        Some((idx, _)) => format!("{}...", &body[..idx]),
        None => body.to_owned(),
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use http::StatusCode;

    fn status_err(status: u16, body: &str) -> HttpError {
        HttpError::HttpStatus {
            status: StatusCode::from_u16(status).unwrap(),
            body_preview: body.to_owned(),
            content_type: Some("application/json".to_owned()),
            retry_after: None,
        }
    }

    #[test]
    fn path_not_found_becomes_404() {
        let e = classify(status_err(
            409,
            r#"{"error_summary": "path/not_found/..", "error": {".tag": "path"}}"#,
        ));
        assert_eq!(e.status, Some(404));
        assert_eq!(e.tag, "not_found");
        assert_eq!(e.summary, "path/not_found/..");
    }

    #[test]
    fn lookup_not_found_on_download_becomes_404() {
        let e = classify(status_err(409, r#"{"error_summary": "path/not_found/."}"#));
        assert!(e.is_not_found());
    }

    #[test]
    fn folder_conflict_stays_409() {
        let e = classify(status_err(
            409,
            r#"{"error_summary": "path/conflict/folder/...", "error": {}}"#,
        ));
        assert_eq!(e.status, Some(409));
        assert_eq!(e.tag, "conflict");
    }

    #[test]
    fn other_endpoint_errors_leave_the_conflict_range() {
        let denied = classify(status_err(
            409,
            r#"{"error_summary": "path/no_write_permission/..", "error": {".tag": "path"}}"#,
        ));
        assert_eq!(denied.status, Some(403));
        assert_eq!(denied.tag, "no_write_permission");
        assert!(!denied.is_conflict());

        for (summary, tag) in [
            ("path/insufficient_space/...", "insufficient_space"),
            ("path/malformed_path/.", "malformed_path"),
            ("path/disallowed_name/..", "disallowed_name"),
        ] {
            let e = classify(status_err(409, &format!(r#"{{"error_summary": "{summary}"}}"#)));
            assert_eq!(e.status, Some(400), "{summary}");
            assert_eq!(e.tag, tag);
        }
    }

    #[test]
    fn expired_token_tag_is_kept() {
        let e = classify(status_err(
            401,
            r#"{"error_summary": "expired_access_token/", "error": {".tag": "expired_access_token"}}"#,
        ));
        assert_eq!(e.status, Some(401));
        assert_eq!(e.tag, "expired_access_token");
    }

    #[test]
    fn plain_text_400_naming_invalid_token() {
        let e = classify(status_err(
            400,
            "Error in call to API function \"files/list_folder\": invalid_access_token",
        ));
        assert_eq!(e.tag, "invalid_access_token");
    }

    #[test]
    fn rate_limit_reads_retry_after_from_body() {
        let e = classify(status_err(
            429,
            r#"{"error_summary": "too_many_requests/..", "error": {"retry_after": 5}}"#,
        ));
        assert_eq!(e.status, Some(429));
        assert_eq!(e.retry_after, Some(Duration::from_secs(5)));
    }

    #[test]
    fn server_errors_and_transport() {
        assert_eq!(classify(status_err(503, "")).tag, "server_error");
        let t = classify(HttpError::Timeout(Duration::from_secs(30)));
        assert_eq!(t.status, None);
        assert_eq!(t.tag, "transport");
    }

    #[test]
    fn long_bodies_are_truncated() {
        let body = "x".repeat(1000);
        let e = classify(status_err(400, &body));
        assert!(e.summary.len() < 300);
    }
}
