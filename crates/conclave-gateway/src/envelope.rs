//! The uniform response envelope:
//! success `{ok: true, output, metadata}`, failure
//! `{ok: false, error: {code, message, retryable, retryAfterMs?}}` with the
//! HTTP status derived from the error code.

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value};

use conclave_core::error::Failure;

/// Build the success response.
pub fn success(output: Value, metadata: Value) -> Response {
    Json(json!({
        "ok": true,
        "output": output,
        "metadata": metadata,
    }))
    .into_response()
}

/// Build the failure response. Technical detail stays in the logs; the
/// envelope carries the pre-authored user message. Rate-limit style
/// failures also get a `Retry-After` header.
pub fn failure(f: &Failure) -> Response {
    failure_with_fields(f, None)
}

/// Failure response with a structured list of offending fields, used by
/// JSON validation.
pub fn failure_with_fields(f: &Failure, fields: Option<Value>) -> Response {
    let mut error = json!({
        "code": f.code.as_str(),
        "message": f.user_message,
        "retryable": f.retryable,
    });
    if let Some(ms) = f.retry_after_ms {
        error["retryAfterMs"] = json!(ms);
    }
    if let Some(fields) = fields {
        error["fields"] = fields;
    }

    let status =
        StatusCode::from_u16(f.code.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut response = (status, Json(json!({ "ok": false, "error": error }))).into_response();

    if let Some(ms) = f.retry_after_ms {
        let secs = ms.div_ceil(1000).max(1);
        if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
            response.headers_mut().insert(header::RETRY_AFTER, value);
        }
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use conclave_core::error::ErrorCode;

    #[test]
    fn failure_maps_status_and_retry_after() {
        let f = Failure::new(ErrorCode::AuthRateLimited, "bucket empty").with_retry_after(2500);
        let response = failure(&f);
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            response.headers().get(header::RETRY_AFTER).unwrap(),
            "3" // 2500ms rounds up to 3s
        );
    }

    #[test]
    fn conflict_maps_to_409() {
        let f = Failure::new(ErrorCode::MemoryConflict, "unresolved");
        assert_eq!(failure(&f).status(), StatusCode::CONFLICT);
    }
}
