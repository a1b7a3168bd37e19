use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::Response;
use tracing::warn;

use conclave_core::error::{ErrorCode, Failure};

use crate::app::AppState;
use crate::envelope;

/// Admin endpoints require `Authorization: Bearer <admin-token>` or
/// `X-Admin-Token`. With `DISABLE_ADMIN` set the whole surface is off.
/// Non-admin paths pass through untouched.
pub async fn admin_gate(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Response {
    if !req.uri().path().starts_with("/admin") {
        return next.run(req).await;
    }

    if state.config.gateway.disable_admin {
        return envelope::failure(&Failure::new(
            ErrorCode::AuthForbidden,
            "admin surface is disabled",
        ));
    }

    // validate() guarantees the token exists when admin is enabled.
    let expected = state.config.gateway.admin_token.as_deref().unwrap_or("");
    let presented = presented_token(req.headers()).map(str::to_string);
    match presented.as_deref() {
        Some(token) if !expected.is_empty() && token == expected => next.run(req).await,
        _ => {
            warn!(path = %req.uri().path(), "admin request without valid token");
            envelope::failure(&Failure::new(
                ErrorCode::AuthInvalidToken,
                "missing or invalid admin token",
            ))
        }
    }
}

fn presented_token(headers: &HeaderMap) -> Option<&str> {
    if let Some(bearer) = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
    {
        return Some(bearer);
    }
    headers.get("x-admin-token").and_then(|v| v.to_str().ok())
}
