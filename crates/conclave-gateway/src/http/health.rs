use std::sync::atomic::Ordering;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::app::AppState;
use crate::envelope;

/// GET /health — liveness plus component state and a metrics summary.
pub async fn health_handler(State(state): State<Arc<AppState>>) -> Response {
    let output = json!({
        "uptimeSecs": state.started_at.elapsed().as_secs(),
        "version": env!("CARGO_PKG_VERSION"),
        "componentMap": {
            "provider": state.provider_name,
            "memoryVectors": state.memory.store().len(),
            "bots": state.orchestrator.bot_names(),
            "skills": state.intent.registry().len(),
        },
        "metricsSummary": state.metrics.snapshot(),
    });
    envelope::success(output, json!({}))
}

/// GET /readiness — 200 while serving, 503 once shutdown has begun.
pub async fn readiness_handler(State(state): State<Arc<AppState>>) -> Response {
    let ready = state.ready.load(Ordering::Acquire);
    let body = Json(json!({ "ok": ready, "output": { "ready": ready } }));
    if ready {
        body.into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, body).into_response()
    }
}
