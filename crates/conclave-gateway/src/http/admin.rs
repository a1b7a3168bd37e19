//! Administrative endpoints. All of these sit behind the admin token gate.

use std::sync::Arc;

use axum::extract::State;
use axum::response::Response;
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use conclave_memory::types::CleanupOptions;

use crate::app::AppState;
use crate::envelope;

/// GET /admin/metrics — full counter snapshot.
pub async fn metrics_handler(State(state): State<Arc<AppState>>) -> Response {
    envelope::success(json!(state.metrics.snapshot()), json!({}))
}

/// GET /admin/skills — registered skill descriptors.
pub async fn skills_handler(State(state): State<Arc<AppState>>) -> Response {
    let descriptors = state.intent.registry().descriptors();
    envelope::success(
        json!({ "skills": descriptors.as_slice() }),
        json!({ "count": descriptors.len() }),
    )
}

#[derive(Deserialize)]
pub struct CleanupRequest {
    #[serde(default)]
    pub max_age_ms: Option<i64>,
    #[serde(default)]
    pub min_importance: Option<f32>,
    #[serde(default)]
    pub max_per_user: Option<usize>,
}

/// POST /admin/cleanup — run one lifecycle cleanup pass.
pub async fn cleanup_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CleanupRequest>,
) -> Response {
    let options = CleanupOptions {
        max_age_ms: req.max_age_ms,
        min_importance: req.min_importance.unwrap_or(0.0),
        max_per_user: req
            .max_per_user
            .or(Some(state.config.memory.max_vectors_per_user)),
    };
    match state.memory.cleanup(&options).into_result() {
        Ok(report) => envelope::success(json!(report), json!({})),
        Err(failure) => envelope::failure(&failure),
    }
}
