//! Memory endpoints — POST /memory/search and POST /memory/update.

use std::sync::Arc;

use axum::extract::State;
use axum::response::Response;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use conclave_core::error::{ErrorCode, Failure};
use conclave_memory::types::{LifecycleKind, Provenance, SearchQuery};

use crate::app::AppState;
use crate::envelope;

#[derive(Deserialize)]
pub struct SearchRequest {
    pub user_id: String,
    pub query: String,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub threshold: Option<f32>,
    #[serde(default)]
    pub kind: Option<String>,
}

pub async fn search_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SearchRequest>,
) -> Response {
    let kind = match req.kind.as_deref().map(parse_kind).transpose() {
        Ok(kind) => kind,
        Err(failure) => return envelope::failure(&failure),
    };

    let query = SearchQuery {
        text: req.query,
        user_id: Some(req.user_id),
        kind,
        min_timestamp_ms: None,
        threshold: req.threshold,
        limit: req.limit,
        weights: None,
    };

    match state.memory.search(&query).await.into_result() {
        Ok(results) => {
            let rendered: Vec<Value> = results
                .iter()
                .map(|r| {
                    json!({
                        "memoryId": r.vector.id,
                        "content": r.vector.content,
                        "kind": r.vector.kind,
                        "importance": r.vector.importance,
                        "score": r.score,
                        "rank": r.rank,
                    })
                })
                .collect();
            envelope::success(json!({ "results": rendered }), json!({ "count": results.len() }))
        }
        Err(failure) => envelope::failure(&failure),
    }
}

#[derive(Deserialize)]
pub struct UpdateRequest {
    pub user_id: String,
    pub content: String,
    #[serde(default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub provenance: Option<String>,
    #[serde(default)]
    pub importance: Option<f32>,
}

pub async fn update_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<UpdateRequest>,
) -> Response {
    let kind = match req.kind.as_deref().map(parse_kind).transpose() {
        Ok(kind) => kind.unwrap_or(LifecycleKind::LongTerm),
        Err(failure) => return envelope::failure(&failure),
    };
    let provenance = match req.provenance.as_deref() {
        None => Provenance::Explicit,
        Some("explicit") => Provenance::Explicit,
        Some("implicit") => Provenance::Implicit,
        Some(other) => {
            return envelope::failure(&Failure::new(
                ErrorCode::InputValidationFailed,
                format!("unknown provenance: {other}"),
            ))
        }
    };

    match state
        .memory
        .remember(&req.user_id, &req.content, kind, provenance, req.importance)
        .await
    {
        conclave_core::error::OperationResult::Success { value, metadata } => {
            envelope::success(json!({ "memoryId": value }), Value::Object(metadata))
        }
        conclave_core::error::OperationResult::Failure(failure) => envelope::failure(&failure),
    }
}

/// Lifecycle kinds arrive in the wire spelling ("shortTerm", "pinned", …).
fn parse_kind(raw: &str) -> Result<LifecycleKind, Failure> {
    serde_json::from_value::<LifecycleKind>(Value::String(raw.to_string())).map_err(|_| {
        Failure::new(
            ErrorCode::InputValidationFailed,
            format!("unknown lifecycle kind: {raw}"),
        )
    })
}
