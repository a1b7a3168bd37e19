use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::Method;
use axum::middleware::Next;
use axum::response::Response;
use serde_json::{json, Value};
use tracing::debug;

use conclave_core::error::{ErrorCode, Failure};

use crate::app::AppState;
use crate::envelope;

/// Per-endpoint declaration of one body field.
pub struct FieldSpec {
    pub name: &'static str,
    pub kind: FieldKind,
    pub required: bool,
    /// Inclusive numeric range, when `kind` is `Number`.
    pub min: Option<f64>,
    pub max: Option<f64>,
    /// Maximum string length, when `kind` is `String`.
    pub max_len: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    String,
    Number,
    Bool,
}

const fn required_string(name: &'static str, max_len: usize) -> FieldSpec {
    FieldSpec {
        name,
        kind: FieldKind::String,
        required: true,
        min: None,
        max: None,
        max_len: Some(max_len),
    }
}

const fn optional_string(name: &'static str, max_len: usize) -> FieldSpec {
    FieldSpec {
        name,
        kind: FieldKind::String,
        required: false,
        min: None,
        max: None,
        max_len: Some(max_len),
    }
}

const fn optional_number(name: &'static str, min: f64, max: f64) -> FieldSpec {
    FieldSpec {
        name,
        kind: FieldKind::Number,
        required: false,
        min: Some(min),
        max: Some(max),
        max_len: None,
    }
}

const CHAT_SCHEMA: &[FieldSpec] = &[
    required_string("message", 65_536),
    optional_string("user_id", 256),
    optional_string("channel_id", 256),
];

const MEMORY_SEARCH_SCHEMA: &[FieldSpec] = &[
    required_string("user_id", 256),
    required_string("query", 8_192),
    optional_number("limit", 1.0, 100.0),
    optional_number("threshold", 0.0, 1.0),
    optional_string("kind", 32),
];

const MEMORY_UPDATE_SCHEMA: &[FieldSpec] = &[
    required_string("user_id", 256),
    required_string("content", 16_384),
    optional_string("kind", 32),
    optional_string("provenance", 16),
    optional_number("importance", 0.0, 1.0),
];

const ADMIN_CLEANUP_SCHEMA: &[FieldSpec] = &[
    optional_number("max_age_ms", 0.0, f64::MAX),
    optional_number("min_importance", 0.0, 1.0),
    optional_number("max_per_user", 1.0, 10_000_000.0),
];

fn schema_for(path: &str) -> Option<&'static [FieldSpec]> {
    match path {
        "/chat" => Some(CHAT_SCHEMA),
        "/memory/search" => Some(MEMORY_SEARCH_SCHEMA),
        "/memory/update" => Some(MEMORY_UPDATE_SCHEMA),
        "/admin/cleanup" => Some(ADMIN_CLEANUP_SCHEMA),
        _ => None,
    }
}

/// Enforce the body size cap while buffering (413 before any handler
/// runs), then check the endpoint's field schema (400 listing every
/// offending field). Valid bodies are replayed into the handler.
pub async fn validate_body(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Response {
    if req.method() != Method::POST {
        return next.run(req).await;
    }
    let path = req.uri().path().to_string();
    let limit = state.config.gateway.max_request_body_bytes;

    let (parts, body) = req.into_parts();
    let bytes = match axum::body::to_bytes(body, limit).await {
        Ok(bytes) => bytes,
        Err(_) => {
            debug!(path = %path, limit, "request body over size cap");
            return envelope::failure(&Failure::new(
                ErrorCode::InputTooLarge,
                format!("request body exceeds {limit} bytes"),
            ));
        }
    };

    if let Some(specs) = schema_for(&path) {
        let value: Value = match serde_json::from_slice(&bytes) {
            Ok(v) => v,
            Err(e) => {
                return envelope::failure_with_fields(
                    &Failure::new(ErrorCode::InputValidationFailed, format!("invalid JSON: {e}")),
                    Some(json!([{ "field": "(body)", "problem": "not valid JSON" }])),
                );
            }
        };
        let problems = validate_fields(&value, specs);
        if !problems.is_empty() {
            let fields: Vec<Value> = problems
                .iter()
                .map(|(field, problem)| json!({ "field": field, "problem": problem }))
                .collect();
            let summary = problems
                .iter()
                .map(|(f, p)| format!("{f}: {p}"))
                .collect::<Vec<_>>()
                .join("; ");
            return envelope::failure_with_fields(
                &Failure::new(ErrorCode::InputValidationFailed, summary),
                Some(Value::Array(fields)),
            );
        }
    }

    next.run(Request::from_parts(parts, Body::from(bytes))).await
}

/// Check one body against a schema. Returns (field, problem) pairs — empty
/// means valid.
fn validate_fields(value: &Value, specs: &[FieldSpec]) -> Vec<(String, String)> {
    let mut problems = Vec::new();
    let Some(object) = value.as_object() else {
        problems.push(("(body)".to_string(), "expected a JSON object".to_string()));
        return problems;
    };

    for spec in specs {
        let Some(field) = object.get(spec.name) else {
            if spec.required {
                problems.push((spec.name.to_string(), "required field is missing".to_string()));
            }
            continue;
        };
        if field.is_null() {
            if spec.required {
                problems.push((spec.name.to_string(), "required field is null".to_string()));
            }
            continue;
        }
        match spec.kind {
            FieldKind::String => match field.as_str() {
                Some(s) => {
                    if spec.required && s.trim().is_empty() {
                        problems.push((spec.name.to_string(), "must not be empty".to_string()));
                    }
                    if let Some(max_len) = spec.max_len {
                        if s.len() > max_len {
                            problems.push((
                                spec.name.to_string(),
                                format!("longer than {max_len} bytes"),
                            ));
                        }
                    }
                }
                None => problems.push((spec.name.to_string(), "expected a string".to_string())),
            },
            FieldKind::Number => match field.as_f64() {
                Some(n) => {
                    if let Some(min) = spec.min {
                        if n < min {
                            problems.push((spec.name.to_string(), format!("below minimum {min}")));
                        }
                    }
                    if let Some(max) = spec.max {
                        if n > max {
                            problems.push((spec.name.to_string(), format!("above maximum {max}")));
                        }
                    }
                }
                None => problems.push((spec.name.to_string(), "expected a number".to_string())),
            },
            FieldKind::Bool => {
                if !field.is_boolean() {
                    problems.push((spec.name.to_string(), "expected a boolean".to_string()));
                }
            }
        }
    }
    problems
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_required_field_is_reported() {
        let problems = validate_fields(&json!({ "user_id": "u" }), CHAT_SCHEMA);
        assert_eq!(problems.len(), 1);
        assert_eq!(problems[0].0, "message");
    }

    #[test]
    fn wrong_types_and_ranges_are_all_listed() {
        let body = json!({
            "user_id": 42,
            "query": "hello",
            "threshold": 3.0,
        });
        let problems = validate_fields(&body, MEMORY_SEARCH_SCHEMA);
        let fields: Vec<&str> = problems.iter().map(|(f, _)| f.as_str()).collect();
        assert!(fields.contains(&"user_id"));
        assert!(fields.contains(&"threshold"));
        assert!(!fields.contains(&"query"));
    }

    #[test]
    fn valid_body_produces_no_problems() {
        let body = json!({
            "user_id": "alice",
            "content": "likes tea",
            "importance": 0.8,
        });
        assert!(validate_fields(&body, MEMORY_UPDATE_SCHEMA).is_empty());
    }

    #[test]
    fn non_object_body_is_rejected() {
        let problems = validate_fields(&json!([1, 2, 3]), CHAT_SCHEMA);
        assert_eq!(problems[0].0, "(body)");
    }
}
