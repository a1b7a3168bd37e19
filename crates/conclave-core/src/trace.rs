use std::future::Future;

use serde::{Deserialize, Serialize};

/// 16-character request trace id, propagated via the `X-Trace-Id` header and
/// a task-local scope. A module-level global would alias across concurrent
/// requests, so the id is only reachable through [`TraceId::scope`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TraceId(String);

pub const TRACE_ID_LEN: usize = 16;
pub const TRACE_HEADER: &str = "x-trace-id";

tokio::task_local! {
    static CURRENT: TraceId;
}

impl TraceId {
    /// Generate a fresh random id.
    pub fn generate() -> Self {
        let simple = uuid::Uuid::new_v4().simple().to_string();
        Self(simple[..TRACE_ID_LEN].to_string())
    }

    /// Accept an id supplied by the caller, normalizing length. Empty or
    /// oversized values fall back to a generated id.
    pub fn from_header(value: &str) -> Self {
        let trimmed = value.trim();
        if trimmed.is_empty() || trimmed.len() > 64 {
            return Self::generate();
        }
        if trimmed.len() > TRACE_ID_LEN {
            Self(trimmed[..TRACE_ID_LEN].to_string())
        } else {
            Self(trimmed.to_string())
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Run `fut` with this id installed as the task-local current trace.
    pub async fn scope<F: Future>(self, fut: F) -> F::Output {
        CURRENT.scope(self, fut).await
    }

    /// The trace id of the current task, if one is installed.
    pub fn current() -> Option<TraceId> {
        CURRENT.try_with(|id| id.clone()).ok()
    }
}

impl std::fmt::Display for TraceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
