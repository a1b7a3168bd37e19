use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Persistence tier of a memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LifecycleKind {
    /// Session-scoped; first to be evicted.
    ShortTerm,
    /// Holds for days.
    MidTerm,
    /// Holds indefinitely, still subject to importance-based cleanup.
    LongTerm,
    /// Stable user attributes (name, location, preferences).
    Profile,
    /// Never evicted by age.
    Pinned,
}

impl LifecycleKind {
    /// Ranking weight used by hybrid retrieval: pinned > profile > longTerm
    /// > midTerm > shortTerm.
    pub fn type_weight(&self) -> f32 {
        match self {
            LifecycleKind::Pinned => 1.0,
            LifecycleKind::Profile => 0.9,
            LifecycleKind::LongTerm => 0.75,
            LifecycleKind::MidTerm => 0.55,
            LifecycleKind::ShortTerm => 0.4,
        }
    }
}

/// Where a memory came from: stated by the user or inferred by the system.
/// On conflict, explicit always beats implicit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Provenance {
    #[default]
    Explicit,
    Implicit,
}

/// A unit of semantic memory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryVector {
    pub id: String,
    pub user_id: String,
    pub content: String,
    /// Dense embedding; length always matches the configured model dim.
    pub embedding: Vec<f32>,
    /// Creation time, milliseconds since the Unix epoch.
    pub timestamp_ms: i64,
    /// Clamped to [0, 1] on every write.
    pub importance: f32,
    pub kind: LifecycleKind,
    #[serde(default)]
    pub provenance: Provenance,
    #[serde(default)]
    pub access_count: u64,
    #[serde(default)]
    pub last_accessed_ms: i64,
    /// Id of an older vector this one replaced or deprecated, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supersedes: Option<String>,
}

impl MemoryVector {
    pub fn new(
        user_id: impl Into<String>,
        content: impl Into<String>,
        embedding: Vec<f32>,
        kind: LifecycleKind,
        importance: f32,
    ) -> Self {
        let user_id = user_id.into();
        let content = content.into();
        let now = chrono::Utc::now().timestamp_millis();
        Self {
            id: vector_id(&user_id, &content, now),
            user_id,
            content,
            embedding,
            timestamp_ms: now,
            importance: importance.clamp(0.0, 1.0),
            kind,
            provenance: Provenance::default(),
            access_count: 0,
            last_accessed_ms: now,
            supersedes: None,
        }
    }

    pub fn with_provenance(mut self, provenance: Provenance) -> Self {
        self.provenance = provenance;
        self
    }

    pub fn set_importance(&mut self, importance: f32) {
        self.importance = importance.clamp(0.0, 1.0);
    }

    pub fn age_ms(&self, now_ms: i64) -> i64 {
        (now_ms - self.timestamp_ms).max(0)
    }
}

/// `mem_<hash16(userId + content)>_<timestamp>` — stable per (user, content)
/// modulo creation time.
pub fn vector_id(user_id: &str, content: &str, timestamp_ms: i64) -> String {
    format!("mem_{}_{}", hash16(user_id, content), timestamp_ms)
}

fn hash16(user_id: &str, content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(user_id.as_bytes());
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())[..16].to_string()
}

/// First 16 hex chars of sha256(user_id) — the per-user directory name.
pub fn user_dir_hash(user_id: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(user_id.as_bytes());
    hex::encode(hasher.finalize())[..16].to_string()
}

/// Relative weights of the hybrid composite score. Defaults prefer semantic
/// similarity.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ScoringWeights {
    pub semantic: f32,
    pub bm25: f32,
    pub type_weight: f32,
    pub recency: f32,
    pub importance: f32,
    pub access: f32,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            semantic: 0.45,
            bm25: 0.20,
            type_weight: 0.10,
            recency: 0.10,
            importance: 0.10,
            access: 0.05,
        }
    }
}

/// A hybrid search request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchQuery {
    pub text: String,
    /// Restrict to one user's vectors. `None` searches everything — used by
    /// admin tooling only.
    pub user_id: Option<String>,
    pub kind: Option<LifecycleKind>,
    pub min_timestamp_ms: Option<i64>,
    /// Candidates below this cosine similarity are skipped. Default 0.3.
    pub threshold: Option<f32>,
    /// Maximum results. Default 10.
    pub limit: Option<usize>,
    pub weights: Option<ScoringWeights>,
}

impl SearchQuery {
    pub fn for_user(user_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            user_id: Some(user_id.into()),
            ..Default::default()
        }
    }
}

/// One search hit: the vector plus its composite score and 0-based rank.
#[derive(Debug, Clone, Serialize)]
pub struct ScoredMemory {
    pub vector: MemoryVector,
    pub score: f32,
    pub rank: usize,
    pub semantic: f32,
    pub bm25: f32,
}

/// Options for the lifecycle cleanup pass.
#[derive(Debug, Clone, Default)]
pub struct CleanupOptions {
    /// Evict vectors older than this…
    pub max_age_ms: Option<i64>,
    /// …whose importance is below this.
    pub min_importance: f32,
    /// Hard per-user cap; worst-scoring vectors evicted beyond it.
    pub max_per_user: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub removed: usize,
    pub kept: usize,
}
