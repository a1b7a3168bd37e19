//! High-level memory facade combining the vector store, conflict
//! resolution, and lifecycle cleanup behind `OperationResult` boundaries.

use std::sync::Arc;

use tracing::warn;

use conclave_core::error::{ErrorCode, OperationResult};
use conclave_core::metrics::Metrics;
use conclave_provider::RetryingClient;

use crate::conflict::{ConflictOutcome, ConflictResolver};
use crate::store::VectorStore;
use crate::types::{
    CleanupOptions, CleanupReport, LifecycleKind, MemoryVector, Provenance, ScoredMemory,
    SearchQuery,
};

pub struct MemoryEngine {
    store: Arc<VectorStore>,
    resolver: ConflictResolver,
    metrics: Arc<Metrics>,
}

impl MemoryEngine {
    pub fn new(store: Arc<VectorStore>, client: Arc<RetryingClient>, metrics: Arc<Metrics>) -> Self {
        Self {
            store,
            resolver: ConflictResolver::new(client),
            metrics,
        }
    }

    pub fn store(&self) -> &Arc<VectorStore> {
        &self.store
    }

    /// Add a memory, resolving conflicts against existing vectors of the
    /// same user. The surviving vector id lands in the result; the outcome
    /// kind lands in metadata.
    pub async fn remember(
        &self,
        user_id: &str,
        content: &str,
        kind: LifecycleKind,
        provenance: Provenance,
        importance: Option<f32>,
    ) -> OperationResult<String> {
        let embedded = match self.store.embeddings().embed(content).await {
            Ok(e) => e,
            Err(e) => {
                warn!(error = %e, "embedding failed during remember");
                return OperationResult::fail(e.code(), e.to_string());
            }
        };
        let vector = MemoryVector::new(
            user_id,
            content,
            embedded.vector,
            kind,
            importance.unwrap_or(0.5),
        )
        .with_provenance(provenance);

        match self.resolver.store_resolving(&self.store, vector).await {
            Ok(outcome) => {
                if !matches!(outcome, ConflictOutcome::Stored { .. }) {
                    Metrics::incr(&self.metrics.memory_conflicts);
                }
                if !matches!(outcome, ConflictOutcome::KeptExisting { .. }) {
                    crate::journal::append(&self.store.config().dir, user_id, content).await;
                }
                self.enforce_user_cap(user_id);
                let mut metadata = serde_json::Map::new();
                metadata.insert("outcome".into(), outcome_label(&outcome).into());
                if let ConflictOutcome::DeprecatedOlder { older_id, .. }
                | ConflictOutcome::ReplacedOlder { older_id, .. } = &outcome
                {
                    metadata.insert("olderId".into(), older_id.clone().into());
                }
                OperationResult::ok_with(outcome.surviving_id().to_string(), metadata)
            }
            Err(e) => {
                warn!(error = %e, "conflict resolution failed");
                OperationResult::fail(e.code(), e.to_string())
            }
        }
    }

    pub async fn search(&self, query: &SearchQuery) -> OperationResult<Vec<ScoredMemory>> {
        if query.text.trim().is_empty() {
            return OperationResult::fail(
                ErrorCode::InputValidationFailed,
                "search query text must not be empty",
            );
        }
        match self.store.search_memories(query).await {
            Ok(results) => OperationResult::ok(results),
            Err(e) => OperationResult::fail(e.code(), e.to_string()),
        }
    }

    pub fn cleanup(&self, options: &CleanupOptions) -> OperationResult<CleanupReport> {
        OperationResult::ok(self.store.cleanup_expired(options))
    }

    /// High-water mark: once a user crosses the per-user cap, evict the
    /// worst-retention vectors immediately rather than waiting for the
    /// daily pass.
    fn enforce_user_cap(&self, user_id: &str) {
        let cap = self.store.config().max_vectors_per_user;
        if self.store.user_vector_count(user_id) <= cap {
            return;
        }
        let options = CleanupOptions {
            max_age_ms: None,
            min_importance: 0.0,
            max_per_user: Some(cap),
        };
        let vectors = self.store.get_user_memories(user_id);
        let now = chrono::Utc::now().timestamp_millis();
        for id in crate::lifecycle::plan_evictions(&vectors, &options, now) {
            self.store.remove_vector(&id);
        }
        self.store.mark_dirty();
    }

    pub fn forget(&self, id: &str) -> OperationResult<bool> {
        OperationResult::ok(self.store.remove_memory(id))
    }

    /// Flush pending saves; used by graceful shutdown.
    pub async fn shutdown(&self) {
        Metrics::incr(&self.metrics.memory_saves);
        if let Err(e) = self.store.shutdown().await {
            warn!(error = %e, "memory store shutdown flush failed");
        }
    }
}

fn outcome_label(outcome: &ConflictOutcome) -> &'static str {
    match outcome {
        ConflictOutcome::Stored { .. } => "stored",
        ConflictOutcome::StoredAlongside { .. } => "stored_alongside",
        ConflictOutcome::DeprecatedOlder { .. } => "deprecated_older",
        ConflictOutcome::ReplacedOlder { .. } => "replaced_older",
        ConflictOutcome::KeptExisting { .. } => "kept_existing",
    }
}
