//! Transaction log for multi-step memory mutations.
//!
//! Each primitive operation records a before/after snapshot. On failure the
//! log is walked in reverse and every operation is inverted, so the store
//! ends byte-identical to its pre-transaction state. On success the log is
//! simply discarded.

use crate::error::Result;
use crate::store::VectorStore;
use crate::types::MemoryVector;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxKind {
    Add,
    Remove,
    Update,
    ResolveConflict,
}

#[derive(Debug, Clone)]
pub struct TxRecord {
    pub kind: TxKind,
    pub vector_id: String,
    pub prior: Option<MemoryVector>,
    pub new: Option<MemoryVector>,
    pub timestamp_ms: i64,
}

pub struct Transaction<'a> {
    store: &'a VectorStore,
    records: Vec<TxRecord>,
}

impl<'a> Transaction<'a> {
    pub fn new(store: &'a VectorStore) -> Self {
        Self {
            store,
            records: Vec::new(),
        }
    }

    pub fn records(&self) -> &[TxRecord] {
        &self.records
    }

    /// Insert a vector; a same-id occupant is captured as the prior state.
    pub fn add(&mut self, vector: MemoryVector) -> String {
        let id = vector.id.clone();
        let prior = self.store.insert_vector(vector.clone());
        self.push(TxKind::Add, id.clone(), prior, Some(vector));
        id
    }

    pub fn remove(&mut self, id: &str) -> Option<MemoryVector> {
        let prior = self.store.remove_vector(id)?;
        self.push(TxKind::Remove, id.to_string(), Some(prior.clone()), None);
        Some(prior)
    }

    pub fn update(&mut self, vector: MemoryVector) -> Result<()> {
        let id = vector.id.clone();
        let prior = self.store.update_vector(vector.clone())?;
        self.push(TxKind::Update, id, Some(prior), Some(vector));
        Ok(())
    }

    /// Update recorded as part of conflict resolution (deprecation of an
    /// older vector).
    pub fn resolve_conflict_update(&mut self, vector: MemoryVector) -> Result<()> {
        let id = vector.id.clone();
        let prior = self.store.update_vector(vector.clone())?;
        self.push(TxKind::ResolveConflict, id, Some(prior), Some(vector));
        Ok(())
    }

    /// Removal recorded as part of conflict resolution (replacement of an
    /// older vector).
    pub fn resolve_conflict_remove(&mut self, id: &str) -> Option<MemoryVector> {
        let prior = self.store.remove_vector(id)?;
        self.push(
            TxKind::ResolveConflict,
            id.to_string(),
            Some(prior.clone()),
            None,
        );
        Some(prior)
    }

    /// Keep every applied operation and schedule a save.
    pub fn commit(self) {
        self.store.mark_dirty();
    }

    /// Invert every operation, newest first. The inverse is uniform: a
    /// recorded prior state is reinstated, an absent prior means the vector
    /// did not exist and is removed.
    pub fn rollback(self) {
        for record in self.records.into_iter().rev() {
            match record.prior {
                Some(prior) => {
                    self.store.insert_vector(prior);
                }
                None => {
                    self.store.remove_vector(&record.vector_id);
                }
            }
        }
    }

    fn push(
        &mut self,
        kind: TxKind,
        vector_id: String,
        prior: Option<MemoryVector>,
        new: Option<MemoryVector>,
    ) {
        self.records.push(TxRecord {
            kind,
            vector_id,
            prior,
            new,
            timestamp_ms: chrono::Utc::now().timestamp_millis(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::{EmbeddingService, HashEmbedder};
    use crate::types::{LifecycleKind, Provenance};
    use conclave_core::config::MemoryConfig;
    use std::sync::Arc;
    use std::time::Duration;

    async fn store_in(dir: &std::path::Path) -> Arc<VectorStore> {
        let config = MemoryConfig {
            dir: dir.display().to_string(),
            embedding_dim: 32,
            ..MemoryConfig::default()
        };
        let embeddings = Arc::new(EmbeddingService::new(
            Arc::new(HashEmbedder::new(32)),
            Duration::from_secs(60),
        ));
        VectorStore::open(config, embeddings).await.unwrap()
    }

    fn vector(content: &str) -> MemoryVector {
        MemoryVector::new("u", content, vec![0.5; 32], LifecycleKind::MidTerm, 0.5)
    }

    #[tokio::test]
    async fn rollback_restores_exact_snapshot() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store_in(tmp.path()).await;
        let keep = store
            .add_memory("u", "kept fact", LifecycleKind::LongTerm, Provenance::Explicit, None)
            .await
            .unwrap();
        let before = store.snapshot_json();

        let mut tx = Transaction::new(&store);
        tx.add(vector("transient one"));
        tx.add(vector("transient two"));
        let mut deprecated = store.get_memory_by_id(&keep).unwrap();
        deprecated.set_importance(0.1);
        tx.resolve_conflict_update(deprecated).unwrap();
        tx.remove(&keep);
        tx.rollback();

        assert_eq!(store.snapshot_json(), before);
    }

    #[tokio::test]
    async fn commit_keeps_all_operations() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store_in(tmp.path()).await;

        let mut tx = Transaction::new(&store);
        let a = tx.add(vector("fact a"));
        let b = tx.add(vector("fact b"));
        tx.commit();

        assert!(store.get_memory_by_id(&a).is_some());
        assert!(store.get_memory_by_id(&b).is_some());
    }

    #[tokio::test]
    async fn rollback_of_replacement_restores_older_vector() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store_in(tmp.path()).await;
        let old_id = store
            .add_memory("u", "lives in beijing", LifecycleKind::Profile, Provenance::Explicit, None)
            .await
            .unwrap();
        let before = store.snapshot_json();

        let mut tx = Transaction::new(&store);
        tx.resolve_conflict_remove(&old_id).unwrap();
        tx.add(vector("lives in shanghai"));
        tx.rollback();

        assert_eq!(store.snapshot_json(), before);
        assert!(store.get_memory_by_id(&old_id).is_some());
    }

    #[tokio::test]
    async fn records_carry_kind_and_snapshots() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store_in(tmp.path()).await;

        let mut tx = Transaction::new(&store);
        let id = tx.add(vector("snapshotted"));
        assert_eq!(tx.records().len(), 1);
        assert_eq!(tx.records()[0].kind, TxKind::Add);
        assert!(tx.records()[0].prior.is_none());
        assert_eq!(tx.records()[0].new.as_ref().unwrap().id, id);
        tx.commit();
    }
}
