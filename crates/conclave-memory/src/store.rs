use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use conclave_core::config::MemoryConfig;

use crate::embedding::EmbeddingService;
use crate::error::{MemoryError, Result};
use crate::types::{user_dir_hash, LifecycleKind, MemoryVector, Provenance};

/// Per-user vector store with JSON snapshot persistence.
///
/// In-memory state is a pair of maps (id → vector, user → id set) behind an
/// `RwLock`; readers run concurrently, each primitive mutation takes the
/// write lock briefly. Saves are debounced and serialized through a
/// single-slot channel drained by one background task, so bursts of writes
/// collapse into at most one trailing save.
pub struct VectorStore {
    state: RwLock<StoreState>,
    embeddings: Arc<EmbeddingService>,
    config: MemoryConfig,
    dir: PathBuf,
    dirty: AtomicBool,
    /// Capacity-1 signal channel. `try_send` on a full channel is a no-op —
    /// a save is already queued, which is exactly the collapsing we want.
    save_tx: Mutex<Option<mpsc::Sender<()>>>,
}

#[derive(Default)]
struct StoreState {
    vectors: HashMap<String, MemoryVector>,
    by_user: HashMap<String, HashSet<String>>,
}

impl VectorStore {
    /// Load persisted snapshots from `config.dir` (if any) and spawn the
    /// background saver.
    pub async fn open(config: MemoryConfig, embeddings: Arc<EmbeddingService>) -> Result<Arc<Self>> {
        let dir = PathBuf::from(&config.dir);
        let (tx, rx) = mpsc::channel::<()>(1);
        let debounce = Duration::from_millis(config.save_debounce_ms);

        let store = Arc::new(Self {
            state: RwLock::new(StoreState::default()),
            embeddings,
            config,
            dir,
            dirty: AtomicBool::new(false),
            save_tx: Mutex::new(Some(tx)),
        });

        store.load_from_disk().await?;
        tokio::spawn(run_saver(Arc::downgrade(&store), rx, debounce));
        Ok(store)
    }

    pub fn embeddings(&self) -> &Arc<EmbeddingService> {
        &self.embeddings
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    // ── Public operations ────────────────────────────────────────────────────

    /// Embed `content`, store it as a new vector, and schedule a save.
    /// Returns the new vector id. Conflict handling lives one level up in
    /// [`crate::engine::MemoryEngine`].
    pub async fn add_memory(
        &self,
        user_id: &str,
        content: &str,
        kind: LifecycleKind,
        provenance: Provenance,
        importance: Option<f32>,
    ) -> Result<String> {
        let embedded = self.embeddings.embed(content).await?;
        let vector = MemoryVector::new(
            user_id,
            content,
            embedded.vector,
            kind,
            importance.unwrap_or(0.5),
        )
        .with_provenance(provenance);
        let id = vector.id.clone();
        self.insert_vector(vector);
        self.mark_dirty();
        Ok(id)
    }

    /// Remove a vector from both maps. Returns whether it existed.
    pub fn remove_memory(&self, id: &str) -> bool {
        let removed = self.remove_vector(id).is_some();
        if removed {
            self.mark_dirty();
        }
        removed
    }

    pub fn get_memory_by_id(&self, id: &str) -> Option<MemoryVector> {
        self.state.read().unwrap().vectors.get(id).cloned()
    }

    /// All vectors for one user, unordered.
    pub fn get_user_memories(&self, user_id: &str) -> Vec<MemoryVector> {
        let state = self.state.read().unwrap();
        match state.by_user.get(user_id) {
            Some(ids) => ids
                .iter()
                .filter_map(|id| state.vectors.get(id).cloned())
                .collect(),
            None => Vec::new(),
        }
    }

    pub fn user_vector_count(&self, user_id: &str) -> usize {
        self.state
            .read()
            .unwrap()
            .by_user
            .get(user_id)
            .map_or(0, |ids| ids.len())
    }

    pub fn len(&self) -> usize {
        self.state.read().unwrap().vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn user_ids(&self) -> Vec<String> {
        self.state.read().unwrap().by_user.keys().cloned().collect()
    }

    // ── Primitive mutations (used directly and by transactions) ─────────────

    /// Insert or replace. Returns the prior vector under the same id.
    pub fn insert_vector(&self, vector: MemoryVector) -> Option<MemoryVector> {
        let mut state = self.state.write().unwrap();
        state
            .by_user
            .entry(vector.user_id.clone())
            .or_default()
            .insert(vector.id.clone());
        state.vectors.insert(vector.id.clone(), vector)
    }

    pub fn remove_vector(&self, id: &str) -> Option<MemoryVector> {
        let mut state = self.state.write().unwrap();
        let vector = state.vectors.remove(id)?;
        if let Some(ids) = state.by_user.get_mut(&vector.user_id) {
            ids.remove(id);
            if ids.is_empty() {
                state.by_user.remove(&vector.user_id);
            }
        }
        Some(vector)
    }

    /// Replace an existing vector in place. Returns the prior state, or
    /// `NotFound` when the id is absent.
    pub fn update_vector(&self, vector: MemoryVector) -> Result<MemoryVector> {
        let mut state = self.state.write().unwrap();
        if !state.vectors.contains_key(&vector.id) {
            return Err(MemoryError::NotFound {
                id: vector.id.clone(),
            });
        }
        Ok(state
            .vectors
            .insert(vector.id.clone(), vector)
            .expect("presence checked above"))
    }

    /// Bump access statistics for vectors returned from a search. Does not
    /// mark the store dirty aggressively enough to matter — access counts
    /// ride along with the next scheduled save.
    pub(crate) fn record_access(&self, ids: &[String]) {
        let now = chrono::Utc::now().timestamp_millis();
        let mut state = self.state.write().unwrap();
        for id in ids {
            if let Some(v) = state.vectors.get_mut(id) {
                v.access_count += 1;
                v.last_accessed_ms = now;
            }
        }
    }

    /// Stable JSON rendering of the full state, used by tests to assert
    /// rollback restores the exact pre-mutation snapshot.
    pub fn snapshot_json(&self) -> String {
        let state = self.state.read().unwrap();
        let mut ids: Vec<&String> = state.vectors.keys().collect();
        ids.sort();
        let ordered: Vec<&MemoryVector> = ids.iter().map(|id| &state.vectors[*id]).collect();
        serde_json::to_string(&ordered).expect("vectors serialize")
    }

    // ── Persistence ──────────────────────────────────────────────────────────

    pub fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Release);
        if let Some(tx) = self.save_tx.lock().unwrap().as_ref() {
            // Full channel means a save is already pending.
            let _ = tx.try_send(());
        }
    }

    /// Write every user's snapshot now, bypassing the debounce. Used by
    /// graceful shutdown and tests.
    pub async fn flush(&self) -> Result<()> {
        if !self.dirty.swap(false, Ordering::AcqRel) {
            return Ok(());
        }
        let per_user: Vec<(String, Vec<MemoryVector>)> = {
            let state = self.state.read().unwrap();
            state
                .by_user
                .iter()
                .map(|(user, ids)| {
                    let mut vectors: Vec<MemoryVector> = ids
                        .iter()
                        .filter_map(|id| state.vectors.get(id).cloned())
                        .collect();
                    vectors.sort_by(|a, b| a.id.cmp(&b.id));
                    (user.clone(), vectors)
                })
                .collect()
        };

        for (user_id, vectors) in per_user {
            self.save_user(&user_id, &vectors).await?;
        }
        debug!("memory store flushed to disk");
        Ok(())
    }

    /// Stop the saver task and write a final snapshot.
    pub async fn shutdown(&self) -> Result<()> {
        // Dropping the sender ends the saver loop.
        self.save_tx.lock().unwrap().take();
        self.flush().await
    }

    async fn save_user(&self, user_id: &str, vectors: &[MemoryVector]) -> Result<()> {
        let user_dir = self.dir.join(user_dir_hash(user_id));
        tokio::fs::create_dir_all(&user_dir).await?;

        let vectors_json = serde_json::to_vec_pretty(vectors)?;
        write_atomic(&user_dir.join("vectors.json"), &vectors_json).await?;

        let ids: Vec<&str> = vectors.iter().map(|v| v.id.as_str()).collect();
        let index = serde_json::json!({ user_id: ids });
        let index_json = serde_json::to_vec_pretty(&index)?;
        write_atomic(&user_dir.join("index.json"), &index_json).await?;
        Ok(())
    }

    async fn load_from_disk(&self) -> Result<()> {
        let mut dir = match tokio::fs::read_dir(&self.dir).await {
            Ok(d) => d,
            // First run — nothing persisted yet.
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        let expected_dim = self.embeddings.dim();
        let mut loaded = 0usize;
        while let Some(entry) = dir.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let path = entry.path().join("vectors.json");
            let bytes = match tokio::fs::read(&path).await {
                Ok(b) => b,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            let vectors: Vec<MemoryVector> = match serde_json::from_slice(&bytes) {
                Ok(v) => v,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping corrupt memory snapshot");
                    continue;
                }
            };
            for vector in vectors {
                if vector.embedding.len() != expected_dim {
                    warn!(
                        id = %vector.id,
                        got = vector.embedding.len(),
                        expected = expected_dim,
                        "skipping vector with stale embedding dimension"
                    );
                    continue;
                }
                self.insert_vector(vector);
                loaded += 1;
            }
        }
        if loaded > 0 {
            info!(vectors = loaded, "memory store loaded from disk");
        }
        Ok(())
    }
}

/// Write-to-temp + atomic rename so readers never observe a torn file.
async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, bytes).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

/// Background saver: waits for a signal, debounces, drains any signals that
/// arrived while sleeping, then writes one snapshot. Holds only a `Weak`
/// reference so the task never keeps the store (or the process) alive.
async fn run_saver(store: Weak<VectorStore>, mut rx: mpsc::Receiver<()>, debounce: Duration) {
    while rx.recv().await.is_some() {
        tokio::time::sleep(debounce).await;
        while rx.try_recv().is_ok() {}
        let Some(store) = store.upgrade() else { break };
        if let Err(e) = store.flush().await {
            warn!(error = %e, "debounced memory save failed");
        }
    }
    debug!("memory saver task stopped");
}
