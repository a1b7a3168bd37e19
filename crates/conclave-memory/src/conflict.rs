//! Conflict resolution for incoming memories.
//!
//! A new memory that semantically overlaps an existing one must resolve to
//! a single consistent state. Candidates are pre-filtered by embedding
//! similarity (top-K for the same user), then judged:
//!
//! * sim < 0.7: no conflict, vectors coexist.
//! * 0.7 <= sim < 0.9: soft conflict, the provider judges compatibility.
//!   Incompatible pairs deprecate the older vector (importance halved).
//! * sim >= 0.9: hard conflict when the provider judges the contents
//!   contradictory: the older vector is replaced.
//!
//! An implicit (system-inferred) newcomer never displaces an explicit
//! (user-stated) memory.

use std::sync::Arc;

use tracing::{debug, info};

use conclave_provider::{ChatMessage, RetryingClient};

use crate::embedding::cosine_similarity;
use crate::error::{MemoryError, Result};
use crate::store::VectorStore;
use crate::txlog::Transaction;
use crate::types::{MemoryVector, Provenance};

pub const SOFT_CONFLICT_THRESHOLD: f32 = 0.7;
pub const HARD_CONFLICT_THRESHOLD: f32 = 0.9;
/// How many most-similar existing vectors are examined per insert.
pub const CONFLICT_TOP_K: usize = 10;

/// What happened to an incoming memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConflictOutcome {
    /// No overlapping vectors; stored as-is.
    Stored { id: String },
    /// Overlap existed but the facts are compatible; both kept.
    StoredAlongside { id: String },
    /// Soft conflict: the older vector was deprecated, the new one stored
    /// with a reference to it.
    DeprecatedOlder { id: String, older_id: String },
    /// Hard conflict: the older vector was removed and replaced.
    ReplacedOlder { id: String, older_id: String },
    /// The newcomer was implicit and contradicted an explicit memory, so
    /// the explicit one wins and the newcomer is discarded.
    KeptExisting { existing_id: String },
}

impl ConflictOutcome {
    /// The id a caller should reference after the operation, whichever
    /// vector survived as authoritative.
    pub fn surviving_id(&self) -> &str {
        match self {
            ConflictOutcome::Stored { id }
            | ConflictOutcome::StoredAlongside { id }
            | ConflictOutcome::DeprecatedOlder { id, .. }
            | ConflictOutcome::ReplacedOlder { id, .. } => id,
            ConflictOutcome::KeptExisting { existing_id } => existing_id,
        }
    }
}

enum PlannedAction {
    PlainStore,
    Deprecate(MemoryVector),
    Replace(MemoryVector),
    Discard(String),
}

pub struct ConflictResolver {
    client: Arc<RetryingClient>,
}

impl ConflictResolver {
    pub fn new(client: Arc<RetryingClient>) -> Self {
        Self { client }
    }

    /// Store `incoming`, resolving conflicts against existing memories of
    /// the same user. All store mutations run inside one transaction;
    /// provider judgments happen before any mutation so a judgment failure
    /// leaves the store untouched.
    pub async fn store_resolving(
        &self,
        store: &VectorStore,
        mut incoming: MemoryVector,
    ) -> Result<ConflictOutcome> {
        let similar = top_k_similar(store, &incoming);
        let had_overlap = !similar.is_empty();

        let action = self.plan(&incoming, &similar).await?;

        match action {
            PlannedAction::Discard(existing_id) => {
                debug!(
                    existing = %existing_id,
                    "implicit memory conflicts with explicit; keeping existing"
                );
                Ok(ConflictOutcome::KeptExisting { existing_id })
            }
            PlannedAction::PlainStore => {
                let mut tx = Transaction::new(store);
                let id = tx.add(incoming);
                tx.commit();
                if had_overlap {
                    Ok(ConflictOutcome::StoredAlongside { id })
                } else {
                    Ok(ConflictOutcome::Stored { id })
                }
            }
            PlannedAction::Deprecate(older) => {
                let older_id = older.id.clone();
                incoming.supersedes = Some(older_id.clone());

                let mut deprecated = older;
                deprecated.set_importance(deprecated.importance / 2.0);

                let mut tx = Transaction::new(store);
                if let Err(e) = tx.resolve_conflict_update(deprecated) {
                    tx.rollback();
                    return Err(e);
                }
                let id = tx.add(incoming);
                tx.commit();
                info!(new = %id, older = %older_id, "soft conflict: older memory deprecated");
                Ok(ConflictOutcome::DeprecatedOlder { id, older_id })
            }
            PlannedAction::Replace(older) => {
                let older_id = older.id.clone();
                incoming.supersedes = Some(older_id.clone());

                let mut tx = Transaction::new(store);
                if tx.resolve_conflict_remove(&older_id).is_none() {
                    tx.rollback();
                    return Err(MemoryError::NotFound { id: older_id });
                }
                let id = tx.add(incoming);
                tx.commit();
                info!(new = %id, older = %older_id, "hard conflict: older memory replaced");
                Ok(ConflictOutcome::ReplacedOlder { id, older_id })
            }
        }
    }

    /// Decide what to do, strongest overlap first. Pure planning; no
    /// store mutation happens here.
    async fn plan(
        &self,
        incoming: &MemoryVector,
        similar: &[(MemoryVector, f32)],
    ) -> Result<PlannedAction> {
        for (existing, sim) in similar {
            if *sim >= HARD_CONFLICT_THRESHOLD {
                if self.judge_contradictory(&existing.content, &incoming.content).await? {
                    if explicit_wins(incoming, existing) {
                        return Ok(PlannedAction::Discard(existing.id.clone()));
                    }
                    return Ok(PlannedAction::Replace(existing.clone()));
                }
            } else if !self.judge_compatible(&existing.content, &incoming.content).await? {
                if explicit_wins(incoming, existing) {
                    return Ok(PlannedAction::Discard(existing.id.clone()));
                }
                return Ok(PlannedAction::Deprecate(existing.clone()));
            }
        }
        Ok(PlannedAction::PlainStore)
    }

    /// "Are these facts compatible?" Unclear output counts as compatible;
    /// keeping both is the least destructive reading.
    async fn judge_compatible(&self, a: &str, b: &str) -> Result<bool> {
        let answer = self
            .ask_yes_no(&format!(
                "Fact A: \"{a}\"\nFact B: \"{b}\"\n\nCan both facts be true at the same time? \
                 Answer exactly YES or NO."
            ))
            .await?;
        Ok(answer.unwrap_or(true))
    }

    /// "Do these contradict?" Unclear output counts as not contradictory.
    async fn judge_contradictory(&self, a: &str, b: &str) -> Result<bool> {
        let answer = self
            .ask_yes_no(&format!(
                "Statement A: \"{a}\"\nStatement B: \"{b}\"\n\nDo these two statements directly \
                 contradict each other? Answer exactly YES or NO."
            ))
            .await?;
        Ok(answer.unwrap_or(false))
    }

    async fn ask_yes_no(&self, question: &str) -> Result<Option<bool>> {
        let messages = [
            ChatMessage::system(
                "You judge factual statements about a user's memory. Reply with exactly one word.",
            ),
            ChatMessage::user(question),
        ];
        let generation = self
            .client
            .generate(&messages, None)
            .await
            .into_result()
            .map_err(|f| MemoryError::Conflict(format!("provider judgment failed: {f}")))?;
        Ok(parse_yes_no(&generation.text))
    }
}

/// The incoming memory loses when it is implicit and the existing one is
/// explicit.
fn explicit_wins(incoming: &MemoryVector, existing: &MemoryVector) -> bool {
    incoming.provenance == Provenance::Implicit && existing.provenance == Provenance::Explicit
}

fn parse_yes_no(text: &str) -> Option<bool> {
    let upper = text.trim().to_ascii_uppercase();
    if upper.starts_with("YES") {
        Some(true)
    } else if upper.starts_with("NO") {
        Some(false)
    } else {
        None
    }
}

/// Top-K most similar same-user vectors at or above the soft threshold,
/// strongest first. O(N log N + N·K) overall, never all-pairs.
fn top_k_similar(store: &VectorStore, incoming: &MemoryVector) -> Vec<(MemoryVector, f32)> {
    let mut similar: Vec<(MemoryVector, f32)> = store
        .get_user_memories(&incoming.user_id)
        .into_iter()
        .filter(|v| v.id != incoming.id)
        .map(|v| {
            let sim = cosine_similarity(&v.embedding, &incoming.embedding);
            (v, sim)
        })
        .filter(|(_, sim)| *sim >= SOFT_CONFLICT_THRESHOLD)
        .collect();
    similar.sort_by(|(_, a), (_, b)| b.total_cmp(a));
    similar.truncate(CONFLICT_TOP_K);
    similar
}
