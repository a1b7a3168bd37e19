//! Lifecycle cleanup: age- and importance-based eviction plus a per-user
//! cap, with `pinned` vectors always preserved.

use std::collections::HashSet;

use tracing::info;

use crate::store::VectorStore;
use crate::types::{CleanupOptions, CleanupReport, LifecycleKind, MemoryVector};

impl VectorStore {
    /// Run one cleanup pass over every user. Returns how many vectors were
    /// evicted and how many remain.
    pub fn cleanup_expired(&self, options: &CleanupOptions) -> CleanupReport {
        let now = chrono::Utc::now().timestamp_millis();
        let mut removed = 0usize;

        for user in self.user_ids() {
            let vectors = self.get_user_memories(&user);
            for id in plan_evictions(&vectors, options, now) {
                if self.remove_vector(&id).is_some() {
                    removed += 1;
                }
            }
        }

        if removed > 0 {
            self.mark_dirty();
            info!(removed, kept = self.len(), "memory cleanup pass complete");
        }
        CleanupReport {
            removed,
            kept: self.len(),
        }
    }
}

/// Decide which of one user's vectors to evict. Two passes: expired
/// low-importance vectors first, then the lowest-retention vectors beyond
/// the per-user cap. Pinned vectors are exempt from both.
pub fn plan_evictions(
    vectors: &[MemoryVector],
    options: &CleanupOptions,
    now_ms: i64,
) -> Vec<String> {
    let mut evicted: HashSet<&str> = HashSet::new();

    if let Some(max_age) = options.max_age_ms {
        for v in vectors {
            if v.kind == LifecycleKind::Pinned {
                continue;
            }
            if v.age_ms(now_ms) > max_age && v.importance < options.min_importance {
                evicted.insert(v.id.as_str());
            }
        }
    }

    if let Some(cap) = options.max_per_user {
        let mut survivors: Vec<&MemoryVector> = vectors
            .iter()
            .filter(|v| !evicted.contains(v.id.as_str()))
            .collect();
        if survivors.len() > cap {
            // Lowest retention score goes first; pinned vectors sort last
            // and are never taken even if the cap is exceeded by them alone.
            survivors.sort_by(|a, b| {
                retention_score(a, now_ms).total_cmp(&retention_score(b, now_ms))
            });
            let mut excess = survivors.len() - cap;
            for v in survivors {
                if excess == 0 {
                    break;
                }
                if v.kind == LifecycleKind::Pinned {
                    continue;
                }
                evicted.insert(v.id.as_str());
                excess -= 1;
            }
        }
    }

    evicted.into_iter().map(String::from).collect()
}

/// Composite retention score for cap eviction — the metadata half of the
/// hybrid search score (no query to compare against here).
fn retention_score(v: &MemoryVector, now_ms: i64) -> f32 {
    let age_days = v.age_ms(now_ms) as f32 / 86_400_000.0;
    let recency = 0.5f32.powf(age_days / 30.0);
    let access = ((1.0 + v.access_count as f32).ln() / (101.0f32).ln()).min(1.0);
    0.3 * v.kind.type_weight() + 0.3 * recency + 0.3 * v.importance + 0.1 * access
}
