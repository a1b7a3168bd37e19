//! Hybrid retrieval: one pass of cosine early-filtering, BM25 keyword
//! scoring, and metadata features combined into a composite score, followed
//! by a single sort.

use std::collections::HashMap;

use crate::embedding::cosine_similarity;
use crate::error::Result;
use crate::store::VectorStore;
use crate::text::tokenize;
use crate::types::{MemoryVector, ScoredMemory, ScoringWeights, SearchQuery};

const DEFAULT_THRESHOLD: f32 = 0.3;
const DEFAULT_LIMIT: usize = 10;
/// Recency half-life in days.
const HALF_LIFE_DAYS: f32 = 30.0;

const BM25_K1: f32 = 1.2;
const BM25_B: f32 = 0.75;

impl VectorStore {
    /// Hybrid search over stored vectors. Side effect: bumps access count
    /// and last-access time of every returned vector; the bump does not
    /// reorder this call's result.
    pub async fn search_memories(&self, query: &SearchQuery) -> Result<Vec<ScoredMemory>> {
        let embedded = self.embeddings().embed(&query.text).await?;

        let mut candidates: Vec<MemoryVector> = match &query.user_id {
            Some(user) => self.get_user_memories(user),
            None => self
                .user_ids()
                .into_iter()
                .flat_map(|u| self.get_user_memories(&u))
                .collect(),
        };
        if let Some(kind) = query.kind {
            candidates.retain(|v| v.kind == kind);
        }
        if let Some(min_ts) = query.min_timestamp_ms {
            candidates.retain(|v| v.timestamp_ms >= min_ts);
        }

        let results = rank(
            candidates,
            &embedded.vector,
            &query.text,
            query.threshold.unwrap_or(DEFAULT_THRESHOLD),
            query.limit.unwrap_or(DEFAULT_LIMIT),
            query.weights.unwrap_or_default(),
            chrono::Utc::now().timestamp_millis(),
        );

        let ids: Vec<String> = results.iter().map(|s| s.vector.id.clone()).collect();
        self.record_access(&ids);
        Ok(results)
    }
}

/// Score and order candidates. O(N log N) in the candidate count; the sort
/// happens exactly once.
pub fn rank(
    candidates: Vec<MemoryVector>,
    query_embedding: &[f32],
    query_text: &str,
    threshold: f32,
    limit: usize,
    weights: ScoringWeights,
    now_ms: i64,
) -> Vec<ScoredMemory> {
    // Cosine early filter: below-threshold candidates never reach BM25.
    let survivors: Vec<(MemoryVector, f32)> = candidates
        .into_iter()
        .filter_map(|v| {
            let sim = cosine_similarity(&v.embedding, query_embedding);
            (sim >= threshold).then_some((v, sim))
        })
        .collect();

    let bm25 = Bm25::build(survivors.iter().map(|(v, _)| v.content.as_str()));
    let query_terms = tokenize(query_text);

    let mut scored: Vec<ScoredMemory> = survivors
        .into_iter()
        .enumerate()
        .map(|(doc_idx, (vector, semantic))| {
            let keyword = bm25.score(doc_idx, &query_terms);
            let score = weights.semantic * semantic
                + weights.bm25 * keyword
                + weights.type_weight * vector.kind.type_weight()
                + weights.recency * recency_decay(vector.age_ms(now_ms))
                + weights.importance * vector.importance
                + weights.access * access_boost(vector.access_count);
            ScoredMemory {
                vector,
                score,
                rank: 0,
                semantic,
                bm25: keyword,
            }
        })
        .collect();

    scored.sort_by(|a, b| b.score.total_cmp(&a.score));
    scored.truncate(limit);
    for (i, s) in scored.iter_mut().enumerate() {
        s.rank = i;
    }
    scored
}

/// Exponential decay with a ~30 day half-life.
fn recency_decay(age_ms: i64) -> f32 {
    let age_days = age_ms as f32 / 86_400_000.0;
    0.5f32.powf(age_days / HALF_LIFE_DAYS)
}

/// Log-scaled access frequency, saturating at ~100 accesses.
fn access_boost(access_count: u64) -> f32 {
    ((1.0 + access_count as f32).ln() / (101.0f32).ln()).min(1.0)
}

/// Okapi BM25 over the surviving candidate set, normalized to [0, 1] by the
/// best-scoring document so it composes with the other weighted features.
struct Bm25 {
    doc_terms: Vec<HashMap<String, f32>>,
    doc_lens: Vec<f32>,
    avg_len: f32,
    idf: HashMap<String, f32>,
    max_possible: f32,
}

impl Bm25 {
    fn build<'a>(docs: impl Iterator<Item = &'a str>) -> Self {
        let mut doc_terms: Vec<HashMap<String, f32>> = Vec::new();
        let mut doc_lens: Vec<f32> = Vec::new();
        let mut df: HashMap<String, u32> = HashMap::new();

        for doc in docs {
            let terms = tokenize(doc);
            doc_lens.push(terms.len() as f32);
            let mut tf: HashMap<String, f32> = HashMap::new();
            for t in terms {
                *tf.entry(t).or_insert(0.0) += 1.0;
            }
            for term in tf.keys() {
                *df.entry(term.clone()).or_insert(0) += 1;
            }
            doc_terms.push(tf);
        }

        let n = doc_terms.len() as f32;
        let avg_len = if doc_lens.is_empty() {
            0.0
        } else {
            doc_lens.iter().sum::<f32>() / doc_lens.len() as f32
        };
        let idf: HashMap<String, f32> = df
            .into_iter()
            .map(|(term, freq)| {
                let f = freq as f32;
                (term, (1.0 + (n - f + 0.5) / (f + 0.5)).ln())
            })
            .collect();
        // Upper bound used for normalization: sum of all idf values at
        // saturated term frequency.
        let max_possible: f32 = idf.values().map(|v| v * (BM25_K1 + 1.0)).sum();

        Self {
            doc_terms,
            doc_lens,
            avg_len,
            idf,
            max_possible,
        }
    }

    fn score(&self, doc_idx: usize, query_terms: &[String]) -> f32 {
        if self.max_possible <= f32::EPSILON || self.avg_len <= f32::EPSILON {
            return 0.0;
        }
        let tf_map = &self.doc_terms[doc_idx];
        let dl = self.doc_lens[doc_idx];
        let mut raw = 0.0;
        for term in query_terms {
            let Some(idf) = self.idf.get(term) else { continue };
            let tf = tf_map.get(term).copied().unwrap_or(0.0);
            if tf == 0.0 {
                continue;
            }
            raw += idf * (tf * (BM25_K1 + 1.0))
                / (tf + BM25_K1 * (1.0 - BM25_B + BM25_B * dl / self.avg_len));
        }
        (raw / self.max_possible).clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::{EmbeddingService, HashEmbedder};
    use crate::store::VectorStore;
    use crate::types::{LifecycleKind, Provenance};
    use conclave_core::config::MemoryConfig;
    use std::sync::Arc;
    use std::time::Duration;

    async fn store_in(dir: &std::path::Path) -> Arc<VectorStore> {
        let config = MemoryConfig {
            dir: dir.display().to_string(),
            save_debounce_ms: 10_000,
            embedding_dim: 256,
            ..MemoryConfig::default()
        };
        let embeddings = Arc::new(EmbeddingService::new(
            Arc::new(HashEmbedder::new(256)),
            Duration::from_secs(60),
        ));
        VectorStore::open(config, embeddings).await.unwrap()
    }

    #[tokio::test]
    async fn near_identical_cjk_memory_ranks_in_top_three() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store_in(tmp.path()).await;
        store
            .add_memory("u", "我爱叫外卖", LifecycleKind::ShortTerm, Provenance::Explicit, None)
            .await
            .unwrap();

        let results = store
            .search_memories(&SearchQuery::for_user("u", "我喜欢外卖"))
            .await
            .unwrap();
        assert!(!results.is_empty(), "expected the near-identical memory to match");
        assert!(results[0].rank < 3);
        assert_eq!(results[0].vector.content, "我爱叫外卖");
    }

    #[tokio::test]
    async fn high_threshold_filters_unrelated_queries() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store_in(tmp.path()).await;
        store
            .add_memory("u", "favorite tea is longjing", LifecycleKind::Profile, Provenance::Explicit, None)
            .await
            .unwrap();

        let mut query = SearchQuery::for_user("u", "kubernetes pod eviction policy");
        query.threshold = Some(0.8);
        let results = store.search_memories(&query).await.unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn pinned_outranks_short_term_for_equal_content() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store_in(tmp.path()).await;
        store
            .add_memory("u", "the deploy key rotates monthly", LifecycleKind::ShortTerm, Provenance::Explicit, None)
            .await
            .unwrap();
        store
            .add_memory("u", "the deploy key rotates every month", LifecycleKind::Pinned, Provenance::Explicit, None)
            .await
            .unwrap();

        let results = store
            .search_memories(&SearchQuery::for_user("u", "deploy key rotation"))
            .await
            .unwrap();
        assert_eq!(results[0].vector.kind, LifecycleKind::Pinned);
    }

    #[tokio::test]
    async fn search_bumps_access_counts_without_reordering() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store_in(tmp.path()).await;
        let id = store
            .add_memory("u", "team standup at nine", LifecycleKind::MidTerm, Provenance::Explicit, None)
            .await
            .unwrap();

        let before = store.get_memory_by_id(&id).unwrap().access_count;
        store
            .search_memories(&SearchQuery::for_user("u", "standup time"))
            .await
            .unwrap();
        let after = store.get_memory_by_id(&id).unwrap().access_count;
        assert_eq!(after, before + 1);
    }

    #[test]
    fn ranks_are_dense_from_zero() {
        let weights = ScoringWeights::default();
        let make = |content: &str| {
            let mut embedding = vec![0.0f32; 4];
            embedding[0] = 1.0;
            MemoryVector::new("u", content, embedding, LifecycleKind::MidTerm, 0.5)
        };
        let query = [1.0f32, 0.0, 0.0, 0.0];
        let out = rank(
            vec![make("alpha"), make("beta"), make("gamma")],
            &query,
            "alpha",
            0.1,
            2,
            weights,
            chrono::Utc::now().timestamp_millis(),
        );
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].rank, 0);
        assert_eq!(out[1].rank, 1);
        assert!(out[0].score >= out[1].score);
    }

    #[test]
    fn bm25_prefers_exact_keyword_match() {
        let docs = ["rust compiler internals", "gardening in spring", "rust borrow checker"];
        let bm25 = Bm25::build(docs.iter().copied());
        let query = tokenize("rust compiler");
        let s0 = bm25.score(0, &query);
        let s1 = bm25.score(1, &query);
        let s2 = bm25.score(2, &query);
        assert!(s0 > s2, "two-term match should beat one-term: {s0} vs {s2}");
        assert_eq!(s1, 0.0);
    }
}
