use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::error::{MemoryError, Result};
use crate::text::tokenize;

/// Maximum cache entries before the oldest is evicted.
const MAX_CACHE_ENTRIES: usize = 2048;

#[derive(Debug, Clone)]
pub struct EmbeddingResult {
    pub vector: Vec<f32>,
    pub model: String,
    pub cached: bool,
}

/// An embedding backend. Implementations return raw vectors; the service
/// normalizes them to unit length.
#[async_trait]
pub trait Embedder: Send + Sync {
    fn model(&self) -> &str;
    fn dim(&self) -> usize;
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// Deterministic fallback: hashes tokens into a fixed-dimension vector.
/// Used by tests and offline deployments — no network, stable output.
pub struct HashEmbedder {
    dim: usize,
}

impl HashEmbedder {
    pub fn new(dim: usize) -> Self {
        Self { dim }
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    fn model(&self) -> &str {
        "hash-fallback"
    }

    fn dim(&self) -> usize {
        self.dim
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vector = vec![0.0f32; self.dim];
        for term in tokenize(text) {
            let digest = Sha256::digest(term.as_bytes());
            let hash = u64::from_le_bytes(digest[..8].try_into().expect("digest >= 8 bytes"));
            let index = (hash % self.dim as u64) as usize;
            // Sign bit makes unrelated texts cancel toward zero similarity.
            let sign = if hash & (1 << 63) == 0 { 1.0 } else { -1.0 };
            vector[index] += sign;
        }
        Ok(vector)
    }
}

/// Remote embedding API (OpenAI-compatible `/v1/embeddings`).
pub struct RemoteEmbedder {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    dim: usize,
}

impl RemoteEmbedder {
    pub fn new(api_key: String, base_url: String, model: String, dim: usize) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            base_url,
            model,
            dim,
        }
    }
}

#[async_trait]
impl Embedder for RemoteEmbedder {
    fn model(&self) -> &str {
        &self.model
    }

    fn dim(&self) -> usize {
        self.dim
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let url = format!("{}/v1/embeddings", self.base_url);
        let body = serde_json::json!({
            "model": self.model,
            "input": text,
            "dimensions": self.dim,
        });

        let resp = self
            .client
            .post(&url)
            .header("authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| MemoryError::Embedding(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let text = resp.text().await.unwrap_or_default();
            warn!(status, body = %text, "embedding API error");
            return Err(MemoryError::Embedding(format!("status {status}: {text}")));
        }

        let parsed: EmbeddingApiResponse = resp
            .json()
            .await
            .map_err(|e| MemoryError::Embedding(e.to_string()))?;
        let vector = parsed
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| MemoryError::Embedding("response contained no embedding".into()))?;

        if vector.len() != self.dim {
            return Err(MemoryError::DimensionMismatch {
                expected: self.dim,
                got: vector.len(),
            });
        }
        Ok(vector)
    }
}

#[derive(Deserialize)]
struct EmbeddingApiResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Deserialize)]
struct EmbeddingDatum {
    embedding: Vec<f32>,
}

struct CacheEntry {
    vector: Vec<f32>,
    model: String,
    at: Instant,
}

/// Caching front for an [`Embedder`]. Guarantees unit-length output and a
/// fixed dimension; entries expire after a TTL; swapping the backend at
/// runtime flushes the cache.
pub struct EmbeddingService {
    backend: RwLock<Arc<dyn Embedder>>,
    cache: Mutex<HashMap<String, CacheEntry>>,
    ttl: Duration,
}

impl EmbeddingService {
    pub fn new(backend: Arc<dyn Embedder>, ttl: Duration) -> Self {
        Self {
            backend: RwLock::new(backend),
            cache: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    pub fn dim(&self) -> usize {
        self.backend.read().unwrap().dim()
    }

    pub fn model(&self) -> String {
        self.backend.read().unwrap().model().to_string()
    }

    /// Replace the backend. Cached vectors from the old backend are not
    /// comparable to new ones, so the cache is flushed.
    pub fn set_backend(&self, backend: Arc<dyn Embedder>) {
        *self.backend.write().unwrap() = backend;
        self.cache.lock().unwrap().clear();
        debug!("embedding backend replaced, cache flushed");
    }

    pub async fn embed(&self, text: &str) -> Result<EmbeddingResult> {
        if let Some(hit) = self.cache_get(text) {
            return Ok(hit);
        }

        let backend = self.backend.read().unwrap().clone();
        let mut vector = backend.embed(text).await?;
        let expected = backend.dim();
        if vector.len() != expected {
            return Err(MemoryError::DimensionMismatch {
                expected,
                got: vector.len(),
            });
        }
        normalize(&mut vector);

        let model = backend.model().to_string();
        self.cache_put(text, &vector, &model);
        Ok(EmbeddingResult {
            vector,
            model,
            cached: false,
        })
    }

    fn cache_get(&self, text: &str) -> Option<EmbeddingResult> {
        let cache = self.cache.lock().unwrap();
        let entry = cache.get(text)?;
        if entry.at.elapsed() > self.ttl {
            return None;
        }
        Some(EmbeddingResult {
            vector: entry.vector.clone(),
            model: entry.model.clone(),
            cached: true,
        })
    }

    fn cache_put(&self, text: &str, vector: &[f32], model: &str) {
        let mut cache = self.cache.lock().unwrap();
        if cache.len() >= MAX_CACHE_ENTRIES {
            let oldest = cache
                .iter()
                .min_by_key(|(_, e)| e.at)
                .map(|(k, _)| k.clone());
            if let Some(k) = oldest {
                cache.remove(&k);
            }
        }
        cache.insert(
            text.to_string(),
            CacheEntry {
                vector: vector.to_vec(),
                model: model.to_string(),
                at: Instant::now(),
            },
        );
    }
}

/// Scale to unit length. The zero vector stays zero.
pub fn normalize(vector: &mut [f32]) {
    let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for x in vector.iter_mut() {
            *x /= norm;
        }
    }
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if mag_a == 0.0 || mag_b == 0.0 {
        return 0.0;
    }
    (dot / (mag_a * mag_b)).clamp(-1.0, 1.0)
}
