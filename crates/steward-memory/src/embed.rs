//! Embedding backends. Stores are model-pinned: the collection records which
//! embedder wrote it, and a different model is refused rather than silently
//! mixing vector spaces.

use async_trait::async_trait;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::{MemoryError, Result};

#[async_trait]
pub trait Embedder: Send + Sync {
    /// Stable identifier recorded in the collection metadata.
    fn model_id(&self) -> &str;

    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// L2 distance between two vectors of equal length.
pub fn l2_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}

// ── HTTP embedder ────────────────────────────────────────────────────────────

/// OpenAI-compatible `/v1/embeddings` client (works against Ollama, LM Studio,
/// or a hosted endpoint).
pub struct HttpEmbedder {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
}

impl HttpEmbedder {
    pub fn new(base_url: String, model: String, api_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
            model,
            api_key,
        }
    }
}

#[derive(Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingRow>,
}

#[derive(Deserialize)]
struct EmbeddingRow {
    embedding: Vec<f32>,
}

#[async_trait]
impl Embedder for HttpEmbedder {
    fn model_id(&self) -> &str {
        &self.model
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let url = format!("{}/v1/embeddings", self.base_url);
        let body = serde_json::json!({ "model": self.model, "input": text });

        let mut builder = self.client.post(&url).json(&body);
        if let Some(ref key) = self.api_key {
            builder = builder.header("Authorization", format!("Bearer {key}"));
        }

        let resp = builder
            .send()
            .await
            .map_err(|e| MemoryError::Embedding(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let text = resp.text().await.unwrap_or_default();
            return Err(MemoryError::Embedding(format!(
                "embeddings API error ({status}): {text}"
            )));
        }

        let parsed: EmbeddingsResponse = resp
            .json()
            .await
            .map_err(|e| MemoryError::Embedding(e.to_string()))?;

        parsed
            .data
            .into_iter()
            .next()
            .map(|row| row.embedding)
            .ok_or_else(|| MemoryError::Embedding("empty embeddings response".into()))
    }
}

// ── Hashing embedder ─────────────────────────────────────────────────────────

/// Deterministic offline embedder: each token hashes into a bucket of a
/// fixed-size vector, which is then L2-normalised. No semantic quality, but
/// stable across runs, which is all the degraded mode and the test suite need.
pub struct HashEmbedder {
    dim: usize,
}

impl HashEmbedder {
    pub const DEFAULT_DIM: usize = 384;

    pub fn new(dim: usize) -> Self {
        Self { dim }
    }
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new(Self::DEFAULT_DIM)
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    fn model_id(&self) -> &str {
        "hash-v1"
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vec = vec![0.0f32; self.dim];
        for token in tokenize(text) {
            let digest = Sha256::digest(token.as_bytes());
            let bucket = u64::from_le_bytes(digest[..8].try_into().unwrap()) as usize % self.dim;
            // Second hash byte decides the sign so vectors are not all-positive.
            let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
            vec[bucket] += sign;
        }
        let norm = vec.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vec {
                *v /= norm;
            }
        }
        debug!(dim = self.dim, "hash-embedded text");
        Ok(vec)
    }
}

fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() > 1)
        .map(|t| t.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn hash_embedder_is_deterministic() {
        let e = HashEmbedder::default();
        let a = e.embed("schedule a meeting with alice").await.unwrap();
        let b = e.embed("schedule a meeting with alice").await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn similar_text_is_closer_than_unrelated() {
        let e = HashEmbedder::default();
        let q = e.embed("calendar meeting tomorrow").await.unwrap();
        let near = e.embed("meeting on the calendar tomorrow").await.unwrap();
        let far = e.embed("quarterly polymer extrusion yield").await.unwrap();
        assert!(l2_distance(&q, &near) < l2_distance(&q, &far));
    }

    #[tokio::test]
    async fn vectors_are_normalised() {
        let e = HashEmbedder::default();
        let v = e.embed("hello world").await.unwrap();
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }
}
