//! Embedding client.
//!
//! Posts `{model, input}` to a configured endpoint and reads the usual
//! `{data: [{embedding: [...]}]}` shape. When no endpoint is configured, or
//! the call fails, a deterministic pseudo-random unit vector seeded from the
//! SHA-256 of the text is returned instead. The fallback keeps tests and
//! degraded deployments functional: identical texts still collide, distinct
//! texts still spread out.

use serde::Deserialize;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::error::{Result, VectorError};

pub struct EmbeddingClient {
    client: reqwest::Client,
    endpoint: Option<String>,
    model: String,
    dimension: usize,
}

impl EmbeddingClient {
    pub fn new(endpoint: Option<String>, model: String, dimension: usize) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint,
            model,
            dimension,
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Embed one text. Never fails: remote errors degrade to the
    /// deterministic fallback with a warning.
    pub async fn embed(&self, text: &str) -> Vec<f32> {
        match self.embed_remote(text).await {
            Ok(v) => v,
            Err(e) => {
                warn!(err = %e, "embedding call failed, using deterministic fallback");
                fallback_embedding(text, self.dimension)
            }
        }
    }

    async fn embed_remote(&self, text: &str) -> Result<Vec<f32>> {
        let endpoint = self
            .endpoint
            .as_deref()
            .ok_or_else(|| VectorError::Unavailable("no embedding endpoint configured".into()))?;

        let body = serde_json::json!({
            "model": self.model,
            "input": text,
        });

        debug!(model = %self.model, len = text.len(), "requesting embedding");

        let resp = self
            .client
            .post(format!("{}/v1/embeddings", endpoint))
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(VectorError::Api {
                status,
                message: text,
            });
        }

        let parsed: EmbeddingResponse = resp
            .json()
            .await
            .map_err(|e| VectorError::Parse(e.to_string()))?;

        let vector = parsed
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| VectorError::Parse("embedding response had no data".into()))?;

        if vector.len() != self.dimension {
            return Err(VectorError::Parse(format!(
                "embedding dimension mismatch: got {}, expected {}",
                vector.len(),
                self.dimension
            )));
        }

        Ok(vector)
    }
}

/// Deterministic unit vector from the SHA-256 of `text`.
///
/// The digest seeds an xorshift generator, so the whole vector is a pure
/// function of the input text and the dimension.
pub fn fallback_embedding(text: &str, dimension: usize) -> Vec<f32> {
    let digest = Sha256::digest(text.as_bytes());
    let mut state = u64::from_le_bytes(digest[0..8].try_into().unwrap()) | 1;

    let mut v: Vec<f32> = (0..dimension)
        .map(|_| {
            // xorshift64
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            // map to [-1, 1)
            (state as f64 / u64::MAX as f64) as f32 * 2.0 - 1.0
        })
        .collect();

    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in &mut v {
            *x /= norm;
        }
    }
    v
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Deserialize)]
struct EmbeddingDatum {
    embedding: Vec<f32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fallback_is_deterministic() {
        let a = fallback_embedding("hello world", 64);
        let b = fallback_embedding("hello world", 64);
        assert_eq!(a, b);
    }

    #[test]
    fn fallback_differs_per_text() {
        let a = fallback_embedding("hello world", 64);
        let b = fallback_embedding("goodbye world", 64);
        assert_ne!(a, b);
    }

    #[test]
    fn fallback_is_unit_length() {
        let v = fallback_embedding("anything at all", 128);
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
    }

    #[tokio::test]
    async fn embed_without_endpoint_degrades() {
        let client = EmbeddingClient::new(None, "test-model".into(), 32);
        let v = client.embed("some text").await;
        assert_eq!(v.len(), 32);
        assert_eq!(v, fallback_embedding("some text", 32));
    }
}
