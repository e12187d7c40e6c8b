//! Vector store abstraction.
//!
//! Two backends behind one enum: a brute-force in-memory store (synchronous,
//! strictly ordered, used by tests) and a remote approximate-NN service
//! speaking a Qdrant-style REST contract. Writes are at-least-once visible
//! to searches after the call returns; the remote backend is otherwise
//! eventually consistent.

use std::collections::HashMap;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use prism_core::config::{VectorConfig, VectorProviderKind};

use crate::embed::EmbeddingClient;
use crate::error::{Result, VectorError};

/// What a stored vector points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingKind {
    Message,
    Summary,
    Fact,
}

/// Metadata carried alongside every vector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorMetadata {
    /// Id of the message/summary/fact this vector belongs to.
    pub ref_id: String,
    /// Chat the referenced item lives in; used for scoped deletes and
    /// per-conversation search filtering.
    pub chat_id: String,
    pub kind: EmbeddingKind,
    /// Epoch milliseconds at upsert time.
    pub created_at: i64,
    pub role: Option<String>,
    pub tokens: Option<u32>,
    #[serde(default)]
    pub entities: Vec<String>,
    #[serde(default)]
    pub topics: Vec<String>,
}

/// A stored vector with its source text and metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorRecord {
    pub id: String,
    pub content: String,
    pub embedding: Vec<f32>,
    pub metadata: VectorMetadata,
}

/// One search result. Similarity is cosine, clamped to [0, 1] for consumers.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub ref_id: String,
    pub similarity: f32,
    pub content: String,
    pub metadata: VectorMetadata,
}

/// Uniform add/search/get/delete over the configured backend.
pub enum VectorStore {
    Memory(MemoryBackend),
    Ann(AnnBackend),
}

impl VectorStore {
    /// Initialize the configured backend. For the remote service this
    /// creates the collection when absent; an unreachable backend fails
    /// with a transient error.
    pub async fn connect(config: &VectorConfig) -> Result<Self> {
        let embedder = EmbeddingClient::new(
            config.embedding_endpoint.clone(),
            config.embedding_model.clone(),
            config.dimension,
        );

        match config.provider {
            VectorProviderKind::Memory => Ok(VectorStore::Memory(MemoryBackend::new(embedder))),
            VectorProviderKind::AnnService => {
                let endpoint = config.endpoint.clone().ok_or_else(|| {
                    VectorError::Config("ann-service provider requires an endpoint".into())
                })?;
                let backend = AnnBackend::connect(
                    endpoint,
                    config.collection.clone(),
                    config.dimension,
                    embedder,
                )
                .await?;
                Ok(VectorStore::Ann(backend))
            }
        }
    }

    /// Embed `text` and upsert it with metadata. Returns the vector id.
    pub async fn add_embedding(
        &self,
        text: &str,
        kind: EmbeddingKind,
        mut metadata: VectorMetadata,
    ) -> Result<String> {
        metadata.kind = kind;
        match self {
            VectorStore::Memory(b) => b.add(text, metadata).await,
            VectorStore::Ann(b) => b.add(text, metadata).await,
        }
    }

    /// Embed a text with the store's embedding client.
    pub async fn embed(&self, text: &str) -> Vec<f32> {
        match self {
            VectorStore::Memory(b) => b.embedder.embed(text).await,
            VectorStore::Ann(b) => b.embedder.embed(text).await,
        }
    }

    /// K-nearest by cosine similarity, filtered to `similarity >= min_similarity`,
    /// sorted descending.
    pub async fn search(
        &self,
        query_text: &str,
        k: usize,
        min_similarity: f32,
    ) -> Result<Vec<SearchHit>> {
        let query = self.embed(query_text).await;
        self.search_by_vector(&query, k, min_similarity).await
    }

    /// Same as [`search`](Self::search) with a pre-computed query embedding.
    pub async fn search_by_vector(
        &self,
        query: &[f32],
        k: usize,
        min_similarity: f32,
    ) -> Result<Vec<SearchHit>> {
        match self {
            VectorStore::Memory(b) => b.search_by_vector(query, k, min_similarity),
            VectorStore::Ann(b) => b.search_by_vector(query, k, min_similarity).await,
        }
    }

    pub async fn get(&self, vector_id: &str) -> Result<Option<VectorRecord>> {
        match self {
            VectorStore::Memory(b) => Ok(b.get(vector_id)),
            VectorStore::Ann(b) => b.get(vector_id).await,
        }
    }

    pub async fn delete(&self, vector_id: &str) -> Result<()> {
        match self {
            VectorStore::Memory(b) => b.delete(vector_id),
            VectorStore::Ann(b) => b.delete(vector_id).await,
        }
    }

    /// Drop every vector belonging to a chat. Used when a conversation is
    /// deleted so messages and indices go together.
    pub async fn delete_by_chat(&self, chat_id: &str) -> Result<()> {
        match self {
            VectorStore::Memory(b) => b.delete_by_chat(chat_id),
            VectorStore::Ann(b) => b.delete_by_chat(chat_id).await,
        }
    }
}

/// Cosine similarity in [-1, 1]. Zero when either vector is all-zero.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    dot / (na * nb)
}

// ---------------------------------------------------------------------------
// In-memory backend
// ---------------------------------------------------------------------------

pub struct MemoryBackend {
    embedder: EmbeddingClient,
    records: Mutex<HashMap<String, VectorRecord>>,
}

impl MemoryBackend {
    pub fn new(embedder: EmbeddingClient) -> Self {
        Self {
            embedder,
            records: Mutex::new(HashMap::new()),
        }
    }

    fn search_by_vector(
        &self,
        query: &[f32],
        k: usize,
        min_similarity: f32,
    ) -> Result<Vec<SearchHit>> {
        let records = self.records.lock().unwrap();

        let mut hits: Vec<SearchHit> = records
            .values()
            .map(|r| SearchHit {
                ref_id: r.metadata.ref_id.clone(),
                similarity: cosine_similarity(query, &r.embedding).clamp(0.0, 1.0),
                content: r.content.clone(),
                metadata: r.metadata.clone(),
            })
            .filter(|h| h.similarity >= min_similarity)
            .collect();

        hits.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
        hits.truncate(k);
        Ok(hits)
    }

    async fn add(&self, text: &str, metadata: VectorMetadata) -> Result<String> {
        let embedding = self.embedder.embed(text).await;
        let id = Uuid::new_v4().to_string();
        let record = VectorRecord {
            id: id.clone(),
            content: text.to_string(),
            embedding,
            metadata,
        };
        self.records.lock().unwrap().insert(id.clone(), record);
        Ok(id)
    }

    fn get(&self, vector_id: &str) -> Option<VectorRecord> {
        self.records.lock().unwrap().get(vector_id).cloned()
    }

    fn delete(&self, vector_id: &str) -> Result<()> {
        self.records.lock().unwrap().remove(vector_id);
        Ok(())
    }

    fn delete_by_chat(&self, chat_id: &str) -> Result<()> {
        self.records
            .lock()
            .unwrap()
            .retain(|_, r| r.metadata.chat_id != chat_id);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Remote ANN backend
// ---------------------------------------------------------------------------

pub struct AnnBackend {
    client: reqwest::Client,
    endpoint: String,
    collection: String,
    embedder: EmbeddingClient,
}

impl AnnBackend {
    async fn connect(
        endpoint: String,
        collection: String,
        dimension: usize,
        embedder: EmbeddingClient,
    ) -> Result<Self> {
        let backend = Self {
            client: reqwest::Client::new(),
            endpoint,
            collection,
            embedder,
        };
        backend.ensure_collection(dimension).await?;
        Ok(backend)
    }

    fn url(&self, path: &str) -> String {
        format!("{}/collections/{}{}", self.endpoint, self.collection, path)
    }

    /// Create the collection when absent. Idempotent on the service side.
    async fn ensure_collection(&self, dimension: usize) -> Result<()> {
        let body = serde_json::json!({
            "vectors": { "size": dimension, "distance": "Cosine" }
        });

        let resp = self
            .client
            .put(self.url(""))
            .json(&body)
            .send()
            .await
            .map_err(|e| VectorError::Unavailable(format!("ann service unreachable: {e}")))?;

        // 409 means the collection already exists.
        let status = resp.status().as_u16();
        if !resp.status().is_success() && status != 409 {
            let message = resp.text().await.unwrap_or_default();
            return Err(VectorError::Api { status, message });
        }

        info!(collection = %self.collection, "vector collection ready");
        Ok(())
    }

    async fn add(&self, text: &str, metadata: VectorMetadata) -> Result<String> {
        let embedding = self.embedder.embed(text).await;
        let id = Uuid::new_v4().to_string();

        let payload = serde_json::json!({
            "content": text,
            "metadata": metadata,
        });
        let body = serde_json::json!({
            "points": [{ "id": id, "vector": embedding, "payload": payload }]
        });

        debug!(id = %id, collection = %self.collection, "upserting vector");

        let resp = self.client.put(self.url("/points")).json(&body).send().await?;
        check_status(resp).await?;
        Ok(id)
    }

    async fn search_by_vector(
        &self,
        query: &[f32],
        k: usize,
        min_similarity: f32,
    ) -> Result<Vec<SearchHit>> {
        let body = serde_json::json!({
            "vector": query,
            "limit": k,
            "score_threshold": min_similarity,
            "with_payload": true,
        });

        let resp = self
            .client
            .post(self.url("/points/search"))
            .json(&body)
            .send()
            .await?;
        let resp = check_status(resp).await?;

        let parsed: SearchResponse = resp
            .json()
            .await
            .map_err(|e| VectorError::Parse(e.to_string()))?;

        let mut hits = Vec::with_capacity(parsed.result.len());
        for point in parsed.result {
            let payload: PointPayload = serde_json::from_value(point.payload)
                .map_err(|e| VectorError::Parse(format!("bad point payload: {e}")))?;
            hits.push(SearchHit {
                ref_id: payload.metadata.ref_id.clone(),
                similarity: point.score.clamp(0.0, 1.0),
                content: payload.content,
                metadata: payload.metadata,
            });
        }
        // Service already sorts by score; keep the contract explicit anyway.
        hits.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
        Ok(hits)
    }

    async fn get(&self, vector_id: &str) -> Result<Option<VectorRecord>> {
        let resp = self
            .client
            .get(self.url(&format!("/points/{vector_id}")))
            .send()
            .await?;

        if resp.status().as_u16() == 404 {
            return Ok(None);
        }
        let resp = check_status(resp).await?;

        let parsed: GetResponse = resp
            .json()
            .await
            .map_err(|e| VectorError::Parse(e.to_string()))?;
        let payload: PointPayload = serde_json::from_value(parsed.result.payload)
            .map_err(|e| VectorError::Parse(format!("bad point payload: {e}")))?;

        Ok(Some(VectorRecord {
            id: parsed.result.id,
            content: payload.content,
            embedding: parsed.result.vector.unwrap_or_default(),
            metadata: payload.metadata,
        }))
    }

    async fn delete(&self, vector_id: &str) -> Result<()> {
        let body = serde_json::json!({ "points": [vector_id] });
        let resp = self
            .client
            .post(self.url("/points/delete"))
            .json(&body)
            .send()
            .await?;
        check_status(resp).await?;
        Ok(())
    }

    async fn delete_by_chat(&self, chat_id: &str) -> Result<()> {
        let body = serde_json::json!({
            "filter": {
                "must": [{ "key": "metadata.chat_id", "match": { "value": chat_id } }]
            }
        });
        let resp = self
            .client
            .post(self.url("/points/delete"))
            .json(&body)
            .send()
            .await?;
        check_status(resp).await?;
        Ok(())
    }
}

async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response> {
    let status = resp.status().as_u16();
    if resp.status().is_success() {
        Ok(resp)
    } else {
        let message = resp.text().await.unwrap_or_default();
        Err(VectorError::Api { status, message })
    }
}

// ANN service response types (private, deserialization only)

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    result: Vec<ScoredPoint>,
}

#[derive(Deserialize)]
struct ScoredPoint {
    score: f32,
    payload: serde_json::Value,
}

#[derive(Deserialize)]
struct GetResponse {
    result: StoredPoint,
}

#[derive(Deserialize)]
struct StoredPoint {
    id: String,
    vector: Option<Vec<f32>>,
    payload: serde_json::Value,
}

#[derive(Deserialize)]
struct PointPayload {
    content: String,
    metadata: VectorMetadata,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(ref_id: &str, chat: &str) -> VectorMetadata {
        VectorMetadata {
            ref_id: ref_id.to_string(),
            chat_id: chat.to_string(),
            kind: EmbeddingKind::Message,
            created_at: 0,
            role: Some("user".into()),
            tokens: Some(4),
            entities: Vec::new(),
            topics: Vec::new(),
        }
    }

    async fn memory_store() -> VectorStore {
        let config = VectorConfig::default();
        VectorStore::connect(&config).await.unwrap()
    }

    #[test]
    fn cosine_of_identical_vectors_is_one() {
        let v = vec![0.5, -0.2, 0.8];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_of_orthogonal_vectors_is_zero() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]), 0.0);
    }

    #[test]
    fn cosine_of_zero_vector_is_zero() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }

    #[tokio::test]
    async fn add_then_search_finds_exact_text() {
        let store = memory_store().await;
        store
            .add_embedding("rust ownership rules", EmbeddingKind::Message, meta("1", "c1"))
            .await
            .unwrap();
        store
            .add_embedding("cooking pasta at home", EmbeddingKind::Message, meta("2", "c1"))
            .await
            .unwrap();

        let hits = store.search("rust ownership rules", 10, 0.0).await.unwrap();
        assert!(!hits.is_empty());
        // The identical text embeds identically, so it ranks first with ~1.0.
        assert_eq!(hits[0].ref_id, "1");
        assert!(hits[0].similarity > 0.99);
    }

    #[tokio::test]
    async fn search_respects_k_and_threshold() {
        let store = memory_store().await;
        for i in 0..5 {
            store
                .add_embedding(
                    &format!("message number {i}"),
                    EmbeddingKind::Message,
                    meta(&i.to_string(), "c1"),
                )
                .await
                .unwrap();
        }
        let hits = store.search("message number 0", 3, 0.0).await.unwrap();
        assert!(hits.len() <= 3);
        let strict = store.search("message number 0", 10, 0.999).await.unwrap();
        assert_eq!(strict.len(), 1);
    }

    #[tokio::test]
    async fn delete_by_chat_removes_only_that_chat() {
        let store = memory_store().await;
        store
            .add_embedding("alpha", EmbeddingKind::Message, meta("1", "c1"))
            .await
            .unwrap();
        store
            .add_embedding("beta", EmbeddingKind::Message, meta("2", "c2"))
            .await
            .unwrap();

        store.delete_by_chat("c1").await.unwrap();

        let hits = store.search("alpha", 10, 0.0).await.unwrap();
        assert!(hits.iter().all(|h| h.metadata.chat_id == "c2"));
    }

    #[tokio::test]
    async fn get_and_delete_round_trip() {
        let store = memory_store().await;
        let id = store
            .add_embedding("gamma", EmbeddingKind::Fact, meta("9", "c1"))
            .await
            .unwrap();

        let record = store.get(&id).await.unwrap().unwrap();
        assert_eq!(record.content, "gamma");
        assert_eq!(record.metadata.kind, EmbeddingKind::Fact);

        store.delete(&id).await.unwrap();
        assert!(store.get(&id).await.unwrap().is_none());
    }
}
