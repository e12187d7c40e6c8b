//! History vectorizer: turns raw messages into structured, indexed history.
//!
//! Everything here is deterministic: entity extraction is pattern-based,
//! topics come from a small closed taxonomy, intent from lexical rules.
//! The only network call is the embedding, and that degrades to the
//! deterministic fallback inside the vector store.

use std::collections::BTreeSet;
use std::sync::{Arc, LazyLock};

use regex::Regex;
use sha2::{Digest, Sha256};
use tracing::debug;

use prism_core::{ChatId, Message, MessageId};
use prism_vector::{EmbeddingKind, VectorMetadata, VectorStore};

use crate::error::Result;
use crate::metadata::MetadataStore;
use crate::types::{MessageMetadata, QueryAnalysis, QueryIntent, TemporalContext};

static CAPITALIZED_BIGRAM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b[A-Z][a-z]+\s+[A-Z][a-z]+\b").unwrap());
static DATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(?:\d{4}-\d{2}-\d{2}|\d{1,2}/\d{1,2}/\d{2,4})\b").unwrap());
static CLOCK_TIME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b\d{1,2}:\d{2}(?::\d{2})?(?:\s*(?i:am|pm))?\b").unwrap());
static CURRENCY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\d+(?:[.,]\d+)?|\b\d+(?:[.,]\d+)?\s*(?:USD|VND|EUR)\b|\d+(?:[.,]\d+)?\s*₫")
        .unwrap()
});
static ACRONYM: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\b[A-Z]{2,6}\b").unwrap());

/// Closed topic taxonomy: (topic, keyword bag). Multi-word keywords match by
/// substring, single words by whole token, both on the lowercased text.
const TOPIC_TAXONOMY: &[(&str, &[&str])] = &[
    (
        "health",
        &["doctor", "medicine", "sick", "hospital", "health", "sức khỏe", "bác sĩ", "thuốc", "bệnh"],
    ),
    (
        "finance",
        &["money", "bank", "invest", "loan", "budget", "salary", "tiền", "ngân hàng", "đầu tư", "vay"],
    ),
    (
        "technology",
        &["computer", "software", "code", "programming", "machine learning", "neural", "algorithm", "công nghệ", "máy tính", "phần mềm", "lập trình"],
    ),
    (
        "travel",
        &["trip", "flight", "hotel", "travel", "visa", "du lịch", "chuyến bay", "khách sạn"],
    ),
    (
        "food",
        &["eat", "lunch", "dinner", "recipe", "restaurant", "ăn", "món", "nhà hàng", "nấu"],
    ),
    (
        "education",
        &["learn", "study", "course", "school", "exam", "học", "khóa học", "trường", "thi"],
    ),
    (
        "work",
        &["job", "meeting", "project", "deadline", "client", "công việc", "cuộc họp", "dự án"],
    ),
    (
        "family",
        &["family", "mother", "father", "kids", "wife", "husband", "gia đình", "mẹ", "bố", "con"],
    ),
    (
        "weather",
        &["weather", "rain", "sunny", "temperature", "forecast", "thời tiết", "mưa", "nắng", "nhiệt độ"],
    ),
    (
        "entertainment",
        &["movie", "music", "game", "show", "concert", "phim", "nhạc", "trò chơi"],
    ),
];

/// Time phrases and the rough number of hours they point back.
const TEMPORAL_PHRASES: &[(&str, f64)] = &[
    ("yesterday", 24.0),
    ("last week", 168.0),
    ("last month", 720.0),
    ("this morning", 6.0),
    ("earlier today", 3.0),
    ("hôm qua", 24.0),
    ("tuần trước", 168.0),
    ("tháng trước", 720.0),
    ("sáng nay", 6.0),
    ("hôm nay", 1.0),
];

const INTERROGATIVES: &[&str] = &[
    "what", "why", "how", "when", "where", "who", "which", "is", "are", "do", "does", "did",
    "can", "could", "should", "will",
];

const REQUEST_VERBS: &[&str] = &[
    "please", "help", "show", "tell", "explain", "create", "write", "make", "find", "give",
    "translate", "summarize", "hãy", "giúp", "tạo", "viết", "tìm", "cho",
];

const CLARIFICATION_PHRASES: &[&str] = &[
    "what do you mean",
    "i mean",
    "to clarify",
    "in other words",
    "you said",
    "ý bạn là",
    "nghĩa là sao",
    "ý tôi là",
];

const CONTINUATION_STARTERS: &[&str] = &[
    "and", "also", "then", "but", "ok", "okay", "so", "next", "và", "rồi", "tiếp", "vậy",
];

const VI_QUESTION_MARKERS: &[&str] = &[
    "tại sao", "làm sao", "là gì", "khi nào", "ở đâu", "bao nhiêu", "thế nào", "không?",
];

/// Extract the deterministic entity set: capitalized bigrams, dates, clock
/// times, currency tokens, all-caps acronyms. Sorted, deduplicated.
pub fn extract_entities(text: &str) -> Vec<String> {
    let mut out = BTreeSet::new();
    for re in [&*CAPITALIZED_BIGRAM, &*DATE, &*CLOCK_TIME, &*CURRENCY, &*ACRONYM] {
        for m in re.find_iter(text) {
            out.insert(m.as_str().trim().to_string());
        }
    }
    out.into_iter().collect()
}

/// Match the closed taxonomy against the text. Sorted, deduplicated.
pub fn extract_topics(text: &str) -> Vec<String> {
    let lower = text.to_lowercase();
    let tokens: BTreeSet<&str> = lower
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .collect();

    let mut out = BTreeSet::new();
    for (topic, keywords) in TOPIC_TAXONOMY {
        let hit = keywords.iter().any(|kw| {
            if kw.contains(' ') {
                lower.contains(kw)
            } else {
                tokens.contains(kw)
            }
        });
        if hit {
            out.insert(topic.to_string());
        }
    }
    out.into_iter().collect()
}

/// Lexical intent rules. Checked from most to least specific:
/// clarification phrases, question markers, request verbs, continuation
/// starters; anything else is a new topic.
pub fn detect_intent(text: &str) -> QueryIntent {
    let lower = text.trim().to_lowercase();
    if lower.is_empty() {
        return QueryIntent::Continuation;
    }

    if CLARIFICATION_PHRASES.iter().any(|p| lower.contains(p)) {
        return QueryIntent::Clarification;
    }

    let first_word = lower.split_whitespace().next().unwrap_or("");
    let is_question = lower.contains('?')
        || INTERROGATIVES.contains(&first_word)
        || VI_QUESTION_MARKERS.iter().any(|p| lower.contains(p));
    if is_question {
        return QueryIntent::Question;
    }

    if REQUEST_VERBS.contains(&first_word) {
        return QueryIntent::Request;
    }

    let word_count = lower.split_whitespace().count();
    if CONTINUATION_STARTERS.contains(&first_word) || word_count <= 3 {
        return QueryIntent::Continuation;
    }

    QueryIntent::NewTopic
}

/// Find the first recognized time phrase in the query.
pub fn extract_temporal(text: &str) -> Option<TemporalContext> {
    let lower = text.to_lowercase();
    TEMPORAL_PHRASES
        .iter()
        .find(|(phrase, _)| lower.contains(phrase))
        .map(|(phrase, hours)| TemporalContext {
            phrase: phrase.to_string(),
            approx_hours_back: *hours,
        })
}

/// Jaccard overlap of two entity sets. Zero when either side is empty.
pub fn entity_overlap(a: &[String], b: &[String]) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let sa: BTreeSet<&String> = a.iter().collect();
    let sb: BTreeSet<&String> = b.iter().collect();
    let intersection = sa.intersection(&sb).count() as f64;
    let union = sa.union(&sb).count() as f64;
    intersection / union
}

/// Topic overlap: |a ∩ b| / max(|a|, |b|). Zero when either side is empty.
pub fn topic_similarity(a: &[String], b: &[String]) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let sa: BTreeSet<&String> = a.iter().collect();
    let sb: BTreeSet<&String> = b.iter().collect();
    let intersection = sa.intersection(&sb).count() as f64;
    intersection / sa.len().max(sb.len()) as f64
}

/// SHA-256 hex of the whitespace-collapsed, lowercased content.
pub fn fingerprint(text: &str) -> String {
    let normalized = text.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase();
    hex::encode(Sha256::digest(normalized.as_bytes()))
}

/// A historical message that matched the current query semantically.
#[derive(Debug, Clone)]
pub struct SimilarMessage {
    pub message_id: MessageId,
    pub content: String,
    pub similarity: f32,
    pub role: Option<String>,
    pub tokens: u32,
    /// Epoch milliseconds of the original message.
    pub created_at: i64,
    pub metadata: MessageMetadata,
}

pub struct HistoryVectorizer {
    store: Arc<VectorStore>,
    metadata: Arc<MetadataStore>,
}

impl HistoryVectorizer {
    pub fn new(store: Arc<VectorStore>, metadata: Arc<MetadataStore>) -> Self {
        Self { store, metadata }
    }

    pub fn metadata_store(&self) -> &Arc<MetadataStore> {
        &self.metadata
    }

    /// Enrich and index one message: extract entities and topics, upsert the
    /// embedding, and write the metadata entry. Preserves the mutable
    /// counters when the message was already indexed.
    pub async fn vectorize_message(&self, msg: &Message) -> Result<String> {
        let text = msg.content.as_text();
        let entities = extract_entities(&text);
        let topics = extract_topics(&text);

        let existing = self.metadata.get(&msg.chat_id, msg.id);
        let meta = MessageMetadata {
            entities: entities.clone(),
            topics: topics.clone(),
            fingerprint: fingerprint(&text),
            times_referenced: existing.as_ref().map(|m| m.times_referenced).unwrap_or(0),
            user_marked: existing.as_ref().map(|m| m.user_marked).unwrap_or(false),
            importance: msg.importance,
        };

        let vector_meta = VectorMetadata {
            ref_id: msg.id.0.to_string(),
            chat_id: msg.chat_id.0.clone(),
            kind: EmbeddingKind::Message,
            created_at: msg.timestamp,
            role: Some(msg.role.as_str().to_string()),
            tokens: Some(msg.tokens),
            entities,
            topics,
        };

        let vector_id = self
            .store
            .add_embedding(&text, EmbeddingKind::Message, vector_meta)
            .await?;

        self.metadata.upsert(&msg.chat_id, msg.id, meta);
        debug!(chat = %msg.chat_id, id = %msg.id, vector = %vector_id, "message vectorized");
        Ok(vector_id)
    }

    /// Analyze the current query: embedding, entities, topics, intent and
    /// temporal context.
    pub async fn analyze_query(&self, text: &str) -> QueryAnalysis {
        QueryAnalysis {
            text: text.to_string(),
            embedding: self.store.embed(text).await,
            entities: extract_entities(text),
            topics: extract_topics(text),
            intent: detect_intent(text),
            temporal: extract_temporal(text),
        }
    }

    /// Semantically similar messages from this chat, metadata reloaded,
    /// best-first, at most `limit`.
    pub async fn find_similar_messages(
        &self,
        chat_id: &ChatId,
        analysis: &QueryAnalysis,
        limit: usize,
    ) -> Result<Vec<SimilarMessage>> {
        // Over-fetch: the index is shared across chats, so the top-k for
        // this chat may sit below other chats' hits.
        let fetch = (limit.max(16)) * 4;
        let hits = self
            .store
            .search_by_vector(&analysis.embedding, fetch, 0.0)
            .await?;

        let mut out = Vec::new();
        for hit in hits {
            if hit.metadata.chat_id != chat_id.0 {
                continue;
            }
            if hit.metadata.kind != EmbeddingKind::Message {
                continue;
            }
            let Ok(raw_id) = hit.metadata.ref_id.parse::<u64>() else {
                continue;
            };
            let message_id = MessageId(raw_id);
            let meta = self
                .metadata
                .get(chat_id, message_id)
                .unwrap_or_default();
            out.push(SimilarMessage {
                message_id,
                content: hit.content,
                similarity: hit.similarity,
                role: hit.metadata.role,
                tokens: hit.metadata.tokens.unwrap_or(0),
                created_at: hit.metadata.created_at,
                metadata: meta,
            });
            if out.len() >= limit {
                break;
            }
        }
        Ok(out)
    }
}
