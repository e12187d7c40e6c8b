use serde::{Deserialize, Serialize};

use prism_core::{ChatId, MessageId};

/// Per-message structured fields maintained alongside the raw message.
///
/// Written by the vectorizer on ingestion; `times_referenced` is bumped by
/// the Bayesian manager when a message is selected with high posterior, and
/// `user_marked`/`importance` follow the user's explicit marks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageMetadata {
    pub entities: Vec<String>,
    pub topics: Vec<String>,
    /// SHA-256 hex of the normalized content; stable identity for dedup.
    pub fingerprint: String,
    pub times_referenced: u32,
    pub user_marked: bool,
    pub importance: f64,
}

impl Default for MessageMetadata {
    fn default() -> Self {
        Self {
            entities: Vec::new(),
            topics: Vec::new(),
            fingerprint: String::new(),
            times_referenced: 0,
            user_marked: false,
            importance: 0.5,
        }
    }
}

/// Coarse intent of the current query, decided by lexical rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QueryIntent {
    Question,
    Request,
    Clarification,
    Continuation,
    NewTopic,
}

/// A recognized time phrase in the query, e.g. "yesterday" or "tuần trước".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemporalContext {
    pub phrase: String,
    /// Rough distance into the past the phrase points at.
    pub approx_hours_back: f64,
}

/// Output of query analysis: everything the Bayesian scoring needs.
#[derive(Debug, Clone)]
pub struct QueryAnalysis {
    pub text: String,
    pub embedding: Vec<f32>,
    pub entities: Vec<String>,
    pub topics: Vec<String>,
    pub intent: QueryIntent,
    pub temporal: Option<TemporalContext>,
}

/// The six evidence components, each in [0, 1].
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct EvidenceBreakdown {
    pub semantic: f64,
    pub temporal: f64,
    pub entity: f64,
    pub topic: f64,
    pub interaction: f64,
    pub continuity: f64,
}

impl EvidenceBreakdown {
    pub fn mean(&self) -> f64 {
        (self.semantic + self.temporal + self.entity + self.topic + self.interaction
            + self.continuity)
            / 6.0
    }
}

/// The five prior components, each in [0, 1].
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PriorBreakdown {
    pub importance: f64,
    pub message_type: f64,
    pub length: f64,
    pub position: f64,
    pub user_marked: f64,
}

/// One selected historical message, annotated with its relevance.
#[derive(Debug, Clone)]
pub struct ScoredMessage {
    pub chat_id: ChatId,
    pub message_id: MessageId,
    pub content: String,
    pub role: Option<String>,
    pub tokens: u32,
    /// Posterior relevance probability in [0, 1].
    pub probability: f64,
    /// Confidence in [0, 1].
    pub confidence: f64,
    /// 1-based rank after sorting by descending probability.
    pub rank: usize,
    pub evidence: EvidenceBreakdown,
    pub prior: PriorBreakdown,
}

/// Summary statistics over one selection pass.
#[derive(Debug, Clone, Default)]
pub struct SelectionStats {
    pub candidates: usize,
    pub selected: usize,
    pub average_probability: f64,
}

/// Result of a Bayesian relevance pass for (chat, query).
#[derive(Debug, Clone)]
pub struct MemoryAnalysis {
    pub selected: Vec<ScoredMessage>,
    pub stats: SelectionStats,
    /// Human-readable note, rendered in the chat's language.
    pub context_note: String,
}

impl MemoryAnalysis {
    /// The degenerate result used when no history is available.
    pub fn empty(note: String) -> Self {
        Self {
            selected: Vec::new(),
            stats: SelectionStats::default(),
            context_note: note,
        }
    }
}
