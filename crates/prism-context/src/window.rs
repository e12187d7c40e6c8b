use serde::{Deserialize, Serialize};

use prism_core::{estimate_tokens, Message, MessageId};
use prism_memory::ScoredMessage;

/// One folded segment of older history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Summary {
    pub id: u64,
    pub text: String,
    /// Inclusive id range of the messages this summary covers.
    pub message_range: (MessageId, MessageId),
    /// Epoch-millisecond range of the covered messages.
    pub time_range: (i64, i64),
    pub tokens: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FactKind {
    Decision,
    Preference,
    Fact,
    Goal,
}

impl FactKind {
    pub fn label(&self) -> &'static str {
        match self {
            FactKind::Decision => "Decision",
            FactKind::Preference => "Preference",
            FactKind::Fact => "Fact",
            FactKind::Goal => "Goal",
        }
    }
}

/// A durable statement extracted from the conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyFact {
    pub text: String,
    pub kind: FactKind,
    pub confidence: f64,
    pub source_message: Option<MessageId>,
    pub created_at: i64,
    pub tokens: u32,
}

impl KeyFact {
    pub fn new(text: String, kind: FactKind, source_message: Option<MessageId>) -> Self {
        let tokens = estimate_tokens(&text);
        Self {
            text,
            kind,
            confidence: 0.8,
            source_message,
            created_at: chrono::Utc::now().timestamp_millis(),
            tokens,
        }
    }

    /// Display form used in the window preamble, e.g. `[Decision] ship v2 Friday`.
    pub fn formatted(&self) -> String {
        format!("[{}] {}", self.kind.label(), self.text)
    }
}

/// Statistics of one assembled window.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WindowStats {
    pub total_tokens: u32,
    /// Included tokens over full-history tokens; 1.0 for an empty history.
    pub compression_ratio: f64,
    /// Share of included tokens contributed by Bayesian-selected history.
    pub bayesian_ratio: f64,
}

/// The optimized context for one turn. Ephemeral, never persisted.
///
/// Reading order for the provider: key facts and summaries form the system
/// preamble, then selected history (oldest first), then the recent messages
/// verbatim in chronological order.
#[derive(Debug, Clone)]
pub struct ContextWindow {
    pub recent: Vec<Message>,
    pub selected_history: Vec<ScoredMessage>,
    pub summaries: Vec<Summary>,
    pub key_facts: Vec<KeyFact>,
    pub stats: WindowStats,
    pub explanation: String,
}
