use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Identifies a conversation. Opaque string, assigned at creation (UUIDv7,
/// time-sortable so chat ids correlate with creation order in logs).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChatId(pub String);

impl ChatId {
    pub fn new() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Default for ChatId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&str> for ChatId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ChatId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Public identifier of a published conversation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ShareId(pub String);

impl ShareId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ShareId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Default for ShareId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&str> for ShareId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Owner of a conversation or a share.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OwnerId(pub String);

impl OwnerId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for OwnerId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Persona bound to a conversation (exactly one at a time).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PersonaId(pub String);

impl PersonaId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PersonaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for PersonaId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Numeric message identifier, unique and strictly increasing within a chat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MessageId(pub u64);

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
            Role::Tool => "tool",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One typed block inside a structured message body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    /// The model wants to invoke a tool. The id must be answered by a
    /// matching `ToolResult` later in the same chat.
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(default)]
        is_error: bool,
    },
}

/// Message body: plain text or an ordered sequence of typed blocks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

impl MessageContent {
    /// Flatten to plain text. Tool blocks contribute their textual payload.
    pub fn as_text(&self) -> String {
        match self {
            MessageContent::Text(s) => s.clone(),
            MessageContent::Blocks(blocks) => blocks
                .iter()
                .filter_map(|b| match b {
                    ContentBlock::Text { text } => Some(text.clone()),
                    ContentBlock::ToolResult { content, .. } => Some(content.clone()),
                    ContentBlock::ToolUse { .. } => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            MessageContent::Text(s) => s.is_empty(),
            MessageContent::Blocks(b) => b.is_empty(),
        }
    }
}

impl From<&str> for MessageContent {
    fn from(s: &str) -> Self {
        MessageContent::Text(s.to_string())
    }
}

impl From<String> for MessageContent {
    fn from(s: String) -> Self {
        MessageContent::Text(s)
    }
}

/// A single message in a conversation.
///
/// Immutable after creation except for `importance`, which the context
/// engine adjusts when the user marks or unmarks the message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub chat_id: ChatId,
    pub id: MessageId,
    pub role: Role,
    pub content: MessageContent,
    /// Epoch milliseconds; non-decreasing within a chat.
    pub timestamp: i64,
    /// Estimated token count of `content`.
    pub tokens: u32,
    /// Importance in [0, 1].
    pub importance: f64,
    /// Model that produced this message, for assistant turns.
    pub model_version: Option<String>,
}

impl Message {
    pub fn new(chat_id: ChatId, id: MessageId, role: Role, content: MessageContent) -> Self {
        let tokens = estimate_tokens(&content.as_text());
        Self {
            chat_id,
            id,
            role,
            content,
            timestamp: chrono::Utc::now().timestamp_millis(),
            tokens,
            importance: 0.5,
            model_version: None,
        }
    }
}

/// Shared token estimator: roughly four characters per token.
///
/// Every component budgets with this one estimate so the context-window
/// invariant (`sum(tokens) <= max_context_tokens`) holds end to end.
pub fn estimate_tokens(text: &str) -> u32 {
    let chars = text.chars().count() as u32;
    chars.div_ceil(4)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_estimate_rounds_up() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
    }

    #[test]
    fn content_as_text_flattens_blocks() {
        let content = MessageContent::Blocks(vec![
            ContentBlock::Text {
                text: "checking the weather".into(),
            },
            ContentBlock::ToolUse {
                id: "toolu_1".into(),
                name: "get_weather".into(),
                input: serde_json::json!({"city": "Hanoi"}),
            },
            ContentBlock::ToolResult {
                tool_use_id: "toolu_1".into(),
                content: "28C, clear".into(),
                is_error: false,
            },
        ]);
        assert_eq!(content.as_text(), "checking the weather\n28C, clear");
    }

    #[test]
    fn chat_ids_are_distinct() {
        assert_ne!(ChatId::new(), ChatId::new());
    }
}
