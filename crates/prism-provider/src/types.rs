use serde::{Deserialize, Serialize};

use prism_core::{MessageContent, Role};

/// A neutral conversation turn sent to a provider: a role plus plain text
/// or an ordered list of typed blocks. Each adapter maps this onto its
/// native wire shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: MessageContent,
}

impl ChatMessage {
    pub fn text(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            content: MessageContent::Text(text.into()),
        }
    }
}

/// Tool definition exposed to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON-schema-shaped input spec.
    pub input_schema: serde_json::Value,
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub input: serde_json::Value,
}

/// A finished tool execution, ready to be appended to the history.
#[derive(Debug, Clone)]
pub struct ToolResultEntry {
    pub tool_use_id: String,
    pub content: String,
    pub is_error: bool,
}

/// Request to any provider.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub model: String,
    pub system: Option<String>,
    pub messages: Vec<ChatMessage>,
    pub tools: Vec<ToolDefinition>,
    pub max_tokens: u32,
    pub temperature: Option<f64>,
}

impl ChatRequest {
    pub fn new(model: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        Self {
            model: model.into(),
            system: None,
            messages,
            tools: Vec::new(),
            max_tokens: 4096,
            temperature: None,
        }
    }
}

/// Provider-normalized terminal signal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StopReason {
    /// Natural completion.
    EndTurn,
    /// The model is waiting for tool results.
    ToolUse,
    MaxTokens,
    ContentFilter,
    Other(String),
}

impl StopReason {
    pub fn as_str(&self) -> &str {
        match self {
            StopReason::EndTurn => "end-turn",
            StopReason::ToolUse => "tool-use",
            StopReason::MaxTokens => "max-tokens",
            StopReason::ContentFilter => "content-filter",
            StopReason::Other(s) => s,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Usage {
    pub tokens_in: u32,
    pub tokens_out: u32,
}

/// Response from a completed (non-streaming) generation.
#[derive(Debug, Clone)]
pub struct ChatResponse {
    pub text: String,
    pub tool_calls: Vec<ToolCall>,
    pub stop_reason: StopReason,
    pub model: String,
    pub usage: Usage,
    /// The provider's raw response body, for diagnostics.
    pub raw: serde_json::Value,
}

/// Static defaults reported by a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderDefaults {
    pub model: String,
    pub max_tokens: u32,
}
