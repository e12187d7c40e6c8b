use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use prism_core::config::ProviderKind;
use prism_core::{ContentBlock, MessageContent, Role};

use crate::error::{classify_response, ProviderError, Result};
use crate::provider::ChatProvider;
use crate::stream::StreamEvent;
use crate::types::{
    ChatMessage, ChatRequest, ChatResponse, ProviderDefaults, StopReason, ToolCall, Usage,
};

const API_VERSION: &str = "2023-06-01";
const SUPPORTED_MODELS: &[&str] = &[
    "claude-sonnet-4-6",
    "claude-opus-4-1",
    "claude-haiku-4-5-20251001",
];
const DEFAULT_MODEL: &str = "claude-sonnet-4-6";
const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Adapter for the block-based `/v1/messages` API.
pub struct AnthropicProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl AnthropicProvider {
    pub fn new(api_key: String, base_url: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            base_url: base_url.unwrap_or_else(|| "https://api.anthropic.com".to_string()),
        }
    }

    async fn post(&self, body: &serde_json::Value) -> Result<reqwest::Response> {
        let url = format!("{}/v1/messages", self.base_url);
        let resp = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .header("content-type", "application/json")
            .json(body)
            .send()
            .await?;

        if resp.status().is_success() {
            return Ok(resp);
        }

        let status = resp.status().as_u16();
        let retry_after = resp
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());
        let text = resp.text().await.unwrap_or_default();
        warn!(status, body = %text, "Anthropic API error");
        Err(classify_response(status, retry_after, &text))
    }
}

#[async_trait]
impl ChatProvider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Anthropic
    }

    fn is_configured(&self) -> bool {
        !self.api_key.is_empty()
    }

    fn supported_models(&self) -> &[&str] {
        SUPPORTED_MODELS
    }

    fn default_config(&self) -> ProviderDefaults {
        ProviderDefaults {
            model: DEFAULT_MODEL.to_string(),
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }

    async fn generate(&self, req: &ChatRequest) -> Result<ChatResponse> {
        let body = build_request_body(req, false);
        debug!(model = %req.model, "sending request to Anthropic");

        let resp = self.post(&body).await?;
        let raw: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| ProviderError::Parse(e.to_string()))?;
        let api_resp: ApiResponse = serde_json::from_value(raw.clone())
            .map_err(|e| ProviderError::Parse(e.to_string()))?;

        Ok(parse_response(api_resp, raw))
    }

    async fn stream(
        &self,
        req: &ChatRequest,
        tx: mpsc::Sender<StreamEvent>,
        cancel: CancellationToken,
    ) -> Result<()> {
        let body = build_request_body(req, true);
        debug!(model = %req.model, "sending streaming request to Anthropic");

        let resp = self.post(&body).await?;
        crate::anthropic_stream::process_stream(resp, tx, cancel).await
    }
}

/// Map the neutral request onto the Anthropic wire shape.
///
/// Tool-role turns become user messages carrying `tool_result` blocks;
/// assistant tool requests become native `tool_use` blocks, ids preserved.
pub(crate) fn build_request_body(req: &ChatRequest, stream: bool) -> serde_json::Value {
    let messages: Vec<serde_json::Value> = req.messages.iter().map(convert_message).collect();

    let mut body = serde_json::json!({
        "model": req.model,
        "max_tokens": req.max_tokens,
        "messages": messages,
        "stream": stream,
    });

    if let Some(ref system) = req.system {
        body["system"] = serde_json::json!(system);
    }
    if let Some(temp) = req.temperature {
        body["temperature"] = serde_json::json!(temp);
    }
    if !req.tools.is_empty() {
        let tools: Vec<serde_json::Value> = req
            .tools
            .iter()
            .map(|t| {
                serde_json::json!({
                    "name": t.name,
                    "description": t.description,
                    "input_schema": t.input_schema,
                })
            })
            .collect();
        body["tools"] = serde_json::Value::Array(tools);
    }

    body
}

fn convert_message(msg: &ChatMessage) -> serde_json::Value {
    // Tool results ride on a user turn in the block API.
    let role = match msg.role {
        Role::Assistant => "assistant",
        Role::User | Role::System | Role::Tool => "user",
    };

    let content = match &msg.content {
        MessageContent::Text(text) => serde_json::json!(text),
        MessageContent::Blocks(blocks) => {
            let converted: Vec<serde_json::Value> = blocks
                .iter()
                .map(|b| match b {
                    ContentBlock::Text { text } => serde_json::json!({
                        "type": "text",
                        "text": text,
                    }),
                    ContentBlock::ToolUse { id, name, input } => serde_json::json!({
                        "type": "tool_use",
                        "id": id,
                        "name": name,
                        "input": input,
                    }),
                    ContentBlock::ToolResult {
                        tool_use_id,
                        content,
                        is_error,
                    } => serde_json::json!({
                        "type": "tool_result",
                        "tool_use_id": tool_use_id,
                        "content": content,
                        "is_error": is_error,
                    }),
                })
                .collect();
            serde_json::Value::Array(converted)
        }
    };

    serde_json::json!({ "role": role, "content": content })
}

pub(crate) fn normalize_stop_reason(raw: &str) -> StopReason {
    match raw {
        "end_turn" | "stop_sequence" => StopReason::EndTurn,
        "tool_use" => StopReason::ToolUse,
        "max_tokens" => StopReason::MaxTokens,
        "refusal" => StopReason::ContentFilter,
        "" => StopReason::EndTurn,
        other => StopReason::Other(other.to_string()),
    }
}

fn parse_response(resp: ApiResponse, raw: serde_json::Value) -> ChatResponse {
    let mut text_parts: Vec<String> = Vec::new();
    let mut tool_calls: Vec<ToolCall> = Vec::new();

    for block in resp.content {
        match block {
            ApiContentBlock::Text { text } => text_parts.push(text),
            ApiContentBlock::ToolUse { id, name, input } => {
                tool_calls.push(ToolCall { id, name, input });
            }
            ApiContentBlock::Unknown => {}
        }
    }

    ChatResponse {
        text: text_parts.join(""),
        tool_calls,
        stop_reason: normalize_stop_reason(resp.stop_reason.as_deref().unwrap_or("")),
        model: resp.model,
        usage: Usage {
            tokens_in: resp.usage.input_tokens,
            tokens_out: resp.usage.output_tokens,
        },
        raw,
    }
}

// Anthropic API response types (private, deserialization only)

#[derive(Deserialize)]
struct ApiResponse {
    model: String,
    content: Vec<ApiContentBlock>,
    stop_reason: Option<String>,
    usage: ApiUsage,
}

#[derive(Deserialize)]
#[serde(tag = "type")]
enum ApiContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "tool_use")]
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Deserialize)]
struct ApiUsage {
    input_tokens: u32,
    output_tokens: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ToolResultEntry;

    fn request_with_tool_round_trip() -> ChatRequest {
        let provider = AnthropicProvider::new("key".into(), None);
        let history = vec![
            ChatMessage::text(Role::User, "what's the weather in Hanoi?"),
            ChatMessage {
                role: Role::Assistant,
                content: MessageContent::Blocks(vec![ContentBlock::ToolUse {
                    id: "toolu_01".into(),
                    name: "get_weather".into(),
                    input: serde_json::json!({"city": "Hanoi"}),
                }]),
            },
        ];
        let history = provider.add_tool_results(
            history,
            &[ToolResultEntry {
                tool_use_id: "toolu_01".into(),
                content: "28C, clear".into(),
                is_error: false,
            }],
        );
        ChatRequest::new("claude-sonnet-4-6", history)
    }

    #[test]
    fn tool_results_become_user_tool_result_blocks() {
        let req = request_with_tool_round_trip();
        let body = build_request_body(&req, false);
        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 3);

        // Assistant turn keeps the native tool_use block and its id.
        assert_eq!(messages[1]["role"], "assistant");
        assert_eq!(messages[1]["content"][0]["type"], "tool_use");
        assert_eq!(messages[1]["content"][0]["id"], "toolu_01");

        // Tool turn rides on a user message with a matching tool_result.
        assert_eq!(messages[2]["role"], "user");
        assert_eq!(messages[2]["content"][0]["type"], "tool_result");
        assert_eq!(messages[2]["content"][0]["tool_use_id"], "toolu_01");
    }

    #[test]
    fn system_and_tools_are_top_level() {
        let mut req = ChatRequest::new(
            "claude-sonnet-4-6",
            vec![ChatMessage::text(Role::User, "hi")],
        );
        req.system = Some("be brief".into());
        req.tools.push(crate::types::ToolDefinition {
            name: "get_weather".into(),
            description: "weather lookup".into(),
            input_schema: serde_json::json!({"type": "object"}),
        });
        req.temperature = Some(0.2);

        let body = build_request_body(&req, true);
        assert_eq!(body["system"], "be brief");
        assert_eq!(body["stream"], true);
        assert_eq!(body["temperature"], 0.2);
        assert_eq!(body["tools"][0]["name"], "get_weather");
    }

    #[test]
    fn stop_reasons_normalize() {
        assert_eq!(normalize_stop_reason("end_turn"), StopReason::EndTurn);
        assert_eq!(normalize_stop_reason("tool_use"), StopReason::ToolUse);
        assert_eq!(normalize_stop_reason("max_tokens"), StopReason::MaxTokens);
        assert_eq!(normalize_stop_reason("refusal"), StopReason::ContentFilter);
        assert_eq!(
            normalize_stop_reason("weird"),
            StopReason::Other("weird".into())
        );
    }
}
