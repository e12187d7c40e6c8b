use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use prism_core::config::ProviderKind;
use prism_core::{ContentBlock, ErrorKind, MessageContent, Role};

use crate::error::{classify_response, ProviderError, Result};
use crate::provider::ChatProvider;
use crate::stream::{parse_sse_line, SseParsed, StreamEvent};
use crate::types::{
    ChatMessage, ChatRequest, ChatResponse, ProviderDefaults, StopReason, ToolCall, Usage,
};

const SUPPORTED_MODELS: &[&str] = &["gpt-4o", "gpt-4o-mini", "gpt-4.1"];
const DEFAULT_MODEL: &str = "gpt-4o";
const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Adapter for the chat-completions API.
pub struct OpenAiProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl OpenAiProvider {
    pub fn new(api_key: String, base_url: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            base_url: base_url.unwrap_or_else(|| "https://api.openai.com".to_string()),
        }
    }

    async fn post(&self, body: &serde_json::Value) -> Result<reqwest::Response> {
        let url = format!("{}/v1/chat/completions", self.base_url);
        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
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
        warn!(status, body = %text, "OpenAI API error");
        Err(classify_response(status, retry_after, &text))
    }
}

#[async_trait]
impl ChatProvider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::OpenAi
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
        debug!(model = %req.model, "sending request to OpenAI");

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
        debug!(model = %req.model, "sending streaming request to OpenAI");

        let resp = self.post(&body).await?;
        process_stream(resp, req.model.clone(), tx, cancel).await
    }
}

/// Map the neutral request onto the chat-completions wire shape.
///
/// The system prompt becomes the leading `system` message; tool-role turns
/// become one `tool` message per result with `tool_call_id`; assistant tool
/// requests become `tool_calls` entries with JSON-string arguments.
pub(crate) fn build_request_body(req: &ChatRequest, stream: bool) -> serde_json::Value {
    let mut messages: Vec<serde_json::Value> = Vec::new();
    if let Some(ref system) = req.system {
        messages.push(serde_json::json!({ "role": "system", "content": system }));
    }
    for msg in &req.messages {
        messages.extend(convert_message(msg));
    }

    let mut body = serde_json::json!({
        "model": req.model,
        "messages": messages,
        "max_tokens": req.max_tokens,
        "stream": stream,
    });

    if let Some(temp) = req.temperature {
        body["temperature"] = serde_json::json!(temp);
    }
    if !req.tools.is_empty() {
        let tools: Vec<serde_json::Value> = req
            .tools
            .iter()
            .map(|t| {
                serde_json::json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.input_schema,
                    }
                })
            })
            .collect();
        body["tools"] = serde_json::json!(tools);
    }

    body
}

/// One neutral turn can expand to several wire messages (a tool turn with
/// three result blocks becomes three `tool` messages).
fn convert_message(msg: &ChatMessage) -> Vec<serde_json::Value> {
    let content = match &msg.content {
        MessageContent::Text(text) => {
            let role = match msg.role {
                Role::User => "user",
                Role::Assistant => "assistant",
                Role::System => "system",
                Role::Tool => "user",
            };
            return vec![serde_json::json!({ "role": role, "content": text })];
        }
        MessageContent::Blocks(blocks) => blocks,
    };

    if msg.role == Role::Tool {
        return content
            .iter()
            .filter_map(|b| match b {
                ContentBlock::ToolResult {
                    tool_use_id,
                    content,
                    ..
                } => Some(serde_json::json!({
                    "role": "tool",
                    "tool_call_id": tool_use_id,
                    "content": content,
                })),
                _ => None,
            })
            .collect();
    }

    if msg.role == Role::Assistant {
        let mut text_parts: Vec<&str> = Vec::new();
        let mut tool_calls: Vec<serde_json::Value> = Vec::new();
        for block in content {
            match block {
                ContentBlock::Text { text } => text_parts.push(text),
                ContentBlock::ToolUse { id, name, input } => {
                    tool_calls.push(serde_json::json!({
                        "id": id,
                        "type": "function",
                        "function": {
                            "name": name,
                            "arguments": input.to_string(),
                        }
                    }));
                }
                ContentBlock::ToolResult { .. } => {}
            }
        }
        let content_value = if text_parts.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::json!(text_parts.join("\n"))
        };
        let mut out = serde_json::json!({ "role": "assistant", "content": content_value });
        if !tool_calls.is_empty() {
            out["tool_calls"] = serde_json::json!(tool_calls);
        }
        return vec![out];
    }

    // User/system blocks flatten to text.
    let text: String = content
        .iter()
        .filter_map(|b| match b {
            ContentBlock::Text { text } => Some(text.as_str()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("\n");
    vec![serde_json::json!({ "role": "user", "content": text })]
}

pub(crate) fn normalize_finish_reason(raw: &str) -> StopReason {
    match raw {
        "stop" => StopReason::EndTurn,
        "tool_calls" | "function_call" => StopReason::ToolUse,
        "length" => StopReason::MaxTokens,
        "content_filter" => StopReason::ContentFilter,
        "" => StopReason::EndTurn,
        other => StopReason::Other(other.to_string()),
    }
}

fn parse_response(resp: ApiResponse, raw: serde_json::Value) -> ChatResponse {
    let choice = resp.choices.into_iter().next();
    let text = choice
        .as_ref()
        .and_then(|c| c.message.content.clone())
        .unwrap_or_default();

    let tool_calls: Vec<ToolCall> = choice
        .as_ref()
        .and_then(|c| c.message.tool_calls.as_ref())
        .map(|calls| {
            calls
                .iter()
                .map(|tc| ToolCall {
                    id: tc.id.clone(),
                    name: tc.function.name.clone(),
                    input: serde_json::from_str(&tc.function.arguments).unwrap_or_default(),
                })
                .collect()
        })
        .unwrap_or_default();

    let finish = choice.and_then(|c| c.finish_reason).unwrap_or_default();

    ChatResponse {
        text,
        tool_calls,
        stop_reason: normalize_finish_reason(&finish),
        model: resp.model,
        usage: Usage {
            tokens_in: resp.usage.as_ref().map(|u| u.prompt_tokens).unwrap_or(0),
            tokens_out: resp
                .usage
                .as_ref()
                .map(|u| u.completion_tokens)
                .unwrap_or(0),
        },
        raw,
    }
}

/// Accumulates streamed `tool_calls` deltas until the stream closes them.
#[derive(Default, Clone)]
struct PendingToolCall {
    id: String,
    name: String,
    arguments: String,
}

/// Parse the chat-completions SSE stream. Tool calls arrive as fragment
/// deltas keyed by index; they are emitted as ToolStart/ToolStop pairs once
/// the stream signals the turn is over (finish reason or `[DONE]`).
async fn process_stream(
    resp: reqwest::Response,
    model: String,
    tx: mpsc::Sender<StreamEvent>,
    cancel: CancellationToken,
) -> Result<()> {
    use futures_util::StreamExt;

    let mut usage = Usage::default();
    let mut finish_reason = String::new();
    let mut pending_tools: Vec<PendingToolCall> = Vec::new();
    let mut line_buf = String::new();
    let mut byte_stream = resp.bytes_stream();

    'outer: loop {
        let chunk = tokio::select! {
            c = byte_stream.next() => c,
            _ = cancel.cancelled() => {
                debug!("openai stream cancelled");
                return Err(ProviderError::Cancelled);
            }
        };

        let chunk = match chunk {
            Some(Ok(c)) => c,
            Some(Err(e)) => {
                let _ = tx
                    .send(StreamEvent::Error {
                        kind: ErrorKind::Transient,
                        message: e.to_string(),
                        retry_after_secs: None,
                    })
                    .await;
                return Ok(());
            }
            None => break,
        };

        let text = match std::str::from_utf8(&chunk) {
            Ok(t) => t,
            Err(_) => continue,
        };

        line_buf.push_str(text);
        let lines: Vec<&str> = line_buf.split('\n').collect();
        let (complete, remainder) = lines.split_at(lines.len() - 1);
        let remainder = remainder.first().unwrap_or(&"").to_string();

        for line in complete {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if let Some(SseParsed::Data(data)) = parse_sse_line(line) {
                if data.trim() == "[DONE]" {
                    break 'outer;
                }
                let Ok(chunk_resp) = serde_json::from_str::<StreamChunk>(&data) else {
                    continue;
                };
                if let Some(u) = &chunk_resp.usage {
                    usage.tokens_in = u.prompt_tokens;
                    usage.tokens_out = u.completion_tokens;
                }
                for choice in &chunk_resp.choices {
                    if let Some(reason) = &choice.finish_reason {
                        if !reason.is_empty() {
                            finish_reason = reason.clone();
                        }
                    }
                    if let Some(content) = &choice.delta.content {
                        if !content.is_empty()
                            && tx
                                .send(StreamEvent::ContentChunk {
                                    text: content.clone(),
                                })
                                .await
                                .is_err()
                        {
                            return Ok(());
                        }
                    }
                    if let Some(calls) = &choice.delta.tool_calls {
                        for delta in calls {
                            let index = delta.index;
                            if pending_tools.len() <= index {
                                pending_tools.resize(index + 1, PendingToolCall::default());
                            }
                            let slot = &mut pending_tools[index];
                            if let Some(id) = &delta.id {
                                slot.id = id.clone();
                            }
                            if let Some(f) = &delta.function {
                                if let Some(name) = &f.name {
                                    slot.name = name.clone();
                                }
                                if let Some(args) = &f.arguments {
                                    slot.arguments.push_str(args);
                                }
                            }
                        }
                    }
                }
            }
        }

        line_buf = remainder;
    }

    // Emit accumulated tool calls before the terminal event.
    for pending in pending_tools.drain(..) {
        if pending.name.is_empty() {
            continue;
        }
        let input = serde_json::from_str::<serde_json::Value>(&pending.arguments)
            .unwrap_or(serde_json::Value::Object(Default::default()));
        let id = if pending.id.is_empty() {
            format!("call_{}", uuid::Uuid::new_v4().simple())
        } else {
            pending.id
        };
        if tx
            .send(StreamEvent::ToolStart {
                id: id.clone(),
                name: pending.name,
                input,
            })
            .await
            .is_err()
        {
            return Ok(());
        }
        let _ = tx.send(StreamEvent::ToolStop { id }).await;
    }

    let _ = tx
        .send(StreamEvent::Stop {
            stop_reason: normalize_finish_reason(&finish_reason),
            model,
            usage,
        })
        .await;
    Ok(())
}

// OpenAI API response types (private, deserialization only)

#[derive(Deserialize)]
struct ApiResponse {
    model: String,
    choices: Vec<Choice>,
    usage: Option<ApiUsage>,
}

#[derive(Deserialize)]
struct Choice {
    message: ApiMessage,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ApiMessage {
    content: Option<String>,
    tool_calls: Option<Vec<ApiToolCall>>,
}

#[derive(Deserialize)]
struct ApiToolCall {
    id: String,
    function: ApiFunction,
}

#[derive(Deserialize)]
struct ApiFunction {
    name: String,
    arguments: String,
}

#[derive(Deserialize)]
struct ApiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

// Streaming chunk types

#[derive(Deserialize)]
struct StreamChunk {
    choices: Vec<StreamChoice>,
    usage: Option<ApiUsage>,
}

#[derive(Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct StreamDelta {
    content: Option<String>,
    tool_calls: Option<Vec<StreamToolCallDelta>>,
}

#[derive(Deserialize)]
struct StreamToolCallDelta {
    index: usize,
    id: Option<String>,
    function: Option<StreamFunctionDelta>,
}

#[derive(Deserialize)]
struct StreamFunctionDelta {
    name: Option<String>,
    arguments: Option<String>,
}
