//! Google Gemini adapter (generateContent API, API-key auth).
//!
//! This API has no tool-call ids of its own: function calls are matched to
//! function responses by name. Synthesized ids therefore embed the function
//! name (`name:counter`) so the id survives the round trip and the name can
//! be recovered when a tool result is sent back.

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

const SUPPORTED_MODELS: &[&str] = &["gemini-2.0-flash", "gemini-1.5-pro", "gemini-1.5-flash"];
const DEFAULT_MODEL: &str = "gemini-2.0-flash";
const DEFAULT_MAX_TOKENS: u32 = 4096;

pub struct GeminiProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl GeminiProvider {
    pub fn new(api_key: String, base_url: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            base_url: base_url
                .unwrap_or_else(|| "https://generativelanguage.googleapis.com".to_string()),
        }
    }

    fn endpoint(&self, model: &str, streaming: bool) -> String {
        if streaming {
            format!(
                "{}/v1beta/models/{}:streamGenerateContent?alt=sse",
                self.base_url, model
            )
        } else {
            format!("{}/v1beta/models/{}:generateContent", self.base_url, model)
        }
    }

    async fn post(&self, url: &str, body: &serde_json::Value) -> Result<reqwest::Response> {
        let resp = self
            .client
            .post(url)
            .header("x-goog-api-key", &self.api_key)
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
        warn!(status, body = %text, "Gemini API error");
        Err(classify_response(status, retry_after, &text))
    }
}

#[async_trait]
impl ChatProvider for GeminiProvider {
    fn name(&self) -> &str {
        "gemini"
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Google
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
        let body = build_request_body(req);
        let url = self.endpoint(&req.model, false);
        debug!(model = %req.model, "sending request to Gemini");

        let resp = self.post(&url, &body).await?;
        let raw: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| ProviderError::Parse(e.to_string()))?;
        let api_resp: GeminiResponse = serde_json::from_value(raw.clone())
            .map_err(|e| ProviderError::Parse(e.to_string()))?;

        Ok(parse_response(api_resp, req.model.clone(), raw))
    }

    async fn stream(
        &self,
        req: &ChatRequest,
        tx: mpsc::Sender<StreamEvent>,
        cancel: CancellationToken,
    ) -> Result<()> {
        let body = build_request_body(req);
        let url = self.endpoint(&req.model, true);
        debug!(model = %req.model, "sending streaming request to Gemini");

        let resp = self.post(&url, &body).await?;
        process_stream(resp, req.model.clone(), tx, cancel).await
    }
}

/// Recover the function name from a synthesized tool-call id.
fn name_from_call_id(id: &str) -> &str {
    id.split(':').next().unwrap_or(id)
}

fn make_call_id(name: &str, ordinal: usize) -> String {
    format!("{name}:{ordinal}")
}

/// Map the neutral request onto the generateContent wire shape.
///
/// Roles: assistant becomes `model`, everything else `user` (the system
/// prompt travels in `systemInstruction`). Tool results become
/// `functionResponse` parts on a user turn.
pub(crate) fn build_request_body(req: &ChatRequest) -> serde_json::Value {
    let mut contents: Vec<serde_json::Value> = Vec::new();

    for msg in &req.messages {
        let role = match msg.role {
            Role::Assistant => "model",
            Role::User | Role::System | Role::Tool => "user",
        };

        let parts: Vec<serde_json::Value> = match &msg.content {
            MessageContent::Text(text) => vec![serde_json::json!({ "text": text })],
            MessageContent::Blocks(blocks) => blocks
                .iter()
                .map(|b| match b {
                    ContentBlock::Text { text } => serde_json::json!({ "text": text }),
                    ContentBlock::ToolUse { id, name, input } => {
                        let _ = id; // matching is by name on this API
                        serde_json::json!({
                            "functionCall": { "name": name, "args": input }
                        })
                    }
                    ContentBlock::ToolResult {
                        tool_use_id,
                        content,
                        is_error,
                    } => serde_json::json!({
                        "functionResponse": {
                            "name": name_from_call_id(tool_use_id),
                            "response": { "content": content, "is_error": is_error },
                        }
                    }),
                })
                .collect(),
        };

        contents.push(serde_json::json!({ "role": role, "parts": parts }));
    }

    let mut generation_config = serde_json::json!({ "maxOutputTokens": req.max_tokens });
    if let Some(temp) = req.temperature {
        generation_config["temperature"] = serde_json::json!(temp);
    }

    let mut body = serde_json::json!({
        "contents": contents,
        "generationConfig": generation_config,
    });

    if let Some(ref system) = req.system {
        body["systemInstruction"] = serde_json::json!({
            "parts": [{ "text": system }]
        });
    }
    if !req.tools.is_empty() {
        let declarations: Vec<serde_json::Value> = req
            .tools
            .iter()
            .map(|t| {
                serde_json::json!({
                    "name": t.name,
                    "description": t.description,
                    "parameters": t.input_schema,
                })
            })
            .collect();
        body["tools"] = serde_json::json!([{ "functionDeclarations": declarations }]);
    }

    body
}

pub(crate) fn normalize_finish_reason(raw: &str, has_tool_calls: bool) -> StopReason {
    if has_tool_calls {
        return StopReason::ToolUse;
    }
    match raw {
        "STOP" | "" => StopReason::EndTurn,
        "MAX_TOKENS" => StopReason::MaxTokens,
        "SAFETY" | "PROHIBITED_CONTENT" | "BLOCKLIST" => StopReason::ContentFilter,
        other => StopReason::Other(other.to_string()),
    }
}

fn parse_response(resp: GeminiResponse, model: String, raw: serde_json::Value) -> ChatResponse {
    let candidate = resp.candidates.into_iter().next();
    let mut text_parts: Vec<String> = Vec::new();
    let mut tool_calls: Vec<ToolCall> = Vec::new();

    if let Some(ref c) = candidate {
        for part in &c.content.parts {
            if let Some(ref t) = part.text {
                text_parts.push(t.clone());
            }
            if let Some(ref fc) = part.function_call {
                tool_calls.push(ToolCall {
                    id: make_call_id(&fc.name, tool_calls.len()),
                    name: fc.name.clone(),
                    input: fc.args.clone().unwrap_or(serde_json::json!({})),
                });
            }
        }
    }

    let finish = candidate
        .and_then(|c| c.finish_reason)
        .unwrap_or_default();

    ChatResponse {
        text: text_parts.join(""),
        stop_reason: normalize_finish_reason(&finish, !tool_calls.is_empty()),
        tool_calls,
        model,
        usage: Usage {
            tokens_in: resp
                .usage_metadata
                .as_ref()
                .map(|u| u.prompt_token_count)
                .unwrap_or(0),
            tokens_out: resp
                .usage_metadata
                .as_ref()
                .map(|u| u.candidates_token_count)
                .unwrap_or(0),
        },
        raw,
    }
}

/// Parse the `alt=sse` stream: each data line is a full response chunk with
/// partial candidate text.
async fn process_stream(
    resp: reqwest::Response,
    model: String,
    tx: mpsc::Sender<StreamEvent>,
    cancel: CancellationToken,
) -> Result<()> {
    use futures_util::StreamExt;

    let mut usage = Usage::default();
    let mut finish_reason = String::new();
    let mut tool_ordinal = 0usize;
    let mut saw_tool_call = false;
    let mut line_buf = String::new();
    let mut byte_stream = resp.bytes_stream();

    loop {
        let chunk = tokio::select! {
            c = byte_stream.next() => c,
            _ = cancel.cancelled() => {
                debug!("gemini stream cancelled");
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
            let Some(SseParsed::Data(data)) = parse_sse_line(line) else {
                continue;
            };
            let Ok(chunk_resp) = serde_json::from_str::<GeminiResponse>(&data) else {
                continue;
            };

            if let Some(u) = &chunk_resp.usage_metadata {
                usage.tokens_in = u.prompt_token_count;
                usage.tokens_out = u.candidates_token_count;
            }
            for candidate in &chunk_resp.candidates {
                if let Some(reason) = &candidate.finish_reason {
                    if !reason.is_empty() {
                        finish_reason = reason.clone();
                    }
                }
                for part in &candidate.content.parts {
                    if let Some(ref t) = part.text {
                        if !t.is_empty()
                            && tx
                                .send(StreamEvent::ContentChunk { text: t.clone() })
                                .await
                                .is_err()
                        {
                            return Ok(());
                        }
                    }
                    if let Some(ref fc) = part.function_call {
                        saw_tool_call = true;
                        let id = make_call_id(&fc.name, tool_ordinal);
                        tool_ordinal += 1;
                        if tx
                            .send(StreamEvent::ToolStart {
                                id: id.clone(),
                                name: fc.name.clone(),
                                input: fc.args.clone().unwrap_or(serde_json::json!({})),
                            })
                            .await
                            .is_err()
                        {
                            return Ok(());
                        }
                        let _ = tx.send(StreamEvent::ToolStop { id }).await;
                    }
                }
            }
        }

        line_buf = remainder;
    }

    let _ = tx
        .send(StreamEvent::Stop {
            stop_reason: normalize_finish_reason(&finish_reason, saw_tool_call),
            model,
            usage,
        })
        .await;
    Ok(())
}

// Gemini API response types (private, deserialization only)

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: CandidateContent,
    finish_reason: Option<String>,
}

#[derive(Deserialize, Default)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    text: Option<String>,
    function_call: Option<FunctionCall>,
}

#[derive(Deserialize)]
struct FunctionCall {
    name: String,
    args: Option<serde_json::Value>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u32,
    #[serde(default)]
    candidates_token_count: u32,
}
