//! SSE processing for the Anthropic streaming API.
//!
//! The event stream interleaves `content_block_*` events; tool input JSON
//! arrives in fragments and is only emitted once the block closes, so
//! consumers always see a complete `ToolStart` followed by its `ToolStop`.

use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use prism_core::ErrorKind;

use crate::anthropic::normalize_stop_reason;
use crate::error::{ProviderError, Result};
use crate::stream::{parse_sse_line, SseParsed, StreamEvent};
use crate::types::Usage;

/// Accumulated stream state across SSE events.
#[derive(Default)]
struct StreamState {
    current_event: String,
    current_block_type: String,
    tool_use_id: String,
    tool_use_name: String,
    tool_use_input_json: String,
    model: String,
    tokens_in: u32,
    tokens_out: u32,
    stop_reason: String,
}

/// Read the SSE byte stream and emit `StreamEvent`s until the response ends
/// or the token is cancelled. Dropping the response releases the
/// connection, so cancellation returns immediately after the select.
pub async fn process_stream(
    resp: reqwest::Response,
    tx: mpsc::Sender<StreamEvent>,
    cancel: CancellationToken,
) -> Result<()> {
    use futures_util::StreamExt;

    let mut state = StreamState::default();
    let mut line_buf = String::new();
    let mut byte_stream = resp.bytes_stream();

    loop {
        let chunk = tokio::select! {
            c = byte_stream.next() => c,
            _ = cancel.cancelled() => {
                debug!("anthropic stream cancelled");
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

        // SSE arrives as arbitrary byte chunks; keep the incomplete last
        // line buffered across reads.
        line_buf.push_str(text);
        let lines: Vec<&str> = line_buf.split('\n').collect();
        let (complete, remainder) = lines.split_at(lines.len() - 1);
        let remainder = remainder.first().unwrap_or(&"").to_string();

        for line in complete {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if let Some(parsed) = parse_sse_line(line) {
                match parsed {
                    SseParsed::Event(ev) => state.current_event = ev,
                    SseParsed::Data(data) => {
                        for event in parse_data_block(&data, &mut state) {
                            if tx.send(event).await.is_err() {
                                return Ok(()); // receiver dropped
                            }
                        }
                    }
                }
            }
        }

        line_buf = remainder;
    }

    let _ = tx
        .send(StreamEvent::Stop {
            stop_reason: normalize_stop_reason(&state.stop_reason),
            model: state.model,
            usage: Usage {
                tokens_in: state.tokens_in,
                tokens_out: state.tokens_out,
            },
        })
        .await;
    Ok(())
}

/// Handle one SSE data payload; may produce zero, one or two events.
fn parse_data_block(data: &str, state: &mut StreamState) -> Vec<StreamEvent> {
    match state.current_event.as_str() {
        "message_start" => {
            if let Ok(msg) = serde_json::from_str::<MessageStart>(data) {
                state.model = msg.message.model;
                state.tokens_in = msg.message.usage.input_tokens;
            }
            Vec::new()
        }

        "content_block_start" => {
            if let Ok(start) = serde_json::from_str::<ContentBlockStart>(data) {
                state.current_block_type = start.content_block.block_type.clone();
                if start.content_block.block_type == "tool_use" {
                    state.tool_use_id = start.content_block.id.unwrap_or_default();
                    state.tool_use_name = start.content_block.name.unwrap_or_default();
                    state.tool_use_input_json.clear();
                }
            }
            Vec::new()
        }

        "content_block_delta" => {
            if let Ok(delta) = serde_json::from_str::<ContentBlockDelta>(data) {
                match delta.delta.delta_type.as_str() {
                    "text_delta" => {
                        if let Some(text) = delta.delta.text {
                            return vec![StreamEvent::ContentChunk { text }];
                        }
                    }
                    "input_json_delta" => {
                        if let Some(partial) = delta.delta.partial_json {
                            state.tool_use_input_json.push_str(&partial);
                        }
                    }
                    other => {
                        debug!(delta_type = other, "unhandled delta type");
                    }
                }
            }
            Vec::new()
        }

        "content_block_stop" => {
            if state.current_block_type == "tool_use" {
                let input =
                    serde_json::from_str::<serde_json::Value>(&state.tool_use_input_json)
                        .unwrap_or(serde_json::Value::Object(Default::default()));
                let id = std::mem::take(&mut state.tool_use_id);
                let name = std::mem::take(&mut state.tool_use_name);
                state.tool_use_input_json.clear();
                state.current_block_type.clear();
                return vec![
                    StreamEvent::ToolStart {
                        id: id.clone(),
                        name,
                        input,
                    },
                    StreamEvent::ToolStop { id },
                ];
            }
            state.current_block_type.clear();
            Vec::new()
        }

        "message_delta" => {
            if let Ok(delta) = serde_json::from_str::<MessageDelta>(data) {
                state.tokens_out = delta.usage.output_tokens;
                if let Some(reason) = delta.delta.stop_reason {
                    state.stop_reason = reason;
                }
            }
            Vec::new()
        }

        "error" => {
            warn!(data, "anthropic stream error");
            vec![StreamEvent::Error {
                kind: ErrorKind::Unknown,
                message: data.to_string(),
                retry_after_secs: None,
            }]
        }

        // message_stop and unknown events need no action
        _ => Vec::new(),
    }
}

// Anthropic SSE data types (private, deserialization only)

#[derive(Deserialize)]
struct MessageStart {
    message: MessageStartInner,
}

#[derive(Deserialize)]
struct MessageStartInner {
    model: String,
    usage: InputUsage,
}

#[derive(Deserialize)]
struct InputUsage {
    input_tokens: u32,
}

#[derive(Deserialize)]
struct ContentBlockStart {
    content_block: ContentBlockMeta,
}

#[derive(Deserialize)]
struct ContentBlockMeta {
    #[serde(rename = "type")]
    block_type: String,
    id: Option<String>,
    name: Option<String>,
}

#[derive(Deserialize)]
struct ContentBlockDelta {
    delta: DeltaContent,
}

#[derive(Deserialize)]
struct DeltaContent {
    #[serde(rename = "type")]
    delta_type: String,
    text: Option<String>,
    partial_json: Option<String>,
}

#[derive(Deserialize)]
struct MessageDelta {
    delta: MessageDeltaInner,
    usage: OutputUsage,
}

#[derive(Deserialize)]
struct MessageDeltaInner {
    stop_reason: Option<String>,
}

#[derive(Deserialize)]
struct OutputUsage {
    output_tokens: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(state: &mut StreamState, event: &str, data: &str) -> Vec<StreamEvent> {
        state.current_event = event.to_string();
        parse_data_block(data, state)
    }

    #[test]
    fn text_deltas_become_chunks() {
        let mut state = StreamState::default();
        let events = feed(
            &mut state,
            "content_block_delta",
            r#"{"delta":{"type":"text_delta","text":"hello"}}"#,
        );
        assert!(matches!(
            events.as_slice(),
            [StreamEvent::ContentChunk { text }] if text == "hello"
        ));
    }

    #[test]
    fn tool_use_accumulates_and_emits_start_stop() {
        let mut state = StreamState::default();
        feed(
            &mut state,
            "content_block_start",
            r#"{"content_block":{"type":"tool_use","id":"toolu_9","name":"get_weather"}}"#,
        );
        feed(
            &mut state,
            "content_block_delta",
            r#"{"delta":{"type":"input_json_delta","partial_json":"{\"city\":"}}"#,
        );
        feed(
            &mut state,
            "content_block_delta",
            r#"{"delta":{"type":"input_json_delta","partial_json":"\"Hanoi\"}"}}"#,
        );
        let events = feed(&mut state, "content_block_stop", "{}");

        assert_eq!(events.len(), 2);
        match &events[0] {
            StreamEvent::ToolStart { id, name, input } => {
                assert_eq!(id, "toolu_9");
                assert_eq!(name, "get_weather");
                assert_eq!(input["city"], "Hanoi");
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert!(matches!(&events[1], StreamEvent::ToolStop { id } if id == "toolu_9"));
    }

    #[test]
    fn message_delta_captures_usage_and_stop_reason() {
        let mut state = StreamState::default();
        feed(
            &mut state,
            "message_delta",
            r#"{"delta":{"stop_reason":"end_turn"},"usage":{"output_tokens":42}}"#,
        );
        assert_eq!(state.tokens_out, 42);
        assert_eq!(state.stop_reason, "end_turn");
    }
}
