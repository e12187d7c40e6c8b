use prism_core::ErrorKind;

use crate::types::{StopReason, Usage};

/// Typed events emitted while streaming a response.
///
/// Ordering is strictly monotone end to end: a `Stop` is terminal, and a
/// terminal `Error` ends the stream the same way. Tool invocations arrive
/// as a `ToolStart` (with the fully accumulated input) immediately followed
/// by its `ToolStop`.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// Incremental text content.
    ContentChunk { text: String },

    /// The model requested a tool invocation.
    ToolStart {
        id: String,
        name: String,
        input: serde_json::Value,
    },

    /// The tool request identified by `id` is complete.
    ToolStop { id: String },

    /// A tool execution result forwarded on the same stream (emitted by the
    /// pipeline, never by a provider adapter).
    ToolResult { id: String, content: String },

    /// Stream completed.
    Stop {
        stop_reason: StopReason,
        model: String,
        usage: Usage,
    },

    /// Terminal failure. Any content delivered before this event may be
    /// incomplete.
    Error {
        kind: ErrorKind,
        message: String,
        retry_after_secs: Option<u64>,
    },
}

impl StreamEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::Stop { .. } | StreamEvent::Error { .. })
    }
}

/// Parse a single SSE line: `event: <type>` or `data: <json>`.
pub fn parse_sse_line(line: &str) -> Option<SseParsed> {
    if let Some(event_type) = line.strip_prefix("event: ") {
        Some(SseParsed::Event(event_type.to_string()))
    } else {
        line.strip_prefix("data: ")
            .map(|data| SseParsed::Data(data.to_string()))
    }
}

#[derive(Debug)]
pub enum SseParsed {
    Event(String),
    Data(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_event_and_data_lines() {
        match parse_sse_line("event: message_start") {
            Some(SseParsed::Event(e)) => assert_eq!(e, "message_start"),
            other => panic!("unexpected: {other:?}"),
        }
        match parse_sse_line("data: {\"x\":1}") {
            Some(SseParsed::Data(d)) => assert_eq!(d, "{\"x\":1}"),
            other => panic!("unexpected: {other:?}"),
        }
        assert!(parse_sse_line(": keepalive").is_none());
    }
}
