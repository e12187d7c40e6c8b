use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use prism_core::config::ProviderKind;
use prism_core::{ContentBlock, MessageContent, Role};

use crate::error::Result;
use crate::stream::StreamEvent;
use crate::types::{
    ChatMessage, ChatRequest, ChatResponse, ProviderDefaults, ToolResultEntry,
};

/// Common interface over the three backend families.
///
/// The capability set is {generate, stream, add-tool-results,
/// describe-config}; adapters differ only in wire mapping.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Provider name for logging and error messages.
    fn name(&self) -> &str;

    fn kind(&self) -> ProviderKind;

    /// Whether the instance holds usable credentials.
    fn is_configured(&self) -> bool;

    fn supported_models(&self) -> &[&str];

    fn default_config(&self) -> ProviderDefaults;

    /// Send a request and wait for the complete response.
    async fn generate(&self, req: &ChatRequest) -> Result<ChatResponse>;

    /// Stream response events through a channel. Cancellation must stop
    /// emission promptly and release the connection.
    ///
    /// Default: falls back to non-streaming generate, emitting one chunk.
    async fn stream(
        &self,
        req: &ChatRequest,
        tx: mpsc::Sender<StreamEvent>,
        cancel: CancellationToken,
    ) -> Result<()> {
        let resp = tokio::select! {
            r = self.generate(req) => r?,
            _ = cancel.cancelled() => return Err(crate::error::ProviderError::Cancelled),
        };
        if !resp.text.is_empty() {
            let _ = tx
                .send(StreamEvent::ContentChunk {
                    text: resp.text.clone(),
                })
                .await;
        }
        for call in &resp.tool_calls {
            let _ = tx
                .send(StreamEvent::ToolStart {
                    id: call.id.clone(),
                    name: call.name.clone(),
                    input: call.input.clone(),
                })
                .await;
            let _ = tx.send(StreamEvent::ToolStop { id: call.id.clone() }).await;
        }
        let _ = tx
            .send(StreamEvent::Stop {
                stop_reason: resp.stop_reason,
                model: resp.model,
                usage: resp.usage,
            })
            .await;
        Ok(())
    }

    /// Append tool results to a neutral history in the shape the next call
    /// expects. The neutral form is a single tool-role turn carrying one
    /// tool-result block per executed call; each adapter converts it to its
    /// native representation at request-build time, preserving ids.
    fn add_tool_results(
        &self,
        mut history: Vec<ChatMessage>,
        results: &[ToolResultEntry],
    ) -> Vec<ChatMessage> {
        if results.is_empty() {
            return history;
        }
        let blocks: Vec<ContentBlock> = results
            .iter()
            .map(|r| ContentBlock::ToolResult {
                tool_use_id: r.tool_use_id.clone(),
                content: r.content.clone(),
                is_error: r.is_error,
            })
            .collect();
        history.push(ChatMessage {
            role: Role::Tool,
            content: MessageContent::Blocks(blocks),
        });
        history
    }
}
