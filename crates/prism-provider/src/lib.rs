pub mod anthropic;
pub mod anthropic_stream;
pub mod error;
pub mod factory;
pub mod gemini;
pub mod openai;
pub mod provider;
pub mod retry;
pub mod stream;
pub mod types;

pub use error::ProviderError;
pub use factory::ProviderFactory;
pub use provider::ChatProvider;
pub use retry::{generate_with_retry, stream_with_retry};
pub use stream::StreamEvent;
pub use types::{
    ChatMessage, ChatRequest, ChatResponse, ProviderDefaults, StopReason, ToolCall,
    ToolDefinition, ToolResultEntry, Usage,
};
