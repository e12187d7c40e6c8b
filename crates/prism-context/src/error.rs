use prism_core::ErrorKind;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ContextError {
    #[error("Conversation not found: {0}")]
    ChatNotFound(String),

    #[error("Message not found: {chat_id}/{message_id}")]
    MessageNotFound { chat_id: String, message_id: u64 },

    #[error("Conversation already exists: {0}")]
    ChatExists(String),

    #[error("Memory error: {0}")]
    Memory(#[from] prism_memory::MemoryError),

    #[error("Vector store error: {0}")]
    Vector(#[from] prism_vector::VectorError),
}

impl ContextError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ContextError::ChatNotFound(_) | ContextError::MessageNotFound { .. } => {
                ErrorKind::InvalidRequest
            }
            ContextError::ChatExists(_) => ErrorKind::InvalidRequest,
            ContextError::Memory(e) => e.kind(),
            ContextError::Vector(e) => e.kind(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ContextError>;
