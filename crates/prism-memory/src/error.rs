use prism_core::ErrorKind;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("Vector store error: {0}")]
    Vector(#[from] prism_vector::VectorError),

    #[error("Metadata missing for message {chat_id}/{message_id}")]
    MetadataMissing { chat_id: String, message_id: u64 },

    #[error("Invalid weights: {0}")]
    InvalidWeights(String),
}

impl MemoryError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            MemoryError::Vector(e) => e.kind(),
            MemoryError::MetadataMissing { .. } => ErrorKind::Unknown,
            MemoryError::InvalidWeights(_) => ErrorKind::InvalidRequest,
        }
    }
}

pub type Result<T> = std::result::Result<T, MemoryError>;
