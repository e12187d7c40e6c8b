use prism_core::ErrorKind;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum VectorError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Vector backend unreachable: {0}")]
    Unavailable(String),

    #[error("Vector backend error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Invalid vector config: {0}")]
    Config(String),

    #[error("Vector not found: {0}")]
    NotFound(String),
}

impl VectorError {
    /// Map onto the gateway-wide error taxonomy. Backend trouble is
    /// transient by contract; only config and parse failures are not.
    pub fn kind(&self) -> ErrorKind {
        match self {
            VectorError::Http(_) | VectorError::Unavailable(_) => ErrorKind::Transient,
            VectorError::Api { status, .. } if *status >= 500 => ErrorKind::Transient,
            VectorError::Api { .. } => ErrorKind::InvalidRequest,
            VectorError::Parse(_) => ErrorKind::Unknown,
            VectorError::Config(_) => ErrorKind::InvalidRequest,
            VectorError::NotFound(_) => ErrorKind::InvalidRequest,
        }
    }
}

pub type Result<T> = std::result::Result<T, VectorError>;
