use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Normalized failure category shared by every component.
///
/// Each subsystem keeps its own error enum; at the request boundary the
/// gateway collapses them into one of these kinds plus a human message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    /// Invalid or missing API key. Never retried.
    Authentication,
    /// Backend throttling; may carry a retry-after hint.
    RateLimit,
    /// Plan limit or payment issue. Never retried.
    Quota,
    /// Backend transient capacity issue. Retried with backoff.
    Overloaded,
    /// Network failure, timeout or unhinted 5xx. Retried with backoff.
    Transient,
    /// Bad input or schema mismatch. Never retried.
    InvalidRequest,
    /// Input or output failed safety rules. Never retried.
    ContentSafety,
    Unknown,
}

impl ErrorKind {
    /// Stable code string for transport serialization.
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::Authentication => "AUTH_FAILED",
            ErrorKind::RateLimit => "RATE_LIMITED",
            ErrorKind::Quota => "QUOTA_EXCEEDED",
            ErrorKind::Overloaded => "OVERLOADED",
            ErrorKind::Transient => "TRANSIENT",
            ErrorKind::InvalidRequest => "INVALID_REQUEST",
            ErrorKind::ContentSafety => "CONTENT_SAFETY",
            ErrorKind::Unknown => "UNKNOWN",
        }
    }

    /// Whether the request pipeline may schedule a retry for this kind.
    pub fn retryable(&self) -> bool {
        matches!(
            self,
            ErrorKind::RateLimit | ErrorKind::Overloaded | ErrorKind::Transient
        )
    }
}

/// Workspace-level error for concerns owned by `prism-core` itself.
#[derive(Debug, Error)]
pub enum PrismError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, PrismError>;
