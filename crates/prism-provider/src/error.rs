use prism_core::ErrorKind;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Authentication failed ({status}): {message}")]
    Auth { status: u16, message: String },

    #[error("Rate limited (retry after {retry_after_secs:?}s): {message}")]
    RateLimited {
        retry_after_secs: Option<u64>,
        message: String,
    },

    #[error("Quota or billing problem: {message}")]
    Quota { message: String },

    #[error("Provider overloaded ({status}): {message}")]
    Overloaded { status: u16, message: String },

    #[error("Transient provider failure ({status}): {message}")]
    Transient { status: u16, message: String },

    #[error("Invalid request ({status}): {message}")]
    InvalidRequest { status: u16, message: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Request deadline exceeded after {ms}ms")]
    DeadlineExceeded { ms: u64 },

    #[error("operation cancelled")]
    Cancelled,

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Unknown provider error ({status}): {message}")]
    Unknown { status: u16, message: String },
}

impl ProviderError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ProviderError::Http(_) => ErrorKind::Transient,
            ProviderError::Auth { .. } => ErrorKind::Authentication,
            ProviderError::RateLimited { .. } => ErrorKind::RateLimit,
            ProviderError::Quota { .. } => ErrorKind::Quota,
            ProviderError::Overloaded { .. } => ErrorKind::Overloaded,
            ProviderError::Transient { .. } => ErrorKind::Transient,
            ProviderError::DeadlineExceeded { .. } => ErrorKind::Transient,
            ProviderError::InvalidRequest { .. } => ErrorKind::InvalidRequest,
            ProviderError::NotConfigured(_) => ErrorKind::Authentication,
            ProviderError::Parse(_) => ErrorKind::Unknown,
            ProviderError::Cancelled => ErrorKind::Unknown,
            ProviderError::Unknown { .. } => ErrorKind::Unknown,
        }
    }

    /// Retry-after hint in seconds, when the backend provided one.
    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            ProviderError::RateLimited {
                retry_after_secs, ..
            } => *retry_after_secs,
            _ => None,
        }
    }
}

/// Normalize an error response into the taxonomy.
///
/// Status codes decide most cases; the body is inspected only where the
/// status is ambiguous (429 covers both throttling and exhausted quota, and
/// some backends report overload as a plain 500 with a telling message).
pub fn classify_response(status: u16, retry_after_secs: Option<u64>, body: &str) -> ProviderError {
    let lower = body.to_lowercase();
    let quota_hint =
        lower.contains("quota") || lower.contains("billing") || lower.contains("insufficient");
    let overload_hint = lower.contains("overloaded") || lower.contains("capacity");

    match status {
        401 | 403 => ProviderError::Auth {
            status,
            message: body.to_string(),
        },
        402 => ProviderError::Quota {
            message: body.to_string(),
        },
        429 if quota_hint => ProviderError::Quota {
            message: body.to_string(),
        },
        429 => ProviderError::RateLimited {
            retry_after_secs,
            message: body.to_string(),
        },
        529 => ProviderError::Overloaded {
            status,
            message: body.to_string(),
        },
        500..=599 if overload_hint => ProviderError::Overloaded {
            status,
            message: body.to_string(),
        },
        500..=599 => ProviderError::Transient {
            status,
            message: body.to_string(),
        },
        400 | 404 | 422 => ProviderError::InvalidRequest {
            status,
            message: body.to_string(),
        },
        _ => ProviderError::Unknown {
            status,
            message: body.to_string(),
        },
    }
}

pub type Result<T> = std::result::Result<T, ProviderError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_driven_classification() {
        assert_eq!(classify_response(401, None, "bad key").kind(), ErrorKind::Authentication);
        assert_eq!(classify_response(503, None, "upstream died").kind(), ErrorKind::Transient);
        assert_eq!(classify_response(400, None, "bad schema").kind(), ErrorKind::InvalidRequest);
        assert_eq!(classify_response(418, None, "teapot").kind(), ErrorKind::Unknown);
    }

    #[test]
    fn body_disambiguates_429() {
        let throttle = classify_response(429, Some(2), "slow down");
        assert_eq!(throttle.kind(), ErrorKind::RateLimit);
        assert_eq!(throttle.retry_after_secs(), Some(2));

        let quota = classify_response(429, None, "You exceeded your current quota");
        assert_eq!(quota.kind(), ErrorKind::Quota);
    }

    #[test]
    fn overloaded_5xx_detected_by_body() {
        assert_eq!(
            classify_response(500, None, "model is overloaded, try later").kind(),
            ErrorKind::Overloaded
        );
        assert_eq!(classify_response(529, None, "").kind(), ErrorKind::Overloaded);
    }
}
