use serde::Serialize;
use thiserror::Error;

use prism_core::{ErrorKind, Language};

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error(transparent)]
    Context(#[from] prism_context::ContextError),

    #[error(transparent)]
    Provider(#[from] prism_provider::ProviderError),

    #[error(transparent)]
    Safety(#[from] prism_safety::SafetyError),

    #[error(transparent)]
    Tools(#[from] prism_tools::ToolError),

    #[error("Shared conversation not found: {0}")]
    ShareNotFound(String),

    #[error("Payload too large: {size} bytes (max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("Not the owner of share {0}")]
    NotOwner(String),

    #[error("No LLM provider is configured")]
    NoProviderConfigured,
}

impl GatewayError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            GatewayError::Context(e) => e.kind(),
            GatewayError::Provider(e) => e.kind(),
            GatewayError::Safety(e) => e.kind(),
            GatewayError::Tools(e) => e.kind(),
            GatewayError::ShareNotFound(_) => ErrorKind::InvalidRequest,
            GatewayError::PayloadTooLarge { .. } => ErrorKind::InvalidRequest,
            GatewayError::NotOwner(_) => ErrorKind::InvalidRequest,
            GatewayError::NoProviderConfigured => ErrorKind::Authentication,
        }
    }

    /// Collapse into the single category + human message the transport
    /// serializes to clients.
    pub fn to_public(&self, language: Language) -> PublicError {
        let kind = self.kind();
        let retry_after = match self {
            GatewayError::Provider(e) => e.retry_after_secs(),
            _ => None,
        };

        // Safety failures already carry a localized, user-facing message.
        let message = match self {
            GatewayError::Safety(prism_safety::SafetyError::Unsafe { message, .. }) => {
                message.clone()
            }
            other => generic_message(kind, language, &other.to_string()),
        };

        PublicError {
            code: kind.code(),
            kind,
            message,
            retry_after_secs: retry_after,
        }
    }
}

/// Boundary error shape: one category, one human message.
#[derive(Debug, Clone, Serialize)]
pub struct PublicError {
    pub code: &'static str,
    pub kind: ErrorKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,
}

fn generic_message(kind: ErrorKind, language: Language, detail: &str) -> String {
    match (kind, language) {
        (ErrorKind::Authentication, Language::En) => {
            "The AI backend rejected the configured credentials.".to_string()
        }
        (ErrorKind::Authentication, Language::Vi) => {
            "Hệ thống AI từ chối thông tin xác thực đã cấu hình.".to_string()
        }
        (ErrorKind::RateLimit, Language::En) => {
            "Too many requests right now, please retry shortly.".to_string()
        }
        (ErrorKind::RateLimit, Language::Vi) => {
            "Quá nhiều yêu cầu, vui lòng thử lại sau giây lát.".to_string()
        }
        (ErrorKind::Quota, Language::En) => {
            "The account's usage quota is exhausted. Check the billing portal.".to_string()
        }
        (ErrorKind::Quota, Language::Vi) => {
            "Hạn mức sử dụng đã hết. Vui lòng kiểm tra trang thanh toán.".to_string()
        }
        (ErrorKind::Overloaded, Language::En) | (ErrorKind::Transient, Language::En) => {
            "The AI backend is temporarily unavailable, please retry.".to_string()
        }
        (ErrorKind::Overloaded, Language::Vi) | (ErrorKind::Transient, Language::Vi) => {
            "Hệ thống AI tạm thời quá tải, vui lòng thử lại.".to_string()
        }
        (ErrorKind::InvalidRequest, _) => detail.to_string(),
        (ErrorKind::ContentSafety, _) => detail.to_string(),
        (ErrorKind::Unknown, Language::En) => "Something went wrong.".to_string(),
        (ErrorKind::Unknown, Language::Vi) => "Đã xảy ra lỗi.".to_string(),
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_rate_limit_carries_retry_after() {
        let err = GatewayError::Provider(prism_provider::ProviderError::RateLimited {
            retry_after_secs: Some(2),
            message: "slow down".into(),
        });
        let public = err.to_public(Language::En);
        assert_eq!(public.code, "RATE_LIMITED");
        assert_eq!(public.retry_after_secs, Some(2));
    }

    #[test]
    fn safety_errors_keep_their_localized_message() {
        let err = GatewayError::Safety(prism_safety::SafetyError::unsafe_content(
            prism_safety::SafetyCategory::MedicalAdvice,
            Language::Vi,
        ));
        let public = err.to_public(Language::Vi);
        assert_eq!(public.kind, ErrorKind::ContentSafety);
        assert!(public.message.contains("y tế"));
    }
}
