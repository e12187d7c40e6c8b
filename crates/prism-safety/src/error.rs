use serde::{Deserialize, Serialize};
use thiserror::Error;

use prism_core::{ErrorKind, Language};

/// Closed category set shared with the classifier prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SafetyCategory {
    MedicalAdvice,
    FinancialAdvice,
    LegalAdvice,
    ProductMarketing,
    HarmfulContent,
    AdultContent,
    Gambling,
    Drugs,
    PromptInjection,
}

impl SafetyCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            SafetyCategory::MedicalAdvice => "medical_advice",
            SafetyCategory::FinancialAdvice => "financial_advice",
            SafetyCategory::LegalAdvice => "legal_advice",
            SafetyCategory::ProductMarketing => "product_marketing",
            SafetyCategory::HarmfulContent => "harmful_content",
            SafetyCategory::AdultContent => "adult_content",
            SafetyCategory::Gambling => "gambling",
            SafetyCategory::Drugs => "drugs",
            SafetyCategory::PromptInjection => "prompt_injection",
        }
    }

    /// User-facing rejection message for this category.
    pub fn localized_message(&self, language: Language) -> &'static str {
        match language {
            Language::En => match self {
                SafetyCategory::MedicalAdvice => {
                    "This assistant cannot provide medical advice."
                }
                SafetyCategory::FinancialAdvice => {
                    "This assistant cannot provide financial advice."
                }
                SafetyCategory::LegalAdvice => "This assistant cannot provide legal advice.",
                SafetyCategory::ProductMarketing => {
                    "Promotional content is not supported here."
                }
                SafetyCategory::HarmfulContent => {
                    "The content was rejected because it may be harmful."
                }
                SafetyCategory::AdultContent => "Adult content is not supported here.",
                SafetyCategory::Gambling => "Gambling content is not supported here.",
                SafetyCategory::Drugs => "Drug-related content is not supported here.",
                SafetyCategory::PromptInjection => {
                    "The message looks like an attempt to manipulate the assistant."
                }
            },
            Language::Vi => match self {
                SafetyCategory::MedicalAdvice => {
                    "Trợ lý không thể đưa ra lời khuyên y tế."
                }
                SafetyCategory::FinancialAdvice => {
                    "Trợ lý không thể đưa ra lời khuyên tài chính."
                }
                SafetyCategory::LegalAdvice => {
                    "Trợ lý không thể đưa ra lời khuyên pháp lý."
                }
                SafetyCategory::ProductMarketing => {
                    "Nội dung quảng cáo không được hỗ trợ."
                }
                SafetyCategory::HarmfulContent => {
                    "Nội dung bị từ chối vì có thể gây hại."
                }
                SafetyCategory::AdultContent => {
                    "Nội dung người lớn không được hỗ trợ."
                }
                SafetyCategory::Gambling => "Nội dung cờ bạc không được hỗ trợ.",
                SafetyCategory::Drugs => {
                    "Nội dung liên quan đến chất cấm không được hỗ trợ."
                }
                SafetyCategory::PromptInjection => {
                    "Tin nhắn có dấu hiệu thao túng trợ lý."
                }
            },
        }
    }
}

impl std::str::FromStr for SafetyCategory {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim() {
            "medical_advice" => Ok(SafetyCategory::MedicalAdvice),
            "financial_advice" => Ok(SafetyCategory::FinancialAdvice),
            "legal_advice" => Ok(SafetyCategory::LegalAdvice),
            "product_marketing" => Ok(SafetyCategory::ProductMarketing),
            "harmful_content" => Ok(SafetyCategory::HarmfulContent),
            "adult_content" => Ok(SafetyCategory::AdultContent),
            "gambling" => Ok(SafetyCategory::Gambling),
            "drugs" => Ok(SafetyCategory::Drugs),
            "prompt_injection" => Ok(SafetyCategory::PromptInjection),
            other => Err(format!("unknown safety category: {other}")),
        }
    }
}

#[derive(Debug, Error)]
pub enum SafetyError {
    #[error("Content rejected ({}): {message}", category.as_str())]
    Unsafe {
        category: SafetyCategory,
        /// Localized, user-facing message.
        message: String,
    },

    #[error("Safety classifier error: {0}")]
    Classifier(String),
}

impl SafetyError {
    pub fn unsafe_content(category: SafetyCategory, language: Language) -> Self {
        SafetyError::Unsafe {
            category,
            message: category.localized_message(language).to_string(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            SafetyError::Unsafe { .. } => ErrorKind::ContentSafety,
            SafetyError::Classifier(_) => ErrorKind::Transient,
        }
    }

    pub fn category(&self) -> Option<SafetyCategory> {
        match self {
            SafetyError::Unsafe { category, .. } => Some(*category),
            SafetyError::Classifier(_) => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, SafetyError>;
