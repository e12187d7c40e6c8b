pub mod classifier;
pub mod error;
pub mod patterns;
pub mod pipeline;
pub mod sanitize;

pub use classifier::{SafetyClassifier, SafetyVerdict, CLASSIFIER_SYSTEM_PROMPT};
pub use error::{SafetyCategory, SafetyError};
pub use pipeline::ContentSafety;
pub use sanitize::sanitize_content;
