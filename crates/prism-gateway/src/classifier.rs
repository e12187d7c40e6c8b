//! LLM-backed safety classifier bridging the provider abstraction into the
//! safety pipeline's classifier seam.

use std::sync::Arc;

use async_trait::async_trait;

use prism_provider::{ChatMessage, ChatProvider, ChatRequest};
use prism_safety::{SafetyClassifier, SafetyError, CLASSIFIER_SYSTEM_PROMPT};

/// Token budget for a verdict; the reply is one small JSON object.
const CLASSIFIER_MAX_TOKENS: u32 = 256;

pub struct LlmSafetyClassifier {
    provider: Arc<dyn ChatProvider>,
    model: String,
}

impl LlmSafetyClassifier {
    pub fn new(provider: Arc<dyn ChatProvider>, model: String) -> Self {
        Self { provider, model }
    }
}

#[async_trait]
impl SafetyClassifier for LlmSafetyClassifier {
    async fn classify(&self, text: &str) -> Result<String, SafetyError> {
        let mut req = ChatRequest::new(
            self.model.clone(),
            vec![ChatMessage::text(prism_core::Role::User, text)],
        );
        req.system = Some(CLASSIFIER_SYSTEM_PROMPT.to_string());
        req.max_tokens = CLASSIFIER_MAX_TOKENS;
        req.temperature = Some(0.0);

        let resp = self
            .provider
            .generate(&req)
            .await
            .map_err(|e| SafetyError::Classifier(e.to_string()))?;
        Ok(resp.text)
    }
}
