//! Provider factory and instance cache.
//!
//! Instances are cached per (kind, key-prefix) so distinct accounts get
//! distinct clients without the full key ever being used as a map key.
//! Switching providers replaces the cached binding; in-flight streams hold
//! their own `Arc` and finish on the old instance.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, info};

use prism_core::config::{ProviderKind, ProviderSettings};

use crate::anthropic::AnthropicProvider;
use crate::error::{ProviderError, Result};
use crate::gemini::GeminiProvider;
use crate::openai::OpenAiProvider;
use crate::provider::ChatProvider;

/// How much of the API key participates in the cache key.
const KEY_PREFIX_LEN: usize = 8;

pub const ENV_PROVIDER: &str = "LLM_PROVIDER";
pub const ENV_MODEL: &str = "LLM_MODEL";
pub const ENV_MAX_TOKENS: &str = "LLM_MAX_TOKENS";
pub const ENV_TEMPERATURE: &str = "LLM_TEMPERATURE";

#[derive(Default)]
pub struct ProviderFactory {
    cache: DashMap<(ProviderKind, String), Arc<dyn ChatProvider>>,
}

impl ProviderFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return a cached instance for these settings, or build one.
    pub fn create(&self, settings: &ProviderSettings) -> Result<Arc<dyn ChatProvider>> {
        if settings.api_key.is_empty() {
            return Err(ProviderError::NotConfigured(format!(
                "{} api key is empty",
                settings.kind
            )));
        }

        let cache_key = (settings.kind, key_prefix(&settings.api_key));
        if let Some(existing) = self.cache.get(&cache_key) {
            if existing.is_configured() {
                debug!(kind = %settings.kind, "provider cache hit");
                return Ok(Arc::clone(existing.value()));
            }
        }

        let provider: Arc<dyn ChatProvider> = match settings.kind {
            ProviderKind::Anthropic => {
                Arc::new(AnthropicProvider::new(settings.api_key.clone(), None))
            }
            ProviderKind::OpenAi => Arc::new(OpenAiProvider::new(settings.api_key.clone(), None)),
            ProviderKind::Google => Arc::new(GeminiProvider::new(settings.api_key.clone(), None)),
        };

        info!(kind = %settings.kind, "provider instance created");
        self.cache.insert(cache_key, Arc::clone(&provider));
        Ok(provider)
    }

    /// Build provider settings from the well-known environment variables and
    /// return the (cached or fresh) instance alongside them.
    pub fn from_environment(&self) -> Result<(Arc<dyn ChatProvider>, ProviderSettings)> {
        let kind: ProviderKind = std::env::var(ENV_PROVIDER)
            .unwrap_or_else(|_| "anthropic".to_string())
            .parse()
            .map_err(ProviderError::NotConfigured)?;

        let key_var = match kind {
            ProviderKind::Anthropic => "ANTHROPIC_API_KEY",
            ProviderKind::OpenAi => "OPENAI_API_KEY",
            ProviderKind::Google => "GOOGLE_API_KEY",
        };
        let api_key = std::env::var(key_var)
            .map_err(|_| ProviderError::NotConfigured(format!("{key_var} is not set")))?;

        let settings = ProviderSettings {
            kind,
            api_key,
            model: std::env::var(ENV_MODEL).ok(),
            max_tokens: std::env::var(ENV_MAX_TOKENS)
                .ok()
                .and_then(|v| v.parse().ok()),
            temperature: std::env::var(ENV_TEMPERATURE)
                .ok()
                .and_then(|v| v.parse().ok()),
        };

        let provider = self.create(&settings)?;
        Ok((provider, settings))
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    pub fn cached_count(&self) -> usize {
        self.cache.len()
    }

    pub fn supported_models(kind: ProviderKind) -> &'static [&'static str] {
        match kind {
            ProviderKind::Anthropic => {
                &["claude-sonnet-4-6", "claude-opus-4-1", "claude-haiku-4-5-20251001"]
            }
            ProviderKind::OpenAi => &["gpt-4o", "gpt-4o-mini", "gpt-4.1"],
            ProviderKind::Google => &["gemini-2.0-flash", "gemini-1.5-pro", "gemini-1.5-flash"],
        }
    }

    pub fn default_model(kind: ProviderKind) -> &'static str {
        Self::supported_models(kind)[0]
    }
}

fn key_prefix(api_key: &str) -> String {
    api_key.chars().take(KEY_PREFIX_LEN).collect()
}
