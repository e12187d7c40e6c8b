//! Central shared state.
//!
//! Everything is built once at startup and injected; there are no ambient
//! singletons. `shutdown` cancels background work (cache sweeper, active
//! turn streams) and clears the shared cache.

use std::sync::{Arc, RwLock};

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tracing::info;

use prism_cache::SharedConversationCache;
use prism_context::ContextEngine;
use prism_core::config::{PrismConfig, ProviderSettings};
use prism_memory::{BayesianMemoryManager, HistoryVectorizer, MetadataStore};
use prism_provider::{ChatProvider, ProviderFactory};
use prism_safety::ContentSafety;
use prism_tools::ToolRegistry;
use prism_vector::VectorStore;

use crate::classifier::LlmSafetyClassifier;
use crate::error::{GatewayError, Result};

pub struct AppState {
    pub config: PrismConfig,
    pub factory: ProviderFactory,
    pub engine: ContextEngine,
    pub cache: Arc<SharedConversationCache>,
    pub safety: ContentSafety,
    pub tools: ToolRegistry,
    /// Active turn streams: chat id -> cancellation token.
    pub active_turns: DashMap<String, CancellationToken>,
    provider: RwLock<Option<Arc<dyn ChatProvider>>>,
    provider_settings: RwLock<Option<ProviderSettings>>,
}

impl AppState {
    /// Wire the full subsystem graph from config. Fails only when the
    /// vector store backend is configured but unreachable.
    pub async fn new(config: PrismConfig) -> Result<Self> {
        let vectors = Arc::new(
            VectorStore::connect(&config.vector)
                .await
                .map_err(prism_context::ContextError::Vector)?,
        );
        let metadata = Arc::new(MetadataStore::new());
        let vectorizer = Arc::new(HistoryVectorizer::new(Arc::clone(&vectors), metadata));
        let memory = Arc::new(
            BayesianMemoryManager::new(Arc::clone(&vectorizer), config.memory.clone())
                .map_err(prism_context::ContextError::Memory)?,
        );
        let engine = ContextEngine::new(
            vectorizer,
            memory,
            Arc::clone(&vectors),
            config.context.clone(),
        );
        let cache = SharedConversationCache::new(config.cache.clone());

        let factory = ProviderFactory::new();
        let mut provider: Option<Arc<dyn ChatProvider>> = None;
        if let Some(settings) = &config.provider {
            provider = Some(factory.create(settings)?);
        }

        // The classifier tier reuses the selected provider when present.
        let classifier = provider.as_ref().map(|p| {
            Arc::new(LlmSafetyClassifier::new(
                Arc::clone(p),
                config.safety.classifier_model.clone(),
            )) as Arc<dyn prism_safety::SafetyClassifier>
        });
        let safety = ContentSafety::new(config.safety.ai_enabled, classifier);

        info!(
            provider = provider.as_ref().map(|p| p.name()).unwrap_or("none"),
            "prism gateway state assembled"
        );

        Ok(Self {
            provider_settings: RwLock::new(config.provider.clone()),
            config,
            factory,
            engine,
            cache,
            safety,
            tools: ToolRegistry::new(),
            active_turns: DashMap::new(),
            provider: RwLock::new(provider),
        })
    }

    /// The currently selected provider.
    pub fn provider(&self) -> Result<Arc<dyn ChatProvider>> {
        self.provider
            .read()
            .unwrap()
            .as_ref()
            .map(Arc::clone)
            .ok_or(GatewayError::NoProviderConfigured)
    }

    pub fn provider_settings(&self) -> Option<ProviderSettings> {
        self.provider_settings.read().unwrap().clone()
    }

    /// Switch to a different provider at runtime. In-flight streams keep
    /// their own `Arc` and finish on the old instance.
    pub fn switch_provider(&self, settings: ProviderSettings) -> Result<Arc<dyn ChatProvider>> {
        let provider = self.factory.create(&settings)?;
        *self.provider.write().unwrap() = Some(Arc::clone(&provider));
        *self.provider_settings.write().unwrap() = Some(settings);
        info!(provider = provider.name(), "provider switched");
        Ok(provider)
    }

    /// Replace the provider binding directly (tests, embedded hosts).
    pub fn set_provider(&self, provider: Arc<dyn ChatProvider>) {
        *self.provider.write().unwrap() = Some(provider);
    }

    /// Seed provider selection from the well-known environment variables.
    pub fn provider_from_environment(&self) -> Result<Arc<dyn ChatProvider>> {
        let (provider, settings) = self.factory.from_environment()?;
        *self.provider.write().unwrap() = Some(Arc::clone(&provider));
        *self.provider_settings.write().unwrap() = Some(settings);
        Ok(provider)
    }

    /// Cancel background work and drop cached state. In-flight cache calls
    /// complete; active turn streams are cancelled cooperatively.
    pub fn shutdown(&self) {
        for entry in self.active_turns.iter() {
            entry.value().cancel();
        }
        self.active_turns.clear();
        self.cache.shutdown();
        info!("prism gateway state shut down");
    }
}
