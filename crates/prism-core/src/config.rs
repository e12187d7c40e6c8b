use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// Cadence of the shared-conversation cache sweeper.
pub const CACHE_SWEEP_INTERVAL_SECS: u64 = 300;
/// Hard cap on a publish payload; larger requests are rejected.
pub const MAX_SHARE_PAYLOAD_BYTES: usize = 256 * 1024;

/// Top-level config (prism.toml + PRISM_* env overrides).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PrismConfig {
    #[serde(default)]
    pub context: ContextConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default)]
    pub vector: VectorConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub safety: SafetyConfig,
    #[serde(default)]
    pub share: ShareConfig,
    #[serde(default)]
    pub provider: Option<ProviderSettings>,
}

/// Which backend family a provider instance belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Anthropic,
    OpenAi,
    Google,
}

impl ProviderKind {
    pub fn as_str(&self) -> &str {
        match self {
            ProviderKind::Anthropic => "anthropic",
            ProviderKind::OpenAi => "openai",
            ProviderKind::Google => "google",
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "anthropic" => Ok(ProviderKind::Anthropic),
            "openai" => Ok(ProviderKind::OpenAi),
            "google" => Ok(ProviderKind::Google),
            other => Err(format!("unknown provider kind: {}", other)),
        }
    }
}

/// Settings for one provider instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderSettings {
    pub kind: ProviderKind,
    pub api_key: String,
    /// Model id. Falls back to the provider's default model when unset.
    pub model: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f64>,
}

/// Context engine knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    /// The last N messages are always included verbatim and never shed.
    #[serde(default = "default_max_recent")]
    pub max_recent_messages: usize,
    /// Token budget for the assembled window.
    #[serde(default = "default_max_context_tokens")]
    pub max_context_tokens: u32,
    /// Un-summarized message count that triggers folding the oldest batch
    /// into a running summary.
    #[serde(default = "default_summarization_threshold")]
    pub summarization_threshold: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_recent_messages: default_max_recent(),
            max_context_tokens: default_max_context_tokens(),
            summarization_threshold: default_summarization_threshold(),
        }
    }
}

/// Bayesian memory manager knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// How many historical messages the manager returns at most.
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Candidate pool pulled from the vector store before scoring.
    #[serde(default = "default_max_history_size")]
    pub max_history_size: usize,
    /// Posterior cutoff below which a candidate is dropped.
    #[serde(default = "default_min_relevance_probability")]
    pub min_relevance_probability: f64,
    /// Half-life (hours) of the temporal evidence decay.
    #[serde(default = "default_half_life_hours")]
    pub half_life_hours: f64,
    /// Floor for temporal evidence; old messages never decay below this.
    #[serde(default = "default_min_relevance")]
    pub min_relevance: f64,
    #[serde(default)]
    pub evidence_weights: EvidenceWeights,
    #[serde(default)]
    pub prior_weights: PriorWeights,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            max_history_size: default_max_history_size(),
            min_relevance_probability: default_min_relevance_probability(),
            half_life_hours: default_half_life_hours(),
            min_relevance: default_min_relevance(),
            evidence_weights: EvidenceWeights::default(),
            prior_weights: PriorWeights::default(),
        }
    }
}

/// Weights for the six evidence channels. Must sum to 1.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidenceWeights {
    pub semantic: f64,
    pub temporal: f64,
    pub entity: f64,
    pub topic: f64,
    pub interaction: f64,
    pub continuity: f64,
}

impl EvidenceWeights {
    pub fn sum(&self) -> f64 {
        self.semantic + self.temporal + self.entity + self.topic + self.interaction + self.continuity
    }
}

impl Default for EvidenceWeights {
    fn default() -> Self {
        Self {
            semantic: 0.35,
            temporal: 0.15,
            entity: 0.15,
            topic: 0.15,
            interaction: 0.10,
            continuity: 0.10,
        }
    }
}

/// Weights for the five prior channels. Must sum to 1.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriorWeights {
    pub importance: f64,
    pub message_type: f64,
    pub length: f64,
    pub position: f64,
    pub user_marked: f64,
}

impl PriorWeights {
    pub fn sum(&self) -> f64 {
        self.importance + self.message_type + self.length + self.position + self.user_marked
    }
}

impl Default for PriorWeights {
    fn default() -> Self {
        Self {
            importance: 0.30,
            message_type: 0.20,
            length: 0.15,
            position: 0.15,
            user_marked: 0.20,
        }
    }
}

/// Vector store backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum VectorProviderKind {
    /// Brute-force in-process store; synchronous and strictly ordered.
    #[default]
    Memory,
    /// Remote approximate-nearest-neighbour service.
    AnnService,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorConfig {
    #[serde(default)]
    pub provider: VectorProviderKind,
    #[serde(default = "default_collection")]
    pub collection: String,
    #[serde(default = "default_dimension")]
    pub dimension: usize,
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
    /// Base URL of the ANN service. Required for `AnnService`.
    pub endpoint: Option<String>,
    /// Base URL of the embedding endpoint. When unset, the deterministic
    /// degraded-mode embedding is used.
    pub embedding_endpoint: Option<String>,
    pub data_path: Option<String>,
}

impl Default for VectorConfig {
    fn default() -> Self {
        Self {
            provider: VectorProviderKind::Memory,
            collection: default_collection(),
            dimension: default_dimension(),
            embedding_model: default_embedding_model(),
            endpoint: None,
            embedding_endpoint: None,
            data_path: None,
        }
    }
}

/// Shared-conversation cache knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Maximum entry count; inserting beyond this evicts the LRU entry.
    #[serde(default = "default_cache_max_size")]
    pub max_size: usize,
    /// Default TTL applied when `set` is called without one. None = no expiry.
    pub default_ttl_secs: Option<u64>,
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_size: default_cache_max_size(),
            default_ttl_secs: None,
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

/// Content safety knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafetyConfig {
    /// Whether the LLM-assisted classifier tier is consulted.
    #[serde(default)]
    pub ai_enabled: bool,
    /// Model used for the classifier tier.
    #[serde(default = "default_classifier_model")]
    pub classifier_model: String,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            ai_enabled: false,
            classifier_model: default_classifier_model(),
        }
    }
}

/// Conversation publishing knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShareConfig {
    #[serde(default = "default_share_base_url")]
    pub base_url: String,
    #[serde(default = "default_share_payload_bytes")]
    pub max_payload_bytes: usize,
    /// Default expiry applied when the publisher doesn't pick one.
    pub default_ttl_days: Option<u32>,
}

impl Default for ShareConfig {
    fn default() -> Self {
        Self {
            base_url: default_share_base_url(),
            max_payload_bytes: default_share_payload_bytes(),
            default_ttl_days: None,
        }
    }
}

fn default_max_recent() -> usize {
    10
}
fn default_max_context_tokens() -> u32 {
    8000
}
fn default_summarization_threshold() -> usize {
    20
}
fn default_top_k() -> usize {
    5
}
fn default_max_history_size() -> usize {
    50
}
fn default_min_relevance_probability() -> f64 {
    0.2
}
fn default_half_life_hours() -> f64 {
    24.0
}
fn default_min_relevance() -> f64 {
    0.1
}
fn default_collection() -> String {
    "prism_messages".to_string()
}
fn default_dimension() -> usize {
    384
}
fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}
fn default_cache_max_size() -> usize {
    500
}
fn default_sweep_interval() -> u64 {
    CACHE_SWEEP_INTERVAL_SECS
}
fn default_classifier_model() -> String {
    "claude-haiku-4-5-20251001".to_string()
}
fn default_share_base_url() -> String {
    "https://prism.local/shared".to_string()
}
fn default_share_payload_bytes() -> usize {
    MAX_SHARE_PAYLOAD_BYTES
}

impl PrismConfig {
    /// Load config from a TOML file with PRISM_* env var overrides.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: PrismConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("PRISM_").split("_"))
            .extract()
            .map_err(|e| crate::error::PrismError::Config(e.to_string()))?;

        Ok(config)
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.prism/prism.toml", home)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_weights_sum_to_one() {
        assert!((EvidenceWeights::default().sum() - 1.0).abs() < 1e-9);
        assert!((PriorWeights::default().sum() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn provider_kind_round_trips() {
        for kind in [
            ProviderKind::Anthropic,
            ProviderKind::OpenAi,
            ProviderKind::Google,
        ] {
            assert_eq!(kind.as_str().parse::<ProviderKind>().unwrap(), kind);
        }
    }
}
