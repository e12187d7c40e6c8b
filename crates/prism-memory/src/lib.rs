pub mod bayes;
pub mod error;
pub mod manager;
pub mod metadata;
pub mod types;
pub mod vectorizer;

pub use error::MemoryError;
pub use manager::BayesianMemoryManager;
pub use metadata::MetadataStore;
pub use types::{
    EvidenceBreakdown, MemoryAnalysis, MessageMetadata, PriorBreakdown, QueryAnalysis,
    QueryIntent, ScoredMessage, TemporalContext,
};
pub use vectorizer::HistoryVectorizer;
