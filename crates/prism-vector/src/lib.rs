pub mod embed;
pub mod error;
pub mod store;

pub use embed::EmbeddingClient;
pub use error::VectorError;
pub use store::{EmbeddingKind, SearchHit, VectorMetadata, VectorRecord, VectorStore};
