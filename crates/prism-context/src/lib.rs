pub mod engine;
pub mod error;
pub mod importance;
pub mod store;
pub mod summary;
pub mod window;

pub use engine::ContextEngine;
pub use error::ContextError;
pub use store::{Conversation, ConversationInfo, ConversationStore};
pub use window::{ContextWindow, FactKind, KeyFact, Summary, WindowStats};
