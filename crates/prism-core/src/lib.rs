pub mod config;
pub mod error;
pub mod lang;
pub mod types;

pub use error::{ErrorKind, PrismError, Result};
pub use lang::Language;
pub use types::{
    estimate_tokens, ChatId, ContentBlock, Message, MessageContent, MessageId, OwnerId, PersonaId,
    Role, ShareId,
};
