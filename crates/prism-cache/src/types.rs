use serde::{Deserialize, Serialize};

use prism_core::{OwnerId, PersonaId, Role};

/// One turn of a published conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SharedMessage {
    pub role: Role,
    pub content: String,
    /// Epoch milliseconds.
    pub timestamp: i64,
    pub persona_id: Option<PersonaId>,
}

/// A published conversation as stored in the cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SharedConversation {
    pub title: String,
    pub messages: Vec<SharedMessage>,
    /// Epoch milliseconds at publish time.
    pub created_at: i64,
    /// Monotonically non-decreasing; bumped once per fetch.
    pub view_count: u64,
    /// Epoch milliseconds; entries past this fail lookups.
    pub expires_at: Option<i64>,
    pub owner_id: Option<OwnerId>,
}
