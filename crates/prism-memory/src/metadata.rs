use dashmap::DashMap;

use prism_core::{ChatId, MessageId};

use crate::types::MessageMetadata;

/// In-process store of per-message metadata, keyed by (chat, message).
///
/// Reads vastly outnumber writes; writes are last-writer-wins, which is
/// acceptable for the reference counters (selection passes for the same
/// chat are serialized upstream).
#[derive(Default)]
pub struct MetadataStore {
    entries: DashMap<(String, u64), MessageMetadata>,
}

impl MetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, chat_id: &ChatId, message_id: MessageId) -> Option<MessageMetadata> {
        self.entries
            .get(&(chat_id.0.clone(), message_id.0))
            .map(|e| e.clone())
    }

    pub fn upsert(&self, chat_id: &ChatId, message_id: MessageId, metadata: MessageMetadata) {
        self.entries
            .insert((chat_id.0.clone(), message_id.0), metadata);
    }

    /// Increment `times_referenced`. Never decremented anywhere.
    pub fn increment_references(&self, chat_id: &ChatId, message_id: MessageId) {
        if let Some(mut e) = self.entries.get_mut(&(chat_id.0.clone(), message_id.0)) {
            e.times_referenced = e.times_referenced.saturating_add(1);
        }
    }

    /// Record the user's explicit mark and the adjusted importance.
    pub fn set_user_marked(&self, chat_id: &ChatId, message_id: MessageId, marked: bool) {
        if let Some(mut e) = self.entries.get_mut(&(chat_id.0.clone(), message_id.0)) {
            e.user_marked = marked;
            if marked {
                e.importance = e.importance.max(0.8);
            } else {
                e.importance *= 0.5;
            }
        }
    }

    pub fn set_importance(&self, chat_id: &ChatId, message_id: MessageId, importance: f64) {
        if let Some(mut e) = self.entries.get_mut(&(chat_id.0.clone(), message_id.0)) {
            e.importance = importance.clamp(0.0, 1.0);
        }
    }

    /// Drop all metadata for a chat (conversation deletion).
    pub fn remove_chat(&self, chat_id: &ChatId) {
        self.entries.retain(|(chat, _), _| chat != &chat_id.0);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
