use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use prism_core::{ChatId, Message, MessageContent, MessageId, OwnerId, PersonaId, Role};

use crate::error::{ContextError, Result};
use crate::window::{KeyFact, Summary};

/// One conversation's full state.
///
/// Message ids are strictly increasing and timestamps non-decreasing; both
/// are enforced here, at the single append point.
pub struct Conversation {
    pub chat_id: ChatId,
    pub owner: OwnerId,
    pub title: String,
    pub persona: Option<PersonaId>,
    pub created_at: i64,
    pub last_active: i64,
    pub messages: Vec<Message>,
    pub summaries: Vec<Summary>,
    pub key_facts: Vec<KeyFact>,
    /// Prefix of `messages` already folded into `summaries`.
    pub(crate) summarized_count: usize,
    next_message_id: u64,
    next_summary_id: u64,
}

impl Conversation {
    fn new(chat_id: ChatId, owner: OwnerId, title: String, persona: Option<PersonaId>) -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        Self {
            chat_id,
            owner,
            title,
            persona,
            created_at: now,
            last_active: now,
            messages: Vec::new(),
            summaries: Vec::new(),
            key_facts: Vec::new(),
            summarized_count: 0,
            next_message_id: 1,
            next_summary_id: 1,
        }
    }

    /// Append a message, assigning the next id and a monotonic timestamp.
    pub(crate) fn append(
        &mut self,
        role: Role,
        content: MessageContent,
        importance: f64,
        model_version: Option<String>,
    ) -> Message {
        let id = MessageId(self.next_message_id);
        self.next_message_id += 1;

        let mut msg = Message::new(self.chat_id.clone(), id, role, content);
        msg.importance = importance;
        msg.model_version = model_version;
        // Clock skew must not break the non-decreasing timestamp invariant.
        if let Some(last) = self.messages.last() {
            msg.timestamp = msg.timestamp.max(last.timestamp);
        }
        self.last_active = msg.timestamp;

        self.messages.push(msg.clone());
        msg
    }

    pub(crate) fn next_summary_id(&mut self) -> u64 {
        let id = self.next_summary_id;
        self.next_summary_id += 1;
        id
    }

    pub fn unsummarized_count(&self) -> usize {
        self.messages.len() - self.summarized_count
    }

    pub fn total_tokens(&self) -> u64 {
        self.messages.iter().map(|m| m.tokens as u64).sum()
    }
}

/// Lightweight listing entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationInfo {
    pub chat_id: ChatId,
    pub owner: OwnerId,
    pub title: String,
    pub persona: Option<PersonaId>,
    pub created_at: i64,
    pub last_active: i64,
    pub message_count: usize,
}

/// Registry of live conversations.
///
/// The map itself is read-mostly (`DashMap`); each conversation carries its
/// own mutex so concurrent appends to the same chat are serialized while
/// distinct chats proceed in parallel.
#[derive(Default)]
pub struct ConversationStore {
    chats: DashMap<String, Arc<Mutex<Conversation>>>,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(
        &self,
        chat_id: ChatId,
        owner: OwnerId,
        title: String,
        persona: Option<PersonaId>,
    ) -> Result<()> {
        use dashmap::mapref::entry::Entry;
        match self.chats.entry(chat_id.0.clone()) {
            Entry::Occupied(_) => Err(ContextError::ChatExists(chat_id.0)),
            Entry::Vacant(slot) => {
                slot.insert(Arc::new(Mutex::new(Conversation::new(
                    chat_id, owner, title, persona,
                ))));
                Ok(())
            }
        }
    }

    pub fn get(&self, chat_id: &ChatId) -> Result<Arc<Mutex<Conversation>>> {
        self.chats
            .get(&chat_id.0)
            .map(|e| Arc::clone(e.value()))
            .ok_or_else(|| ContextError::ChatNotFound(chat_id.0.clone()))
    }

    /// Remove the conversation and return it (for index cleanup).
    pub fn remove(&self, chat_id: &ChatId) -> Result<Arc<Mutex<Conversation>>> {
        self.chats
            .remove(&chat_id.0)
            .map(|(_, v)| v)
            .ok_or_else(|| ContextError::ChatNotFound(chat_id.0.clone()))
    }

    pub fn list(&self) -> Vec<ConversationInfo> {
        let mut out: Vec<ConversationInfo> = self
            .chats
            .iter()
            .map(|entry| {
                let conv = entry.value().lock().unwrap();
                ConversationInfo {
                    chat_id: conv.chat_id.clone(),
                    owner: conv.owner.clone(),
                    title: conv.title.clone(),
                    persona: conv.persona.clone(),
                    created_at: conv.created_at,
                    last_active: conv.last_active,
                    message_count: conv.messages.len(),
                }
            })
            .collect();
        out.sort_by(|a, b| b.last_active.cmp(&a.last_active));
        out
    }

    pub fn len(&self) -> usize {
        self.chats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chats.is_empty()
    }
}
