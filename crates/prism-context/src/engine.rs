//! Context engine: assembles the window each turn actually sees.
//!
//! Recent messages are always included verbatim; older history arrives as
//! Bayesian-selected picks, running summaries and key facts, shed in that
//! reverse priority when the token budget runs out.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, warn};

use prism_core::config::ContextConfig;
use prism_core::{ChatId, Message, MessageContent, MessageId, OwnerId, PersonaId, Role};
use prism_memory::{BayesianMemoryManager, HistoryVectorizer, ScoredMessage};
use prism_vector::VectorStore;

use crate::error::{ContextError, Result};
use crate::importance;
use crate::store::{ConversationInfo, ConversationStore};
use crate::summary::summarize;
use crate::window::{ContextWindow, FactKind, KeyFact, WindowStats};

pub struct ContextEngine {
    store: ConversationStore,
    vectorizer: Arc<HistoryVectorizer>,
    memory: Arc<BayesianMemoryManager>,
    vectors: Arc<VectorStore>,
    config: ContextConfig,
}

impl ContextEngine {
    pub fn new(
        vectorizer: Arc<HistoryVectorizer>,
        memory: Arc<BayesianMemoryManager>,
        vectors: Arc<VectorStore>,
        config: ContextConfig,
    ) -> Self {
        Self {
            store: ConversationStore::new(),
            vectorizer,
            memory,
            vectors,
            config,
        }
    }

    pub fn create_conversation(
        &self,
        chat_id: ChatId,
        owner: OwnerId,
        title: String,
        persona: Option<PersonaId>,
    ) -> Result<()> {
        self.store.create(chat_id, owner, title, persona)
    }

    pub fn list_conversations(&self) -> Vec<ConversationInfo> {
        self.store.list()
    }

    /// Replace the conversation's persona (exactly one at a time).
    pub fn set_persona(&self, chat_id: &ChatId, persona: Option<PersonaId>) -> Result<()> {
        let conv = self.store.get(chat_id)?;
        conv.lock().unwrap().persona = persona;
        Ok(())
    }

    /// Snapshot of a conversation's messages, oldest first.
    pub fn messages(&self, chat_id: &ChatId) -> Result<Vec<Message>> {
        let conv = self.store.get(chat_id)?;
        let conv = conv.lock().unwrap();
        Ok(conv.messages.clone())
    }

    /// Record a message. Importance is computed from lexical cues unless the
    /// caller supplies one. Vectorization runs in the background; crossing
    /// the summarization threshold folds the oldest batch immediately.
    pub fn add_message(
        &self,
        chat_id: &ChatId,
        role: Role,
        content: MessageContent,
        importance: Option<f64>,
    ) -> Result<Message> {
        self.push_message(chat_id, role, content, importance, None)
    }

    /// Record an assistant turn tagged with the model that produced it.
    pub fn add_assistant_message(
        &self,
        chat_id: &ChatId,
        content: MessageContent,
        model_version: Option<String>,
    ) -> Result<Message> {
        self.push_message(chat_id, Role::Assistant, content, None, model_version)
    }

    fn push_message(
        &self,
        chat_id: &ChatId,
        role: Role,
        content: MessageContent,
        importance: Option<f64>,
        model_version: Option<String>,
    ) -> Result<Message> {
        let conv = self.store.get(chat_id)?;
        let msg = {
            let mut conv = conv.lock().unwrap();
            let importance = importance
                .map(|i| i.clamp(0.0, 1.0))
                .unwrap_or_else(|| importance::score(&content.as_text(), role));
            let msg = conv.append(role, content, importance, model_version);
            self.maybe_summarize(&mut conv);
            msg
        };

        // Index asynchronously; a failed embedding never blocks the append.
        let vectorizer = Arc::clone(&self.vectorizer);
        let background = msg.clone();
        tokio::spawn(async move {
            if let Err(e) = vectorizer.vectorize_message(&background).await {
                warn!(chat = %background.chat_id, id = %background.id, err = %e, "vectorization failed");
            }
        });

        Ok(msg)
    }

    /// Fold the oldest batch into a summary once enough un-summarized
    /// messages accumulate. The batch never reaches into the recent tail.
    fn maybe_summarize(&self, conv: &mut crate::store::Conversation) {
        if conv.unsummarized_count() < self.config.summarization_threshold {
            return;
        }
        let batch_len = self
            .config
            .summarization_threshold
            .saturating_sub(self.config.max_recent_messages)
            .max(1);
        let start = conv.summarized_count;
        let batch: Vec<Message> = conv.messages[start..start + batch_len].to_vec();

        let id = conv.next_summary_id();
        let summary = summarize(id, &batch);
        debug!(
            chat = %conv.chat_id,
            summary = id,
            from = %summary.message_range.0,
            to = %summary.message_range.1,
            "folded batch into running summary"
        );
        conv.summaries.push(summary);
        conv.summarized_count += batch_len;
    }

    /// Adjust a message's stored importance: marking raises it to at least
    /// 0.8, unmarking halves it. The metadata store mirrors the flag.
    pub fn mark_message_important(
        &self,
        chat_id: &ChatId,
        message_id: MessageId,
        marked: bool,
    ) -> Result<()> {
        let conv = self.store.get(chat_id)?;
        {
            let mut conv = conv.lock().unwrap();
            let msg = conv
                .messages
                .iter_mut()
                .find(|m| m.id == message_id)
                .ok_or_else(|| ContextError::MessageNotFound {
                    chat_id: chat_id.0.clone(),
                    message_id: message_id.0,
                })?;
            if marked {
                msg.importance = msg.importance.max(0.8);
            } else {
                msg.importance *= 0.5;
            }
        }
        self.vectorizer
            .metadata_store()
            .set_user_marked(chat_id, message_id, marked);
        Ok(())
    }

    pub fn add_key_fact(
        &self,
        chat_id: &ChatId,
        text: String,
        kind: FactKind,
        source_message: Option<MessageId>,
    ) -> Result<()> {
        let conv = self.store.get(chat_id)?;
        let mut conv = conv.lock().unwrap();
        conv.key_facts.push(KeyFact::new(text, kind, source_message));
        Ok(())
    }

    /// Delete a conversation together with its metadata and vector-store
    /// entries. From the caller's view the three go atomically: the chat is
    /// unregistered first, so no new reads can observe partial state.
    pub async fn delete_conversation(&self, chat_id: &ChatId) -> Result<()> {
        self.store.remove(chat_id)?;
        self.vectorizer.metadata_store().remove_chat(chat_id);
        self.vectors.delete_by_chat(&chat_id.0).await?;
        Ok(())
    }

    /// Assemble the optimized window for (chat, query).
    pub async fn get_optimized_context(
        &self,
        chat_id: &ChatId,
        query: Option<&str>,
    ) -> Result<ContextWindow> {
        let (recent, mut summaries, mut facts, full_tokens) = {
            let conv = self.store.get(chat_id)?;
            let conv = conv.lock().unwrap();
            let start = conv
                .messages
                .len()
                .saturating_sub(self.config.max_recent_messages);
            (
                conv.messages[start..].to_vec(),
                conv.summaries.clone(),
                conv.key_facts.clone(),
                conv.total_tokens(),
            )
        };

        let recent_ids: HashSet<u64> = recent.iter().map(|m| m.id.0).collect();

        let (mut picks, note) = match query {
            Some(q) => {
                let analysis = self.memory.analyze(chat_id, q).await;
                let picks: Vec<ScoredMessage> = analysis
                    .selected
                    .into_iter()
                    .filter(|s| !recent_ids.contains(&s.message_id.0))
                    .collect();
                (picks, analysis.context_note)
            }
            None => (Vec::new(), String::new()),
        };

        // Budget pass. Recent messages are never shed; everything else goes
        // in shedding priority: oldest summary, lowest-probability pick,
        // oldest key fact.
        let recent_tokens: u32 = recent.iter().map(|m| m.tokens).sum();
        let budget = self.config.max_context_tokens;
        loop {
            let total = recent_tokens
                + summaries.iter().map(|s| s.tokens).sum::<u32>()
                + picks.iter().map(|p| p.tokens).sum::<u32>()
                + facts.iter().map(|f| f.tokens).sum::<u32>();
            if total <= budget {
                break;
            }
            if !summaries.is_empty() {
                summaries.remove(0);
                continue;
            }
            if !picks.is_empty() {
                let lowest = picks
                    .iter()
                    .enumerate()
                    .min_by(|(_, a), (_, b)| a.probability.total_cmp(&b.probability))
                    .map(|(i, _)| i)
                    .unwrap();
                picks.remove(lowest);
                continue;
            }
            if !facts.is_empty() {
                facts.remove(0);
                continue;
            }
            break;
        }

        let picks_tokens: u32 = picks.iter().map(|p| p.tokens).sum();
        let total_tokens = recent_tokens
            + summaries.iter().map(|s| s.tokens).sum::<u32>()
            + picks.iter().map(|p| p.tokens).sum::<u32>()
            + facts.iter().map(|f| f.tokens).sum::<u32>();

        let compression_ratio = if full_tokens > 0 {
            total_tokens as f64 / full_tokens as f64
        } else {
            1.0
        };
        let bayesian_ratio = if total_tokens > 0 {
            picks_tokens as f64 / total_tokens as f64
        } else {
            0.0
        };

        let mut explanation = format!(
            "Window: {} recent, {} selected, {} summaries, {} key facts ({} tokens, {:.0}% of history).",
            recent.len(),
            picks.len(),
            summaries.len(),
            facts.len(),
            total_tokens,
            compression_ratio * 100.0
        );
        if !note.is_empty() {
            explanation.push(' ');
            explanation.push_str(&note);
        }

        Ok(ContextWindow {
            recent,
            selected_history: picks,
            summaries,
            key_facts: facts,
            stats: WindowStats {
                total_tokens,
                compression_ratio,
                bayesian_ratio,
            },
            explanation,
        })
    }
}
