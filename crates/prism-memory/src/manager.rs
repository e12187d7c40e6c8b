//! Bayesian memory manager.
//!
//! Stateless per call: each invocation analyzes the query, pulls semantic
//! candidates from the vector store, scores them with the evidence/prior
//! combination and returns the top-k with a human-readable note. Metadata
//! writes (reference counters) are last-writer-wins.

use std::sync::Arc;

use tracing::{debug, warn};

use prism_core::config::MemoryConfig;
use prism_core::{lang, ChatId, Language};

use crate::bayes;
use crate::error::{MemoryError, Result};
use crate::metadata::MetadataStore;
use crate::types::{
    EvidenceBreakdown, MemoryAnalysis, PriorBreakdown, QueryAnalysis, QueryIntent, ScoredMessage,
    SelectionStats,
};
use crate::vectorizer::{self, HistoryVectorizer, SimilarMessage};

/// Posterior above which a selection counts as a strong reference and the
/// message's `times_referenced` is incremented.
const STRONG_REFERENCE_THRESHOLD: f64 = 0.7;

pub struct BayesianMemoryManager {
    vectorizer: Arc<HistoryVectorizer>,
    metadata: Arc<MetadataStore>,
    config: MemoryConfig,
}

impl BayesianMemoryManager {
    pub fn new(vectorizer: Arc<HistoryVectorizer>, config: MemoryConfig) -> Result<Self> {
        bayes::validate_weights(&config.evidence_weights, &config.prior_weights)
            .map_err(MemoryError::InvalidWeights)?;
        let metadata = Arc::clone(vectorizer.metadata_store());
        Ok(Self {
            vectorizer,
            metadata,
            config,
        })
    }

    /// Score the history of `chat_id` against `query` and select the most
    /// relevant messages.
    ///
    /// A failed vector-store call produces an empty selection with an
    /// explanatory note; it never propagates an error to the request path.
    pub async fn analyze(&self, chat_id: &ChatId, query: &str) -> MemoryAnalysis {
        let language = lang::detect(query);
        let analysis = self.vectorizer.analyze_query(query).await;

        let candidates = match self
            .vectorizer
            .find_similar_messages(chat_id, &analysis, self.config.max_history_size)
            .await
        {
            Ok(c) => c,
            Err(e) => {
                warn!(chat = %chat_id, err = %e, "similar-message lookup failed");
                return MemoryAnalysis::empty(no_context_note(language));
            }
        };

        let now_ms = chrono::Utc::now().timestamp_millis();
        let result = self.select(&candidates, &analysis, now_ms, language, chat_id);

        // Strong selections count as references.
        for msg in &result.selected {
            if msg.probability > STRONG_REFERENCE_THRESHOLD {
                self.metadata.increment_references(chat_id, msg.message_id);
            }
        }

        debug!(
            chat = %chat_id,
            candidates = result.stats.candidates,
            selected = result.stats.selected,
            "bayesian selection complete"
        );
        result
    }

    /// Pure selection pass: score, filter, sort, rank.
    fn select(
        &self,
        candidates: &[SimilarMessage],
        analysis: &QueryAnalysis,
        now_ms: i64,
        language: Language,
        chat_id: &ChatId,
    ) -> MemoryAnalysis {
        let mut scored: Vec<ScoredMessage> = candidates
            .iter()
            .map(|c| self.score(c, analysis, now_ms, chat_id))
            .filter(|s| s.probability >= self.config.min_relevance_probability)
            .collect();

        scored.sort_by(|a, b| b.probability.total_cmp(&a.probability));
        scored.truncate(self.config.top_k);
        for (i, s) in scored.iter_mut().enumerate() {
            s.rank = i + 1;
        }

        let average = if scored.is_empty() {
            0.0
        } else {
            scored.iter().map(|s| s.probability).sum::<f64>() / scored.len() as f64
        };

        let stats = SelectionStats {
            candidates: candidates.len(),
            selected: scored.len(),
            average_probability: average,
        };
        let context_note = render_note(&stats, analysis.intent, language);

        MemoryAnalysis {
            selected: scored,
            stats,
            context_note,
        }
    }

    /// Score one candidate. All channels are in [0, 1] by construction.
    fn score(
        &self,
        candidate: &SimilarMessage,
        analysis: &QueryAnalysis,
        now_ms: i64,
        chat_id: &ChatId,
    ) -> ScoredMessage {
        let age_hours = (now_ms - candidate.created_at).max(0) as f64 / 3_600_000.0;

        let evidence = EvidenceBreakdown {
            semantic: bayes::semantic_evidence(candidate.similarity),
            temporal: bayes::temporal_evidence(
                age_hours,
                self.config.half_life_hours,
                self.config.min_relevance,
            ),
            entity: vectorizer::entity_overlap(&analysis.entities, &candidate.metadata.entities),
            topic: vectorizer::topic_similarity(&analysis.topics, &candidate.metadata.topics),
            interaction: bayes::interaction_evidence(
                candidate.metadata.user_marked,
                candidate.metadata.times_referenced,
            ),
            continuity: bayes::continuity_evidence(),
        };

        let prior = PriorBreakdown {
            importance: candidate.metadata.importance.clamp(0.0, 1.0),
            message_type: bayes::message_type_prior(candidate.role.as_deref()),
            length: bayes::length_prior(candidate.tokens),
            position: bayes::position_prior(),
            user_marked: bayes::user_marked_prior(candidate.metadata.user_marked),
        };

        let likelihood = bayes::likelihood(&evidence, &self.config.evidence_weights);
        let prior_value = bayes::prior(&prior, &self.config.prior_weights);

        ScoredMessage {
            chat_id: chat_id.clone(),
            message_id: candidate.message_id,
            content: candidate.content.clone(),
            role: candidate.role.clone(),
            tokens: candidate.tokens,
            probability: bayes::posterior(likelihood, prior_value),
            confidence: bayes::confidence(&evidence),
            rank: 0,
            evidence,
            prior,
        }
    }
}

fn no_context_note(language: Language) -> String {
    match language {
        Language::Vi => "Không có ngữ cảnh trước đó cho cuộc trò chuyện này.".to_string(),
        Language::En => "No earlier context was available for this conversation.".to_string(),
    }
}

/// Templated selection note: counts, average probability, and a sentence
/// about the top-ranked item adapted to the query intent.
fn render_note(stats: &SelectionStats, intent: QueryIntent, language: Language) -> String {
    if stats.selected == 0 {
        return no_context_note(language);
    }

    match language {
        Language::En => {
            let lead = format!(
                "Selected {} of {} past messages (average relevance {:.2}).",
                stats.selected, stats.candidates, stats.average_probability
            );
            let tail = match intent {
                QueryIntent::Question => "The top match most likely answers your question.",
                QueryIntent::Request => "The top match directly supports your request.",
                QueryIntent::Clarification => "The top match is what you seem to be referring to.",
                QueryIntent::Continuation => "The top match continues the current thread.",
                QueryIntent::NewTopic => "The top match may still give useful background.",
            };
            format!("{lead} {tail}")
        }
        Language::Vi => {
            let lead = format!(
                "Đã chọn {} trong {} tin nhắn trước đó (độ liên quan trung bình {:.2}).",
                stats.selected, stats.candidates, stats.average_probability
            );
            let tail = match intent {
                QueryIntent::Question => "Tin nhắn phù hợp nhất nhiều khả năng trả lời câu hỏi của bạn.",
                QueryIntent::Request => "Tin nhắn phù hợp nhất hỗ trợ trực tiếp yêu cầu của bạn.",
                QueryIntent::Clarification => "Tin nhắn phù hợp nhất là điều bạn đang nhắc tới.",
                QueryIntent::Continuation => "Tin nhắn phù hợp nhất tiếp nối mạch trò chuyện hiện tại.",
                QueryIntent::NewTopic => "Tin nhắn phù hợp nhất vẫn có thể cung cấp bối cảnh hữu ích.",
            };
            format!("{lead} {tail}")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MessageMetadata;
    use prism_core::config::VectorConfig;
    use prism_core::{Message, MessageContent, MessageId, Role};
    use prism_vector::VectorStore;

    fn test_config() -> MemoryConfig {
        MemoryConfig {
            min_relevance_probability: 0.1,
            ..MemoryConfig::default()
        }
    }

    async fn manager() -> BayesianMemoryManager {
        let store = Arc::new(VectorStore::connect(&VectorConfig::default()).await.unwrap());
        let metadata = Arc::new(MetadataStore::new());
        let vectorizer = Arc::new(HistoryVectorizer::new(store, metadata));
        BayesianMemoryManager::new(vectorizer, test_config()).unwrap()
    }

    fn candidate(
        id: u64,
        content: &str,
        similarity: f32,
        age_hours: f64,
        now_ms: i64,
    ) -> SimilarMessage {
        SimilarMessage {
            message_id: MessageId(id),
            content: content.to_string(),
            similarity,
            role: Some("user".into()),
            tokens: prism_core::types::estimate_tokens(content),
            created_at: now_ms - (age_hours * 3_600_000.0) as i64,
            metadata: MessageMetadata {
                entities: vectorizer::extract_entities(content),
                topics: vectorizer::extract_topics(content),
                ..MessageMetadata::default()
            },
        }
    }

    #[tokio::test]
    async fn ranking_prefers_on_topic_history() {
        let mgr = manager().await;
        let now = chrono::Utc::now().timestamp_millis();
        let query = "What did we discuss about machine learning?";
        let analysis = QueryAnalysis {
            text: query.into(),
            embedding: Vec::new(),
            entities: vectorizer::extract_entities(query),
            topics: vectorizer::extract_topics(query),
            intent: vectorizer::detect_intent(query),
            temporal: None,
        };

        let candidates = vec![
            candidate(1, "I want to learn machine learning", 0.8, 2.0, now),
            candidate(2, "Explain neural networks", 0.7, 1.5, now),
            candidate(3, "What's for lunch?", 0.2, 0.5, now),
        ];

        let chat = ChatId::from("c1");
        let result = mgr.select(&candidates, &analysis, now, Language::En, &chat);

        let ids: Vec<u64> = result.selected.iter().map(|s| s.message_id.0).collect();
        assert!(ids.contains(&1));
        assert!(ids.contains(&2));

        // The lunch message is either filtered out or ranked last, always
        // below 0.5.
        if let Some(lunch) = result.selected.iter().find(|s| s.message_id.0 == 3) {
            assert_eq!(lunch.rank, result.selected.len());
            assert!(lunch.probability < 0.5);
        }
        // On-topic messages outrank it regardless.
        let p1 = result.selected.iter().find(|s| s.message_id.0 == 1).unwrap();
        assert!(p1.rank <= 2);
    }

    #[tokio::test]
    async fn probabilities_and_confidence_stay_bounded() {
        let mgr = manager().await;
        let now = chrono::Utc::now().timestamp_millis();
        let analysis = QueryAnalysis {
            text: "anything".into(),
            embedding: Vec::new(),
            entities: Vec::new(),
            topics: Vec::new(),
            intent: QueryIntent::NewTopic,
            temporal: None,
        };

        // Extreme inputs: perfect similarity, marked, heavily referenced.
        let mut extreme = candidate(1, "VERY IMPORTANT: pay $9,999 to Anna Nguyen", 1.0, 0.0, now);
        extreme.metadata.user_marked = true;
        extreme.metadata.times_referenced = 100;
        extreme.metadata.importance = 1.0;
        extreme.tokens = 100_000;

        let chat = ChatId::from("c1");
        let result = mgr.select(&[extreme], &analysis, now, Language::En, &chat);
        let s = &result.selected[0];
        assert!((0.0..=1.0).contains(&s.probability));
        assert!((0.0..=1.0).contains(&s.confidence));
    }

    #[tokio::test]
    async fn sorted_descending_with_one_based_ranks() {
        let mgr = manager().await;
        let now = chrono::Utc::now().timestamp_millis();
        let analysis = QueryAnalysis {
            text: "machine learning progress".into(),
            embedding: Vec::new(),
            entities: Vec::new(),
            topics: vec!["technology".into()],
            intent: QueryIntent::Question,
            temporal: None,
        };

        let candidates: Vec<SimilarMessage> = (0..6)
            .map(|i| candidate(i, "notes about machine learning", 0.2 + 0.1 * i as f32, 1.0, now))
            .collect();

        let chat = ChatId::from("c1");
        let result = mgr.select(&candidates, &analysis, now, Language::En, &chat);

        assert!(result.selected.len() <= mgr.config.top_k);
        for pair in result.selected.windows(2) {
            assert!(pair[0].probability >= pair[1].probability);
        }
        for (i, s) in result.selected.iter().enumerate() {
            assert_eq!(s.rank, i + 1);
        }
    }

    #[tokio::test]
    async fn vector_failure_degrades_to_empty_selection() {
        // An AnnService store pointed at a dead endpoint fails connect, so
        // exercise the degraded path through an empty in-memory index: the
        // manager still answers with a note instead of an error.
        let mgr = manager().await;
        let result = mgr.analyze(&ChatId::from("missing"), "what did we say?").await;
        assert!(result.selected.is_empty());
        assert!(!result.context_note.is_empty());
    }

    #[tokio::test]
    async fn strong_selection_increments_references() {
        let store = Arc::new(VectorStore::connect(&VectorConfig::default()).await.unwrap());
        let metadata = Arc::new(MetadataStore::new());
        let vectorizer = Arc::new(HistoryVectorizer::new(Arc::clone(&store), Arc::clone(&metadata)));
        let mgr = BayesianMemoryManager::new(Arc::clone(&vectorizer), test_config()).unwrap();

        let chat = ChatId::from("c1");
        let msg = Message::new(
            chat.clone(),
            MessageId(1),
            Role::User,
            MessageContent::from("remember to check the machine learning metrics"),
        );
        vectorizer.vectorize_message(&msg).await.unwrap();

        // Identical query text embeds identically, giving semantic ~1.0,
        // fresh timestamp, matching topic. Mark it so the posterior clears
        // the strong-reference threshold.
        metadata.set_user_marked(&chat, MessageId(1), true);
        let before = metadata.get(&chat, MessageId(1)).unwrap().times_referenced;

        let result = mgr
            .analyze(&chat, "remember to check the machine learning metrics")
            .await;
        let after = metadata.get(&chat, MessageId(1)).unwrap().times_referenced;

        if result
            .selected
            .iter()
            .any(|s| s.probability > STRONG_REFERENCE_THRESHOLD)
        {
            assert_eq!(after, before + 1);
        } else {
            assert_eq!(after, before);
        }
    }

    #[test]
    fn notes_are_localized() {
        let stats = SelectionStats {
            candidates: 4,
            selected: 2,
            average_probability: 0.41,
        };
        let en = render_note(&stats, QueryIntent::Question, Language::En);
        assert!(en.contains("Selected 2 of 4"));
        let vi = render_note(&stats, QueryIntent::Question, Language::Vi);
        assert!(vi.contains("Đã chọn 2 trong 4"));
    }
}
