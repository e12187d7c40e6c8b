//! The chat turn pipeline.
//!
//! submit_turn runs: safety validate + sanitize, context assembly, provider
//! stream (with retry policy), assistant-output safety, store + index, and
//! forwards the provider's typed events to the caller. Event order is
//! preserved end to end; a failure mid-stream surfaces as a terminal error
//! event on the same stream.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use prism_context::window::ContextWindow;
use prism_core::{lang, ChatId, Language, MessageContent, MessageId, OwnerId, PersonaId, Role};
use prism_provider::{
    stream_with_retry, ChatMessage, ChatRequest, ProviderError, StreamEvent, ToolDefinition,
};
use prism_tools::ToolError;

use crate::app::AppState;
use crate::error::{GatewayError, Result};

/// Bounded event queue between producer and consumer; a slow consumer
/// blocks the provider stream.
const STREAM_BUFFER: usize = 64;
/// Overall turn deadline; external calls inherit it via cancellation.
const TURN_DEADLINE_SECS: u64 = 120;

/// Create a new conversation and return its id.
pub fn create_chat(
    state: &AppState,
    owner: OwnerId,
    title: String,
    persona: Option<PersonaId>,
) -> Result<ChatId> {
    let chat_id = ChatId::new();
    state
        .engine
        .create_conversation(chat_id.clone(), owner, title, persona)?;
    info!(chat = %chat_id, "conversation created");
    Ok(chat_id)
}

pub fn mark_message_important(
    state: &AppState,
    chat_id: &ChatId,
    message_id: MessageId,
    marked: bool,
) -> Result<()> {
    state
        .engine
        .mark_message_important(chat_id, message_id, marked)?;
    Ok(())
}

pub fn add_key_fact(
    state: &AppState,
    chat_id: &ChatId,
    text: String,
    kind: prism_context::FactKind,
    source: Option<MessageId>,
) -> Result<()> {
    state.engine.add_key_fact(chat_id, text, kind, source)?;
    Ok(())
}

pub fn list_conversations(state: &AppState) -> Vec<prism_context::ConversationInfo> {
    state.engine.list_conversations()
}

pub async fn delete_conversation(state: &AppState, chat_id: &ChatId) -> Result<()> {
    state.engine.delete_conversation(chat_id).await?;
    Ok(())
}

/// Cancel the active stream for a chat, if any.
pub fn cancel_turn(state: &AppState, chat_id: &ChatId) {
    if let Some((_, token)) = state.active_turns.remove(&chat_id.0) {
        token.cancel();
    }
}

/// Submit a user turn and stream the response events.
///
/// An optional persona replaces the conversation's current one; tool
/// schemas not yet registered are added (re-submitting a known schema is a
/// no-op, since registration is one-shot per process).
///
/// Validation failures are returned before any streaming starts; once the
/// receiver is handed back, failures arrive as terminal `Error` events.
pub async fn submit_turn(
    state: &Arc<AppState>,
    chat_id: &ChatId,
    text: &str,
    persona: Option<PersonaId>,
    tool_schemas: Vec<ToolDefinition>,
) -> Result<mpsc::Receiver<StreamEvent>> {
    for schema in tool_schemas {
        match state.tools.register(schema) {
            Ok(()) | Err(ToolError::AlreadyRegistered(_)) => {}
            Err(e) => return Err(e.into()),
        }
    }
    if persona.is_some() {
        state.engine.set_persona(chat_id, persona)?;
    }

    let language = lang::detect(text);

    // Inbound safety, then sanitation.
    state.safety.validate_content(text).await?;
    let sanitized = state.safety.sanitize_content(text);

    let provider = state.provider()?;
    state
        .engine
        .add_message(chat_id, Role::User, MessageContent::Text(sanitized.clone()), None)?;

    let window = state.engine.get_optimized_context(chat_id, Some(&sanitized)).await?;
    debug!(chat = %chat_id, explanation = %window.explanation, "context window assembled");

    let request = build_request(state, &window);

    let cancel = CancellationToken::new();
    state
        .active_turns
        .insert(chat_id.0.clone(), cancel.clone());

    let (provider_tx, provider_rx) = mpsc::channel(STREAM_BUFFER);
    let (out_tx, out_rx) = mpsc::channel(STREAM_BUFFER);

    // Producer: the provider stream with the retry policy applied.
    // Connection-level failures become a terminal error event.
    let producer_provider = Arc::clone(&provider);
    let producer_cancel = cancel.clone();
    tokio::spawn(async move {
        let result = stream_with_retry(
            producer_provider.as_ref(),
            &request,
            provider_tx.clone(),
            producer_cancel,
        )
        .await;
        match result {
            Ok(()) => {}
            Err(ProviderError::Cancelled) => {
                debug!("turn stream cancelled");
            }
            Err(e) => {
                let _ = provider_tx
                    .send(StreamEvent::Error {
                        kind: e.kind(),
                        message: e.to_string(),
                        retry_after_secs: e.retry_after_secs(),
                    })
                    .await;
            }
        }
    });

    // Forwarder: enrich tool calls, run outbound safety, persist the
    // assistant turn, and relay events in order.
    let forward_state = Arc::clone(state);
    let forward_chat = chat_id.clone();
    tokio::spawn(async move {
        forward_events(
            forward_state,
            forward_chat,
            language,
            provider_rx,
            out_tx,
            cancel,
        )
        .await;
    });

    Ok(out_rx)
}

/// Build the provider request from an assembled window.
///
/// Key facts, summaries and the context note form the system preamble;
/// Bayesian picks precede the recent messages in the turn stream.
fn build_request(state: &AppState, window: &ContextWindow) -> ChatRequest {
    let mut system = String::new();
    if !window.key_facts.is_empty() {
        system.push_str("Known facts about this conversation:\n");
        for fact in &window.key_facts {
            system.push_str(&format!("- {}\n", fact.formatted()));
        }
        system.push('\n');
    }
    if !window.summaries.is_empty() {
        system.push_str("Summary of earlier conversation:\n");
        for summary in &window.summaries {
            system.push_str(&format!("- {}\n", summary.text));
        }
        system.push('\n');
    }
    if !window.explanation.is_empty() {
        system.push_str(&window.explanation);
    }

    let mut messages: Vec<ChatMessage> = Vec::new();
    // Selected history reads chronologically, oldest first.
    let mut picks = window.selected_history.clone();
    picks.sort_by_key(|p| p.message_id);
    for pick in &picks {
        let role = match pick.role.as_deref() {
            Some("assistant") => Role::Assistant,
            _ => Role::User,
        };
        messages.push(ChatMessage::text(role, pick.content.clone()));
    }
    for msg in &window.recent {
        messages.push(ChatMessage {
            role: msg.role,
            content: msg.content.clone(),
        });
    }

    let settings = state.provider_settings();
    let defaults = state
        .provider()
        .map(|p| p.default_config())
        .unwrap_or(prism_provider::ProviderDefaults {
            model: String::new(),
            max_tokens: 4096,
        });

    let mut request = ChatRequest::new(
        settings
            .as_ref()
            .and_then(|s| s.model.clone())
            .unwrap_or(defaults.model),
        messages,
    );
    request.max_tokens = settings
        .as_ref()
        .and_then(|s| s.max_tokens)
        .unwrap_or(defaults.max_tokens);
    request.temperature = settings.as_ref().and_then(|s| s.temperature);
    request.system = if system.is_empty() {
        None
    } else {
        Some(system)
    };
    request.tools = state.tools.definitions();
    request
}

async fn forward_events(
    state: Arc<AppState>,
    chat_id: ChatId,
    language: Language,
    mut provider_rx: mpsc::Receiver<StreamEvent>,
    out_tx: mpsc::Sender<StreamEvent>,
    cancel: CancellationToken,
) {
    let deadline = tokio::time::Duration::from_secs(TURN_DEADLINE_SECS);
    let mut assistant_text = String::new();

    let run = async {
        while let Some(event) = provider_rx.recv().await {
            let forwarded = match event {
                StreamEvent::ContentChunk { text } => {
                    assistant_text.push_str(&text);
                    StreamEvent::ContentChunk { text }
                }
                StreamEvent::ToolStart { id, name, input } => {
                    // Fill missing arguments from registered schema defaults.
                    let call = prism_provider::ToolCall {
                        id: id.clone(),
                        name: name.clone(),
                        input,
                    };
                    let enriched = state.tools.enrich_arguments(&call).unwrap_or(call);
                    StreamEvent::ToolStart {
                        id: enriched.id,
                        name: enriched.name,
                        input: enriched.input,
                    }
                }
                StreamEvent::Stop { stop_reason, model, usage } => {
                    // Outbound safety, then persistence.
                    if !assistant_text.is_empty() {
                        if let Err(e) = state
                            .safety
                            .validate_response(&assistant_text, language)
                            .await
                        {
                            warn!(chat = %chat_id, err = %e, "assistant output failed safety");
                            let public = GatewayError::from(e).to_public(language);
                            let _ = out_tx
                                .send(StreamEvent::Error {
                                    kind: public.kind,
                                    message: public.message,
                                    retry_after_secs: None,
                                })
                                .await;
                            return;
                        }
                        let model_version = if model.is_empty() {
                            None
                        } else {
                            Some(model.clone())
                        };
                        match state.engine.add_assistant_message(
                            &chat_id,
                            MessageContent::Text(assistant_text.clone()),
                            model_version,
                        ) {
                            Ok(msg) => debug!(chat = %chat_id, id = %msg.id, "assistant turn stored"),
                            Err(e) => warn!(chat = %chat_id, err = %e, "failed to store assistant turn"),
                        }
                    }
                    let _ = out_tx
                        .send(StreamEvent::Stop { stop_reason, model, usage })
                        .await;
                    return;
                }
                StreamEvent::Error { kind, message, retry_after_secs } => {
                    let _ = out_tx
                        .send(StreamEvent::Error { kind, message, retry_after_secs })
                        .await;
                    return;
                }
                other => other,
            };
            if out_tx.send(forwarded).await.is_err() {
                // Consumer went away; stop the provider too.
                cancel.cancel();
                return;
            }
        }
    };

    if tokio::time::timeout(deadline, run).await.is_err() {
        cancel.cancel();
        let _ = out_tx
            .send(StreamEvent::Error {
                kind: prism_core::ErrorKind::Transient,
                message: format!("turn deadline of {TURN_DEADLINE_SECS}s exceeded"),
                retry_after_secs: None,
            })
            .await;
    }

    state.active_turns.remove(&chat_id.0);
}
