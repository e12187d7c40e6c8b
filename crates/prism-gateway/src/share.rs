//! Conversation publishing.
//!
//! Publishing serializes a finished conversation into the shared cache
//! under a fresh share id. Fetching bumps the view counter by exactly one.
//! Unsharing is owner-only when the share was published with an owner.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use prism_cache::{SharedConversation, SharedMessage};
use prism_core::{OwnerId, ShareId};

use crate::app::AppState;
use crate::error::{GatewayError, Result};

const SECS_PER_DAY: u64 = 86_400;

#[derive(Debug, Clone, Deserialize)]
pub struct PublishRequest {
    pub title: String,
    pub messages: Vec<SharedMessage>,
    pub expires_in_days: Option<u32>,
    pub owner_id: Option<OwnerId>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ShareOutcome {
    pub share_id: ShareId,
    pub share_url: String,
}

/// Publish a conversation. Payloads above the configured cap are rejected.
pub fn publish(state: &AppState, request: PublishRequest) -> Result<ShareOutcome> {
    let now = chrono::Utc::now().timestamp_millis();
    let ttl_days = request.expires_in_days.map(u64::from).or_else(|| {
        state.config.share.default_ttl_days.map(u64::from)
    });
    let ttl_secs = ttl_days.map(|d| d * SECS_PER_DAY);

    let conversation = SharedConversation {
        title: request.title,
        messages: request.messages,
        created_at: now,
        view_count: 0,
        expires_at: ttl_secs.map(|s| now + (s as i64) * 1000),
        owner_id: request.owner_id,
    };

    // Size gate on the serialized payload.
    let size = serde_json::to_string(&conversation)
        .map(|s| s.len())
        .unwrap_or(usize::MAX);
    let max = state.config.share.max_payload_bytes;
    if size > max {
        return Err(GatewayError::PayloadTooLarge { size, max });
    }

    let share_id = ShareId::new();
    state.cache.set(share_id.as_str(), conversation, ttl_secs);

    let share_url = format!(
        "{}/{}",
        state.config.share.base_url.trim_end_matches('/'),
        share_id
    );
    info!(share = %share_id, bytes = size, "conversation published");
    Ok(ShareOutcome { share_id, share_url })
}

/// Fetch a shared conversation; each fetch counts exactly one view.
pub fn fetch(state: &AppState, share_id: &ShareId) -> Result<SharedConversation> {
    let mut conversation = state
        .cache
        .get(share_id.as_str())
        .ok_or_else(|| GatewayError::ShareNotFound(share_id.0.clone()))?;

    if let Some(views) = state.cache.increment_views(share_id.as_str()) {
        conversation.view_count = views;
    }
    debug!(share = %share_id, views = conversation.view_count, "shared conversation fetched");
    Ok(conversation)
}

/// Remove a share. When the share carries an owner, only that owner may
/// remove it.
pub fn unshare(state: &AppState, share_id: &ShareId, caller: &OwnerId) -> Result<()> {
    let conversation = state
        .cache
        .get(share_id.as_str())
        .ok_or_else(|| GatewayError::ShareNotFound(share_id.0.clone()))?;

    if let Some(owner) = &conversation.owner_id {
        if owner != caller {
            return Err(GatewayError::NotOwner(share_id.0.clone()));
        }
    }

    state.cache.delete(share_id.as_str());
    info!(share = %share_id, "conversation unshared");
    Ok(())
}
