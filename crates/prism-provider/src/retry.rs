//! Retry policy over the normalized error taxonomy.
//!
//! Rate limits get exactly one scheduled retry after the backend's hint.
//! Overload and transient failures get capped exponential backoff. Nothing
//! else is retried.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use prism_core::ErrorKind;

use crate::error::{ProviderError, Result};
use crate::provider::ChatProvider;
use crate::stream::StreamEvent;
use crate::types::{ChatRequest, ChatResponse};

/// Fallback delay when a rate-limit error has no retry-after hint.
const DEFAULT_RATE_LIMIT_DELAY_SECS: u64 = 5;
/// Total attempts for overloaded/transient failures (initial + retries).
const MAX_BACKOFF_ATTEMPTS: u32 = 3;
const BACKOFF_BASE_MS: u64 = 500;

/// Generate with the standard retry policy applied.
pub async fn generate_with_retry(
    provider: &dyn ChatProvider,
    req: &ChatRequest,
) -> Result<ChatResponse> {
    let mut backoff_attempt = 0u32;

    loop {
        let err = match provider.generate(req).await {
            Ok(resp) => {
                if backoff_attempt > 0 {
                    info!(provider = provider.name(), attempt = backoff_attempt, "request succeeded after retry");
                }
                return Ok(resp);
            }
            Err(e) => e,
        };

        match err.kind() {
            ErrorKind::RateLimit if backoff_attempt == 0 => {
                // Single scheduled retry after the hint; a second rate limit
                // surfaces as-is.
                let delay = err.retry_after_secs().unwrap_or(DEFAULT_RATE_LIMIT_DELAY_SECS);
                warn!(provider = provider.name(), delay_secs = delay, "rate limited, scheduling one retry");
                tokio::time::sleep(Duration::from_secs(delay)).await;
                return provider.generate(req).await;
            }
            ErrorKind::Overloaded | ErrorKind::Transient
                if backoff_attempt + 1 < MAX_BACKOFF_ATTEMPTS =>
            {
                let delay = BACKOFF_BASE_MS * 2u64.pow(backoff_attempt);
                warn!(
                    provider = provider.name(),
                    attempt = backoff_attempt,
                    delay_ms = delay,
                    err = %err,
                    "transient failure, backing off"
                );
                tokio::time::sleep(Duration::from_millis(delay)).await;
                backoff_attempt += 1;
            }
            _ => return Err(err),
        }
    }
}

/// Stream with the same policy. Only connection-level failures are retried:
/// once events have been emitted a failure is terminal for that stream (the
/// adapter reports it as an `Error` event, and this function returns `Ok`).
pub async fn stream_with_retry(
    provider: &dyn ChatProvider,
    req: &ChatRequest,
    tx: mpsc::Sender<StreamEvent>,
    cancel: CancellationToken,
) -> Result<()> {
    let mut backoff_attempt = 0u32;

    loop {
        let err = match provider.stream(req, tx.clone(), cancel.clone()).await {
            Ok(()) => return Ok(()),
            Err(ProviderError::Cancelled) => return Err(ProviderError::Cancelled),
            Err(e) => e,
        };

        match err.kind() {
            ErrorKind::RateLimit if backoff_attempt == 0 => {
                let delay = err.retry_after_secs().unwrap_or(DEFAULT_RATE_LIMIT_DELAY_SECS);
                warn!(provider = provider.name(), delay_secs = delay, "rate limited, scheduling one stream retry");
                tokio::time::sleep(Duration::from_secs(delay)).await;
                return provider.stream(req, tx, cancel).await;
            }
            ErrorKind::Overloaded | ErrorKind::Transient
                if backoff_attempt + 1 < MAX_BACKOFF_ATTEMPTS =>
            {
                let delay = BACKOFF_BASE_MS * 2u64.pow(backoff_attempt);
                warn!(provider = provider.name(), delay_ms = delay, err = %err, "stream failed, backing off");
                tokio::time::sleep(Duration::from_millis(delay)).await;
                backoff_attempt += 1;
            }
            _ => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ChatMessage, ProviderDefaults, StopReason, Usage};
    use async_trait::async_trait;
    use prism_core::config::ProviderKind;
    use prism_core::Role;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails `failures` times with the given error factory, then succeeds.
    struct FlakyProvider<F: Fn() -> ProviderError + Send + Sync> {
        calls: AtomicU32,
        failures: u32,
        make_error: F,
    }

    #[async_trait]
    impl<F: Fn() -> ProviderError + Send + Sync> ChatProvider for FlakyProvider<F> {
        fn name(&self) -> &str {
            "flaky"
        }
        fn kind(&self) -> ProviderKind {
            ProviderKind::Anthropic
        }
        fn is_configured(&self) -> bool {
            true
        }
        fn supported_models(&self) -> &[&str] {
            &["test-model"]
        }
        fn default_config(&self) -> ProviderDefaults {
            ProviderDefaults {
                model: "test-model".into(),
                max_tokens: 64,
            }
        }
        async fn generate(&self, req: &ChatRequest) -> Result<ChatResponse> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                Err((self.make_error)())
            } else {
                Ok(ChatResponse {
                    text: "ok".into(),
                    tool_calls: Vec::new(),
                    stop_reason: StopReason::EndTurn,
                    model: req.model.clone(),
                    usage: Usage::default(),
                    raw: serde_json::Value::Null,
                })
            }
        }
    }

    fn request() -> ChatRequest {
        ChatRequest::new("test-model", vec![ChatMessage::text(Role::User, "hello")])
    }

    fn rate_limit() -> ProviderError {
        ProviderError::RateLimited {
            retry_after_secs: Some(2),
            message: "slow down".into(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_retries_once_after_hint() {
        let provider = FlakyProvider {
            calls: AtomicU32::new(0),
            failures: 1,
            make_error: rate_limit,
        };

        let started = tokio::time::Instant::now();
        let resp = generate_with_retry(&provider, &request()).await.unwrap();
        assert_eq!(resp.text, "ok");
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
        // The retry waited for the hinted two seconds.
        assert!(started.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn second_rate_limit_surfaces_with_hint() {
        let provider = FlakyProvider {
            calls: AtomicU32::new(0),
            failures: 10,
            make_error: rate_limit,
        };

        let err = generate_with_retry(&provider, &request()).await.unwrap_err();
        // Exactly one retry happened.
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
        assert_eq!(err.kind(), ErrorKind::RateLimit);
        assert_eq!(err.retry_after_secs(), Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_back_off_then_succeed() {
        let provider = FlakyProvider {
            calls: AtomicU32::new(0),
            failures: 2,
            make_error: || ProviderError::Transient {
                status: 503,
                message: "blip".into(),
            },
        };

        let resp = generate_with_retry(&provider, &request()).await.unwrap();
        assert_eq!(resp.text, "ok");
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_is_capped() {
        let provider = FlakyProvider {
            calls: AtomicU32::new(0),
            failures: 100,
            make_error: || ProviderError::Overloaded {
                status: 529,
                message: "busy".into(),
            },
        };

        let err = generate_with_retry(&provider, &request()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Overloaded);
        assert_eq!(
            provider.calls.load(Ordering::SeqCst),
            MAX_BACKOFF_ATTEMPTS
        );
    }

    #[tokio::test]
    async fn non_retryable_errors_surface_immediately() {
        let provider = FlakyProvider {
            calls: AtomicU32::new(0),
            failures: 100,
            make_error: || ProviderError::Auth {
                status: 401,
                message: "bad key".into(),
            },
        };

        let err = generate_with_retry(&provider, &request()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Authentication);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }
}
