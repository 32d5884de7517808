//! Mail provider contract consumed by the ingestion pipeline.
//!
//! Adapters own everything protocol-shaped: OAuth token refresh, HTTP,
//! retry with backoff on transient statuses, and mapping provider error
//! payloads onto [`ProviderError`] kinds. The coordinator only sees this
//! trait, which mirrors the message-list / message-detail / history-page
//! surface of Gmail-style APIs.
//!
//! The `q` grammar an adapter must support is minimal:
//! `after:YYYY/MM/DD before:YYYY/MM/DD`.

use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

/// Base delay for adapter retry backoff.
pub const RETRY_BASE_DELAY_MS: u64 = 1000;
/// Multiplier applied per retry.
pub const RETRY_FACTOR: u32 = 2;
/// Maximum retry attempts after the initial call.
pub const MAX_RETRIES: u32 = 3;

/// Errors surfaced by provider adapters.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Authentication failed and could not be refreshed.
    #[error("provider authentication failed: {0}")]
    Auth(String),
    /// The history cursor is no longer valid; callers fall back to a full
    /// walk.
    #[error("history cursor expired")]
    CursorExpired,
    /// Retryable upstream failure (429/500/503). Adapters retry internally;
    /// this surfaces once retries are exhausted.
    #[error("transient provider error (status {status}): {message}")]
    Transient { status: u16, message: String },
    /// The requested message does not exist.
    #[error("message {0} not found")]
    NotFound(String),
    /// Anything else.
    #[error("provider error: {0}")]
    Other(String),
}

impl ProviderError {
    /// Whether an adapter should retry the call.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Transient {
                status: 429 | 500 | 503,
                ..
            }
        )
    }
}

/// Parameters for [`MailProvider::list_messages`].
#[derive(Debug, Clone, Default)]
pub struct ListMessagesParams {
    pub page_token: Option<String>,
    pub max_results: Option<u32>,
    pub q: Option<String>,
}

/// Reference to a message in a listing or history page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageRef {
    pub id: String,
    pub thread_id: String,
}

/// One page of a message listing.
#[derive(Debug, Clone, Default)]
pub struct MessagePage {
    pub messages: Vec<MessageRef>,
    pub next_page_token: Option<String>,
    pub result_size_estimate: Option<u64>,
}

/// The header subset the pipeline consumes.
#[derive(Debug, Clone, Default)]
pub struct MessageHeaders {
    pub from: Option<String>,
    pub to: Option<String>,
    pub cc: Option<String>,
    pub date: Option<String>,
}

/// A fully fetched message.
#[derive(Debug, Clone)]
pub struct ProviderMessage {
    pub id: String,
    pub thread_id: String,
    pub headers: MessageHeaders,
    /// Provider-recorded receipt time, milliseconds since the epoch.
    /// Fallback when the `Date` header is missing or unparseable.
    pub internal_timestamp_ms: i64,
}

/// Parameters for [`MailProvider::get_history`].
#[derive(Debug, Clone)]
pub struct HistoryParams {
    pub start_cursor: String,
    pub page_token: Option<String>,
}

/// One history record; only message additions matter to ingestion.
#[derive(Debug, Clone, Default)]
pub struct HistoryEntry {
    pub id: String,
    pub messages_added: Vec<MessageRef>,
}

/// One page of mailbox history.
#[derive(Debug, Clone)]
pub struct HistoryPage {
    pub history: Vec<HistoryEntry>,
    /// Cursor to persist once the page set is applied.
    pub history_id: String,
    pub next_page_token: Option<String>,
}

/// Account profile: the owner address and the current history cursor.
#[derive(Debug, Clone)]
pub struct Profile {
    pub history_id: String,
    pub email_address: String,
}

/// The surface the ingestion core consumes.
#[async_trait]
pub trait MailProvider: Send + Sync {
    async fn list_messages(&self, params: ListMessagesParams)
        -> Result<MessagePage, ProviderError>;

    async fn get_message(&self, id: &str) -> Result<ProviderMessage, ProviderError>;

    /// Fetch several messages; adapters may fan out in parallel.
    async fn batch_get_messages(
        &self,
        ids: &[String],
    ) -> Result<Vec<ProviderMessage>, ProviderError>;

    async fn get_history(&self, params: HistoryParams) -> Result<HistoryPage, ProviderError>;

    async fn get_profile(&self) -> Result<Profile, ProviderError>;
}

/// Capped exponential backoff loop for adapter implementations:
/// 1000 ms base, doubling, at most three retries, only on retryable errors.
pub async fn retry_with_backoff<T, F, Fut>(operation: &str, mut call: F) -> Result<T, ProviderError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    let mut delay = Duration::from_millis(RETRY_BASE_DELAY_MS);
    let mut attempt = 0;

    loop {
        match call().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt < MAX_RETRIES => {
                attempt += 1;
                log::warn!(
                    "{}: transient failure (attempt {}/{}), retrying in {:?}: {}",
                    operation,
                    attempt,
                    MAX_RETRIES,
                    delay,
                    err
                );
                tokio::time::sleep(delay).await;
                delay *= RETRY_FACTOR;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn retries_transient_errors_then_succeeds() {
        let calls = AtomicU32::new(0);

        let result = retry_with_backoff("test", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(ProviderError::Transient {
                        status: 503,
                        message: "unavailable".to_string(),
                    })
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_retries() {
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = retry_with_backoff("test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Err(ProviderError::Transient {
                    status: 429,
                    message: "rate limited".to_string(),
                })
            }
        })
        .await;

        assert!(matches!(
            result,
            Err(ProviderError::Transient { status: 429, .. })
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 1 + MAX_RETRIES);
    }

    #[tokio::test]
    async fn does_not_retry_cursor_expiry() {
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = retry_with_backoff("test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(ProviderError::CursorExpired) }
        })
        .await;

        assert!(matches!(result, Err(ProviderError::CursorExpired)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
