//! Transport boundary: what the coordinator and scheduler need from the chat
//! backend, plus the shared error taxonomy. The only real implementation is
//! the Telegram Bot API adapter in [`telegram`]; tests substitute their own.

pub mod telegram;

use crate::markup::InlineKeyboardMarkup;
use crate::shared::models::UserProfile;
use async_trait::async_trait;
use log::warn;
use std::future::Future;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Thread/chat/message is gone or already closed. Benign at tolerant
    /// call sites; state should be reconciled, not retried.
    #[error("not found or already closed: {0}")]
    NotFound(String),
    #[error("rate limited, retry after {0}s")]
    RateLimited(u64),
    #[error("transport api error: {0}")]
    Api(String),
    #[error("transport http error: {0}")]
    Http(#[from] reqwest::Error),
}

impl TransportError {
    pub fn is_benign(&self) -> bool {
        matches!(self, TransportError::NotFound(_))
    }

    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            TransportError::RateLimited(_) | TransportError::Http(_)
        )
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct BotCommand {
    pub command: String,
    pub description: String,
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Create a discussion thread in a forum-style chat, returning its id.
    async fn create_thread(&self, chat_id: i64, title: &str) -> Result<i64, TransportError>;

    async fn send_message(
        &self,
        chat_id: i64,
        thread_id: Option<i64>,
        html: &str,
        buttons: Option<InlineKeyboardMarkup>,
    ) -> Result<i64, TransportError>;

    async fn send_sticker(
        &self,
        chat_id: i64,
        thread_id: Option<i64>,
        file_id: &str,
    ) -> Result<i64, TransportError>;

    async fn send_photo(
        &self,
        chat_id: i64,
        thread_id: Option<i64>,
        file_id: &str,
        caption_html: Option<&str>,
    ) -> Result<i64, TransportError>;

    async fn send_animation(
        &self,
        chat_id: i64,
        thread_id: Option<i64>,
        file_id: &str,
    ) -> Result<i64, TransportError>;

    async fn edit_message(
        &self,
        chat_id: i64,
        message_id: i64,
        html: &str,
        buttons: Option<InlineKeyboardMarkup>,
    ) -> Result<(), TransportError>;

    async fn rename_thread(
        &self,
        chat_id: i64,
        thread_id: i64,
        title: &str,
    ) -> Result<(), TransportError>;

    async fn close_thread(&self, chat_id: i64, thread_id: i64) -> Result<(), TransportError>;

    async fn reopen_thread(&self, chat_id: i64, thread_id: i64) -> Result<(), TransportError>;

    /// Copy an existing message into another chat/thread; used to replay a
    /// ticket's history into a freshly created technical thread.
    async fn copy_message(
        &self,
        from_chat_id: i64,
        message_id: i64,
        to_chat_id: i64,
        to_thread_id: Option<i64>,
    ) -> Result<i64, TransportError>;

    async fn answer_callback(
        &self,
        callback_id: &str,
        text: Option<&str>,
    ) -> Result<(), TransportError>;

    async fn set_commands(
        &self,
        commands: &[BotCommand],
        language_code: Option<&str>,
        chat_id: Option<i64>,
    ) -> Result<(), TransportError>;

    /// Look up a user's profile on the transport side (name, username).
    async fn chat_profile(&self, user_id: i64) -> Result<UserProfile, TransportError>;
}

/// Retry a transport call on transient failures with doubling backoff.
/// Rate-limit responses wait out the server-provided delay instead.
pub async fn with_backoff<T, F, Fut>(mut op: F, attempts: u32) -> Result<T, TransportError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, TransportError>>,
{
    let mut delay = Duration::from_millis(500);
    let mut tries = 0u32;
    loop {
        match op().await {
            Err(TransportError::RateLimited(secs)) if tries + 1 < attempts => {
                warn!("Rate limited, sleeping {}s before retry", secs);
                tokio::time::sleep(Duration::from_secs(secs.max(1))).await;
            }
            Err(err) if err.is_transient() && tries + 1 < attempts => {
                warn!("Transient transport error, retrying: {}", err);
                tokio::time::sleep(delay).await;
                delay *= 2;
            }
            other => return other,
        }
        tries += 1;
    }
}
