//! Telegram Bot API implementation of [`Transport`].
//!
//! Everything goes through the JSON `{ok, result, description}` envelope.
//! The base URL is injectable so tests can point the client at a local
//! mock server.

use super::{BotCommand, Transport, TransportError};
use crate::markup::InlineKeyboardMarkup;
use crate::shared::models::UserProfile;
use async_trait::async_trait;
use log::debug;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "https://api.telegram.org";

pub struct TelegramApi {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

#[derive(Deserialize)]
struct ApiEnvelope<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
    error_code: Option<i64>,
    parameters: Option<ApiParameters>,
}

#[derive(Deserialize)]
struct ApiParameters {
    retry_after: Option<u64>,
}

#[derive(Deserialize)]
struct ForumTopic {
    message_thread_id: i64,
}

#[derive(Deserialize)]
struct SentMessage {
    message_id: i64,
}

#[derive(Deserialize)]
struct ChatInfo {
    #[serde(default)]
    first_name: Option<String>,
    #[serde(default)]
    last_name: Option<String>,
    #[serde(default)]
    username: Option<String>,
}

impl TelegramApi {
    pub fn new(token: &str) -> Self {
        Self::with_base_url(token, DEFAULT_BASE_URL)
    }

    pub fn with_base_url(token: &str, base_url: &str) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        }
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        body: Value,
    ) -> Result<T, TransportError> {
        let url = format!("{}/bot{}/{}", self.base_url, self.token, method);
        debug!("Telegram call: {}", method);
        let response = self.client.post(&url).json(&body).send().await?;
        let envelope: ApiEnvelope<T> = response.json().await?;
        if envelope.ok {
            return envelope
                .result
                .ok_or_else(|| TransportError::Api(format!("{}: ok without result", method)));
        }
        let description = envelope.description.unwrap_or_default();
        if envelope.error_code == Some(429) {
            let retry_after = envelope
                .parameters
                .and_then(|p| p.retry_after)
                .unwrap_or(5);
            return Err(TransportError::RateLimited(retry_after));
        }
        let lower = description.to_lowercase();
        if lower.contains("not found")
            || lower.contains("topic_closed")
            || lower.contains("topic_deleted")
            || lower.contains("chat not found")
            || lower.contains("message to edit not found")
        {
            return Err(TransportError::NotFound(description));
        }
        Err(TransportError::Api(format!("{}: {}", method, description)))
    }

    fn with_thread(mut body: Value, thread_id: Option<i64>) -> Value {
        if let Some(thread_id) = thread_id {
            body["message_thread_id"] = json!(thread_id);
        }
        body
    }
}

#[async_trait]
impl Transport for TelegramApi {
    async fn create_thread(&self, chat_id: i64, title: &str) -> Result<i64, TransportError> {
        let topic: ForumTopic = self
            .call(
                "createForumTopic",
                json!({ "chat_id": chat_id, "name": title }),
            )
            .await?;
        Ok(topic.message_thread_id)
    }

    async fn send_message(
        &self,
        chat_id: i64,
        thread_id: Option<i64>,
        html: &str,
        buttons: Option<InlineKeyboardMarkup>,
    ) -> Result<i64, TransportError> {
        let mut body = json!({
            "chat_id": chat_id,
            "text": html,
            "parse_mode": "HTML",
            "disable_web_page_preview": true,
        });
        if let Some(markup) = buttons {
            body["reply_markup"] = serde_json::to_value(markup)
                .map_err(|e| TransportError::Api(e.to_string()))?;
        }
        let sent: SentMessage = self
            .call("sendMessage", Self::with_thread(body, thread_id))
            .await?;
        Ok(sent.message_id)
    }

    async fn send_sticker(
        &self,
        chat_id: i64,
        thread_id: Option<i64>,
        file_id: &str,
    ) -> Result<i64, TransportError> {
        let body = json!({ "chat_id": chat_id, "sticker": file_id });
        let sent: SentMessage = self
            .call("sendSticker", Self::with_thread(body, thread_id))
            .await?;
        Ok(sent.message_id)
    }

    async fn send_photo(
        &self,
        chat_id: i64,
        thread_id: Option<i64>,
        file_id: &str,
        caption_html: Option<&str>,
    ) -> Result<i64, TransportError> {
        let mut body = json!({ "chat_id": chat_id, "photo": file_id });
        if let Some(caption) = caption_html {
            body["caption"] = json!(caption);
            body["parse_mode"] = json!("HTML");
        }
        let sent: SentMessage = self
            .call("sendPhoto", Self::with_thread(body, thread_id))
            .await?;
        Ok(sent.message_id)
    }

    async fn send_animation(
        &self,
        chat_id: i64,
        thread_id: Option<i64>,
        file_id: &str,
    ) -> Result<i64, TransportError> {
        let body = json!({ "chat_id": chat_id, "animation": file_id });
        let sent: SentMessage = self
            .call("sendAnimation", Self::with_thread(body, thread_id))
            .await?;
        Ok(sent.message_id)
    }

    async fn edit_message(
        &self,
        chat_id: i64,
        message_id: i64,
        html: &str,
        buttons: Option<InlineKeyboardMarkup>,
    ) -> Result<(), TransportError> {
        let mut body = json!({
            "chat_id": chat_id,
            "message_id": message_id,
            "text": html,
            "parse_mode": "HTML",
            "disable_web_page_preview": true,
        });
        if let Some(markup) = buttons {
            body["reply_markup"] = serde_json::to_value(markup)
                .map_err(|e| TransportError::Api(e.to_string()))?;
        }
        let _: Value = self.call("editMessageText", body).await?;
        Ok(())
    }

    async fn rename_thread(
        &self,
        chat_id: i64,
        thread_id: i64,
        title: &str,
    ) -> Result<(), TransportError> {
        let _: Value = self
            .call(
                "editForumTopic",
                json!({
                    "chat_id": chat_id,
                    "message_thread_id": thread_id,
                    "name": title,
                }),
            )
            .await?;
        Ok(())
    }

    async fn close_thread(&self, chat_id: i64, thread_id: i64) -> Result<(), TransportError> {
        let _: Value = self
            .call(
                "closeForumTopic",
                json!({ "chat_id": chat_id, "message_thread_id": thread_id }),
            )
            .await?;
        Ok(())
    }

    async fn reopen_thread(&self, chat_id: i64, thread_id: i64) -> Result<(), TransportError> {
        let _: Value = self
            .call(
                "reopenForumTopic",
                json!({ "chat_id": chat_id, "message_thread_id": thread_id }),
            )
            .await?;
        Ok(())
    }

    async fn copy_message(
        &self,
        from_chat_id: i64,
        message_id: i64,
        to_chat_id: i64,
        to_thread_id: Option<i64>,
    ) -> Result<i64, TransportError> {
        let body = json!({
            "chat_id": to_chat_id,
            "from_chat_id": from_chat_id,
            "message_id": message_id,
        });
        let sent: SentMessage = self
            .call("copyMessage", Self::with_thread(body, to_thread_id))
            .await?;
        Ok(sent.message_id)
    }

    async fn answer_callback(
        &self,
        callback_id: &str,
        text: Option<&str>,
    ) -> Result<(), TransportError> {
        let mut body = json!({ "callback_query_id": callback_id });
        if let Some(text) = text {
            body["text"] = json!(text);
        }
        let _: Value = self.call("answerCallbackQuery", body).await?;
        Ok(())
    }

    async fn set_commands(
        &self,
        commands: &[BotCommand],
        language_code: Option<&str>,
        chat_id: Option<i64>,
    ) -> Result<(), TransportError> {
        let mut body = json!({ "commands": commands });
        if let Some(lang) = language_code {
            body["language_code"] = json!(lang);
        }
        if let Some(chat_id) = chat_id {
            body["scope"] = json!({ "type": "chat", "chat_id": chat_id });
        }
        let _: Value = self.call("setMyCommands", body).await?;
        Ok(())
    }

    async fn chat_profile(&self, user_id: i64) -> Result<UserProfile, TransportError> {
        let info: ChatInfo = self.call("getChat", json!({ "chat_id": user_id })).await?;
        Ok(UserProfile {
            user_id,
            first_name: info.first_name.unwrap_or_else(|| format!("id{}", user_id)),
            last_name: info.last_name,
            username: info.username,
            language_code: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Server;

    #[tokio::test]
    async fn create_thread_returns_thread_id() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/bottest-token/createForumTopic")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"ok":true,"result":{"message_thread_id":77,"name":"t"}}"#)
            .create_async()
            .await;

        let api = TelegramApi::with_base_url("test-token", &server.url());
        let thread_id = api.create_thread(-100123, "t").await.unwrap();
        assert_eq!(thread_id, 77);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn rate_limit_maps_to_retry_after() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/bottest-token/sendMessage")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"ok":false,"error_code":429,"description":"Too Many Requests","parameters":{"retry_after":11}}"#,
            )
            .create_async()
            .await;

        let api = TelegramApi::with_base_url("test-token", &server.url());
        let err = api.send_message(1, None, "hi", None).await.unwrap_err();
        assert!(matches!(err, TransportError::RateLimited(11)));
    }

    #[tokio::test]
    async fn closed_topic_is_benign() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/bottest-token/reopenForumTopic")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"ok":false,"error_code":400,"description":"Bad Request: TOPIC_CLOSED"}"#)
            .create_async()
            .await;

        let api = TelegramApi::with_base_url("test-token", &server.url());
        let err = api.reopen_thread(-100123, 8).await.unwrap_err();
        assert!(err.is_benign());
    }

    #[tokio::test]
    async fn chat_profile_builds_display_name() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/bottest-token/getChat")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"ok":true,"result":{"id":5,"first_name":"Ann","last_name":"Lee","username":"ann"}}"#,
            )
            .create_async()
            .await;

        let api = TelegramApi::with_base_url("test-token", &server.url());
        let profile = api.chat_profile(5).await.unwrap();
        assert_eq!(profile.display_name(), "Ann Lee");
        assert_eq!(profile.handle(), "@ann");
    }
}
