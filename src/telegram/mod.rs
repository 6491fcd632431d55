//! Telegram webhook surface: wire structs for updates, the axum route, and
//! the dispatch into menu flow, coordinator relays and staff actions.
//!
//! The webhook always answers 200; a processing failure is logged and must
//! never make Telegram re-deliver the update into a half-applied state.

use crate::channels::BotCommand;
use crate::coordinator::ClientOutcome;
use crate::kb::{self, Topic, SUPPORTED_LANGUAGES};
use crate::markup::Annotation;
use crate::menu::{self, Callback, DialogState};
use crate::shared::models::{InboundContent, UserProfile};
use crate::shared::state::AppState;
use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::post, Json, Router};
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Deserialize, Serialize)]
pub struct TelegramUpdate {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<TelegramMessage>,
    #[serde(default)]
    pub callback_query: Option<TelegramCallbackQuery>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct TelegramMessage {
    pub message_id: i64,
    pub from: Option<TelegramUser>,
    pub chat: TelegramChat,
    pub date: i64,
    #[serde(default)]
    pub message_thread_id: Option<i64>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub entities: Vec<TelegramEntity>,
    #[serde(default)]
    pub photo: Option<Vec<TelegramPhotoSize>>,
    #[serde(default)]
    pub sticker: Option<TelegramSticker>,
    #[serde(default)]
    pub animation: Option<TelegramAnimation>,
    #[serde(default)]
    pub caption: Option<String>,
    #[serde(default)]
    pub caption_entities: Vec<TelegramEntity>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TelegramUser {
    pub id: i64,
    pub is_bot: bool,
    pub first_name: String,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub language_code: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct TelegramChat {
    pub id: i64,
    #[serde(rename = "type")]
    pub chat_type: String,
    #[serde(default)]
    pub title: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct TelegramEntity {
    #[serde(rename = "type")]
    pub kind: String,
    pub offset: usize,
    pub length: usize,
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct TelegramPhotoSize {
    pub file_id: String,
    pub file_unique_id: String,
    pub width: i32,
    pub height: i32,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct TelegramSticker {
    pub file_id: String,
    pub file_unique_id: String,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct TelegramAnimation {
    pub file_id: String,
    pub file_unique_id: String,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct TelegramCallbackQuery {
    pub id: String,
    pub from: TelegramUser,
    #[serde(default)]
    pub message: Option<TelegramMessage>,
    #[serde(default)]
    pub data: Option<String>,
}

pub fn configure() -> Router<Arc<AppState>> {
    Router::new().route("/webhook/telegram", post(handle_webhook))
}

/// Register the /start and /lang commands, localized per supported language.
pub async fn register_commands(state: &AppState) {
    for (index, lang) in SUPPORTED_LANGUAGES.iter().enumerate() {
        let messages = kb::messages(lang);
        let commands = vec![
            BotCommand {
                command: "start".into(),
                description: messages.command_start.into(),
            },
            BotCommand {
                command: "lang".into(),
                description: messages.command_lang.into(),
            },
        ];
        // First language doubles as the unscoped default.
        let scope_lang = if index == 0 { None } else { Some(*lang) };
        if let Err(err) = state.transport.set_commands(&commands, scope_lang, None).await {
            warn!("Could not register bot commands for {}: {}", lang, err);
        }
    }
}

/// Re-scope the command menu for a single chat after a language switch.
async fn refresh_chat_commands(state: &AppState, chat_id: i64, lang: &str) {
    let messages = kb::messages(lang);
    let commands = vec![
        BotCommand {
            command: "start".into(),
            description: messages.command_start.into(),
        },
        BotCommand {
            command: "lang".into(),
            description: messages.command_lang.into(),
        },
    ];
    if let Err(err) = state.transport.set_commands(&commands, None, Some(chat_id)).await {
        warn!("Could not refresh commands for chat {}: {}", chat_id, err);
    }
}

async fn handle_webhook(
    State(state): State<Arc<AppState>>,
    Json(update): Json<TelegramUpdate>,
) -> impl IntoResponse {
    debug!("Webhook update {}", update.update_id);
    if let Some(message) = update.message {
        if let Err(err) = dispatch_message(&state, message).await {
            error!("Update {} failed: {}", update.update_id, err);
        }
    } else if let Some(callback) = update.callback_query {
        if let Err(err) = dispatch_callback(&state, callback).await {
            error!("Callback in update {} failed: {}", update.update_id, err);
        }
    }
    StatusCode::OK
}

fn profile_of(user: &TelegramUser) -> UserProfile {
    UserProfile {
        user_id: user.id,
        first_name: user.first_name.clone(),
        last_name: user.last_name.clone(),
        username: user.username.clone(),
        language_code: user.language_code.clone(),
    }
}

fn annotations(entities: &[TelegramEntity]) -> Vec<Annotation> {
    entities
        .iter()
        .map(|e| Annotation {
            kind: e.kind.clone(),
            offset: e.offset,
            length: e.length,
            url: e.url.clone(),
        })
        .collect()
}

/// Map a raw message onto the closed set of relayable content kinds.
fn extract_content(message: &TelegramMessage) -> Option<InboundContent> {
    if let Some(sticker) = &message.sticker {
        return Some(InboundContent::Sticker {
            file_id: sticker.file_id.clone(),
        });
    }
    if let Some(animation) = &message.animation {
        return Some(InboundContent::Animation {
            file_id: animation.file_id.clone(),
        });
    }
    if let Some(sizes) = &message.photo {
        // Last size is the largest rendition.
        let file_id = sizes.last()?.file_id.clone();
        return Some(InboundContent::Photo {
            file_id,
            caption: message.caption.clone(),
            caption_entities: annotations(&message.caption_entities),
        });
    }
    let text = message.text.clone()?;
    Some(InboundContent::Text {
        entities: annotations(&message.entities),
        text,
    })
}

async fn dispatch_message(state: &AppState, message: TelegramMessage) -> anyhow::Result<()> {
    let from = match &message.from {
        Some(from) if !from.is_bot => from.clone(),
        _ => return Ok(()),
    };

    if message.chat.id == state.config.support_chat_id
        || Some(message.chat.id) == state.config.tech_chat_id
    {
        return handle_staff_message(state, &message, &from).await;
    }
    if message.chat.chat_type == "private" {
        return handle_private_message(state, &message, &from).await;
    }
    Ok(())
}

async fn handle_private_message(
    state: &AppState,
    message: &TelegramMessage,
    from: &TelegramUser,
) -> anyhow::Result<()> {
    let profile = profile_of(from);
    let user_id = from.id;

    match message.text.as_deref().map(str::trim) {
        Some("/start") => {
            state.clear_dialog(user_id).await;
            let lang = state
                .coordinator
                .resolve_language(user_id, from.language_code.as_deref())
                .await;
            let (text, buttons) = menu::start_screen(&lang);
            state
                .transport
                .send_message(user_id, None, &text, buttons)
                .await?;
            return Ok(());
        }
        Some("/lang") => {
            state.clear_dialog(user_id).await;
            let lang = state
                .coordinator
                .resolve_language(user_id, from.language_code.as_deref())
                .await;
            let (text, buttons) = menu::language_screen(&lang);
            state
                .transport
                .send_message(user_id, None, &text, buttons)
                .await?;
            return Ok(());
        }
        _ => {}
    }

    let content = match extract_content(message) {
        Some(content) => content,
        None => return Ok(()),
    };

    let topic = match state.dialog(user_id).await {
        Some(DialogState::AwaitingDescription(topic)) => {
            state.clear_dialog(user_id).await;
            Some(topic)
        }
        None => None,
    };

    match state
        .coordinator
        .handle_client_message(&profile, topic, &content)
        .await?
    {
        ClientOutcome::Opened | ClientOutcome::Relayed => Ok(()),
        ClientOutcome::PreviouslyClosed => {
            // The last ticket was closed; explain and put the menu back up.
            let lang = state
                .coordinator
                .resolve_language(user_id, from.language_code.as_deref())
                .await;
            let messages = kb::messages(&lang);
            state
                .transport
                .send_message(user_id, None, messages.ticket_closed_message, None)
                .await?;
            let (text, buttons) = menu::start_screen(&lang);
            state
                .transport
                .send_message(user_id, None, &text, buttons)
                .await?;
            Ok(())
        }
        ClientOutcome::NoTicket => {
            // Nothing on file and not in the description flow; just offer
            // the menu.
            let lang = state
                .coordinator
                .resolve_language(user_id, from.language_code.as_deref())
                .await;
            let (text, buttons) = menu::start_screen(&lang);
            state
                .transport
                .send_message(user_id, None, &text, buttons)
                .await?;
            Ok(())
        }
    }
}

async fn handle_staff_message(
    state: &AppState,
    message: &TelegramMessage,
    from: &TelegramUser,
) -> anyhow::Result<()> {
    let thread_id = match message.message_thread_id {
        Some(thread_id) => thread_id,
        None => {
            // General chat: only the bulk-close command lives here.
            if message.text.as_deref().map(str::trim) == Some("/closeall")
                && state.coordinator.is_support_staff(from.id)
            {
                let closed = state.coordinator.close_all().await?;
                state
                    .transport
                    .send_message(
                        message.chat.id,
                        None,
                        &format!("🔒 Закрыто обращений: {}", closed),
                        None,
                    )
                    .await?;
            }
            return Ok(());
        }
    };

    let technical = Some(message.chat.id) == state.config.tech_chat_id;

    if message.text.as_deref().map(str::trim) == Some("/close") {
        if !state.coordinator.is_support_staff(from.id) {
            state
                .transport
                .send_message(message.chat.id, Some(thread_id), "⛔ Нет доступа.", None)
                .await?;
            return Ok(());
        }
        if let Some(ticket) = state.coordinator.ticket_by_thread(thread_id, technical).await? {
            state.coordinator.close(ticket.user_id, true).await?;
        }
        return Ok(());
    }

    let content = match extract_content(message) {
        Some(content) => content,
        None => return Ok(()),
    };
    state
        .coordinator
        .handle_staff_reply(thread_id, technical, &content)
        .await?;
    Ok(())
}

async fn dispatch_callback(
    state: &AppState,
    callback: TelegramCallbackQuery,
) -> anyhow::Result<()> {
    let data = callback.data.clone().unwrap_or_default();
    let parsed = match Callback::parse(&data) {
        Some(parsed) => parsed,
        None => {
            state.transport.answer_callback(&callback.id, None).await?;
            return Ok(());
        }
    };
    let from = &callback.from;
    let message = callback.message.as_ref();

    match parsed {
        Callback::SelectLanguage(lang) => {
            state.coordinator.set_language(from.id, &lang).await?;
            let lang = state
                .coordinator
                .resolve_language(from.id, from.language_code.as_deref())
                .await;
            refresh_chat_commands(state, from.id, &lang).await;
            let (text, buttons) = menu::start_screen(&lang);
            edit_or_send(state, from.id, message, &text, buttons).await?;
            state.transport.answer_callback(&callback.id, None).await?;
        }
        Callback::SelectTopic(topic) => {
            let lang = state
                .coordinator
                .resolve_language(from.id, from.language_code.as_deref())
                .await;
            let (text, buttons) = menu::topic_screen(topic, &lang);
            edit_or_send(state, from.id, message, &text, buttons).await?;
            state.transport.answer_callback(&callback.id, None).await?;
        }
        Callback::ShowFaq(topic, index) => {
            let lang = state
                .coordinator
                .resolve_language(from.id, from.language_code.as_deref())
                .await;
            if let Some((text, buttons)) = menu::faq_screen(topic, index, &lang) {
                edit_or_send(state, from.id, message, &text, buttons).await?;
            }
            state.transport.answer_callback(&callback.id, None).await?;
        }
        Callback::ContactOperator(topic) => {
            contact_operator(state, &callback, topic).await?;
        }
        Callback::BackToTopics => {
            let lang = state
                .coordinator
                .resolve_language(from.id, from.language_code.as_deref())
                .await;
            let (text, buttons) = menu::start_screen(&lang);
            edit_or_send(state, from.id, message, &text, buttons).await?;
            state.transport.answer_callback(&callback.id, None).await?;
        }
        Callback::CloseTicket(user_id) => {
            if !authorize_support(state, &callback).await? {
                return Ok(());
            }
            let closed = state.coordinator.close(user_id, true).await?;
            let ack = if closed { "🔒 Тикет закрыт" } else { "Тикет уже закрыт" };
            state
                .transport
                .answer_callback(&callback.id, Some(ack))
                .await?;
        }
        Callback::TechCreate(user_id) => {
            if !authorize_support(state, &callback).await? {
                return Ok(());
            }
            if let Some(message) = message {
                state
                    .transport
                    .send_message(
                        message.chat.id,
                        message.message_thread_id,
                        "Подключить тех. специалистов к этому тикету?",
                        menu::tech_confirm_keyboard(user_id),
                    )
                    .await?;
            }
            state.transport.answer_callback(&callback.id, None).await?;
        }
        Callback::TechConfirm(user_id) | Callback::TechReopen(user_id) => {
            if !authorize_support(state, &callback).await? {
                return Ok(());
            }
            let ack = match state.coordinator.request_technical_escalation(user_id).await? {
                Some(_) => "🔧 Тех. тред подключен",
                None => "Тикет уже закрыт",
            };
            state
                .transport
                .answer_callback(&callback.id, Some(ack))
                .await?;
        }
        Callback::TechCancel(_) => {
            state
                .transport
                .answer_callback(&callback.id, Some("Отменено"))
                .await?;
        }
        Callback::TechClose(user_id) => {
            if !state.coordinator.is_tech_staff(from.id)
                && !state.coordinator.is_support_staff(from.id)
            {
                state
                    .transport
                    .answer_callback(&callback.id, Some("⛔ Нет доступа"))
                    .await?;
                return Ok(());
            }
            let closed = state.coordinator.close_technical(user_id).await?;
            let ack = if closed { "✅ Тех. тред закрыт" } else { "Тех. тред не найден" };
            state
                .transport
                .answer_callback(&callback.id, Some(ack))
                .await?;
        }
    }
    Ok(())
}

async fn contact_operator(
    state: &AppState,
    callback: &TelegramCallbackQuery,
    topic: Topic,
) -> anyhow::Result<()> {
    let user_id = callback.from.id;
    let lang = state
        .coordinator
        .resolve_language(user_id, callback.from.language_code.as_deref())
        .await;
    let messages = kb::messages(&lang);

    if let Some(ticket) = state.coordinator.ticket(user_id).await? {
        if ticket.is_open() {
            state
                .transport
                .send_message(user_id, None, messages.ticket_already_open, None)
                .await?;
            state.transport.answer_callback(&callback.id, None).await?;
            return Ok(());
        }
    }

    state
        .set_dialog(user_id, DialogState::AwaitingDescription(topic))
        .await;
    state
        .transport
        .send_message(user_id, None, messages.describe_issue, None)
        .await?;
    state.transport.answer_callback(&callback.id, None).await?;
    info!("User {} entered description flow for {}", user_id, topic.as_str());
    Ok(())
}

async fn authorize_support(
    state: &AppState,
    callback: &TelegramCallbackQuery,
) -> anyhow::Result<bool> {
    if state.coordinator.is_support_staff(callback.from.id) {
        return Ok(true);
    }
    state
        .transport
        .answer_callback(&callback.id, Some("⛔ Нет доступа"))
        .await?;
    Ok(false)
}

async fn edit_or_send(
    state: &AppState,
    user_id: i64,
    message: Option<&TelegramMessage>,
    text: &str,
    buttons: Option<crate::markup::InlineKeyboardMarkup>,
) -> anyhow::Result<()> {
    if let Some(message) = message {
        match state
            .transport
            .edit_message(message.chat.id, message.message_id, text, buttons.clone())
            .await
        {
            Ok(()) => return Ok(()),
            Err(err) if err.is_benign() => {}
            Err(err) => return Err(err.into()),
        }
    }
    state
        .transport
        .send_message(user_id, None, text, buttons)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_with_entities_deserializes() {
        let raw = r#"{
            "update_id": 1,
            "message": {
                "message_id": 10,
                "from": {"id": 5, "is_bot": false, "first_name": "Ann", "language_code": "ru"},
                "chat": {"id": 5, "type": "private"},
                "date": 1720000000,
                "text": "bold here",
                "entities": [{"type": "bold", "offset": 0, "length": 4}]
            }
        }"#;
        let update: TelegramUpdate = serde_json::from_str(raw).unwrap();
        let message = update.message.unwrap();
        assert_eq!(message.entities[0].kind, "bold");
        assert_eq!(message.entities[0].length, 4);
    }

    #[test]
    fn photo_content_takes_largest_size() {
        let raw = r#"{
            "message_id": 10,
            "from": {"id": 5, "is_bot": false, "first_name": "Ann"},
            "chat": {"id": 5, "type": "private"},
            "date": 1720000000,
            "photo": [
                {"file_id": "small", "file_unique_id": "a", "width": 90, "height": 90},
                {"file_id": "large", "file_unique_id": "b", "width": 800, "height": 800}
            ],
            "caption": "look"
        }"#;
        let message: TelegramMessage = serde_json::from_str(raw).unwrap();
        match extract_content(&message) {
            Some(InboundContent::Photo { file_id, caption, .. }) => {
                assert_eq!(file_id, "large");
                assert_eq!(caption.as_deref(), Some("look"));
            }
            other => panic!("unexpected content: {:?}", other),
        }
    }

    #[test]
    fn callback_without_payload_is_ignored() {
        assert!(Callback::parse("").is_none());
    }
}
