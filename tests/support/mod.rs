//! In-memory doubles for the persistence, transport and reply-provider
//! seams, shared by the integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use supportbot::assistant::ReplyProvider;
use supportbot::channels::{BotCommand, Transport, TransportError};
use supportbot::coordinator::TicketCoordinator;
use supportbot::kb::Topic;
use supportbot::markup::InlineKeyboardMarkup;
use supportbot::shared::config::{
    AppConfig, AssistantConfig, DatabaseConfig, ReminderConfig,
};
use supportbot::shared::models::{
    MessageRecord, TicketRecord, TicketStatus, UserProfile,
};
use supportbot::storage::{StoreError, TicketStore};

pub const SUPPORT_CHAT: i64 = -1001111111111;
pub const TECH_CHAT: i64 = -1002222222222;

pub fn test_config() -> AppConfig {
    AppConfig {
        bot_token: "test-token".into(),
        bind_addr: "127.0.0.1:0".into(),
        support_chat_id: SUPPORT_CHAT,
        tech_chat_id: Some(TECH_CHAT),
        support_owner_ids: vec![900],
        tech_owner_ids: vec![],
        default_language: "ru".into(),
        database: DatabaseConfig {
            url: String::new(),
            max_connections: 1,
        },
        assistant: AssistantConfig {
            enabled: true,
            auto_respond: true,
            api_key: "sk-test".into(),
            base_url: "http://localhost".into(),
            model: "gpt-4o-mini".into(),
            max_tokens: 1000,
            temperature: 0.7,
            max_responses: 2,
            request_timeout_secs: 5,
        },
        reminders: ReminderConfig {
            poll_secs: 300,
            support_after_mins: 60,
            tech_after_mins: 60,
            close_warn_after_mins: 30,
            auto_close_after_mins: 60,
            auto_close_enabled: true,
        },
    }
}

pub fn profile(user_id: i64) -> UserProfile {
    UserProfile {
        user_id,
        first_name: format!("User{}", user_id),
        last_name: None,
        username: Some(format!("user{}", user_id)),
        language_code: Some("ru".into()),
    }
}

pub fn open_ticket(user_id: i64, thread_id: i64, now: DateTime<Utc>) -> TicketRecord {
    TicketRecord {
        user_id,
        thread_id,
        tech_thread_id: None,
        status: TicketStatus::Open,
        topic: "balance".into(),
        last_message_time: now,
        last_client_message_time: Some(now),
        last_support_message_time: None,
        support_reminder_sent: false,
        tech_reminder_sent: false,
        close_reminder_sent: false,
        human_responded: false,
        ai_responded: false,
        ai_response_count: 0,
    }
}

#[derive(Default)]
pub struct MemoryStore {
    pub tickets: Mutex<HashMap<i64, TicketRecord>>,
    pub messages: Mutex<Vec<MessageRecord>>,
    pub languages: Mutex<HashMap<i64, String>>,
}

impl MemoryStore {
    pub fn with_ticket(ticket: TicketRecord) -> Self {
        let store = Self::default();
        store
            .tickets
            .lock()
            .unwrap()
            .insert(ticket.user_id, ticket);
        store
    }

    pub fn ticket_of(&self, user_id: i64) -> Option<TicketRecord> {
        self.tickets.lock().unwrap().get(&user_id).cloned()
    }
}

#[async_trait]
impl TicketStore for MemoryStore {
    async fn ticket(&self, user_id: i64) -> Result<Option<TicketRecord>, StoreError> {
        Ok(self.ticket_of(user_id))
    }

    async fn owner_of_thread(
        &self,
        thread_id: i64,
        technical: bool,
    ) -> Result<Option<TicketRecord>, StoreError> {
        Ok(self
            .tickets
            .lock()
            .unwrap()
            .values()
            .find(|t| {
                if technical {
                    t.tech_thread_id == Some(thread_id)
                } else {
                    t.thread_id == thread_id
                }
            })
            .cloned())
    }

    async fn upsert_open_ticket(
        &self,
        user_id: i64,
        thread_id: i64,
        topic: &str,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut ticket = open_ticket(user_id, thread_id, now);
        ticket.topic = topic.to_string();
        self.tickets.lock().unwrap().insert(user_id, ticket);
        Ok(())
    }

    async fn mark_client_activity(
        &self,
        user_id: i64,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        if let Some(ticket) = self.tickets.lock().unwrap().get_mut(&user_id) {
            ticket.last_message_time = now;
            ticket.last_client_message_time = Some(now);
            ticket.support_reminder_sent = false;
            ticket.tech_reminder_sent = false;
            ticket.close_reminder_sent = false;
        }
        Ok(())
    }

    async fn mark_support_activity(
        &self,
        user_id: i64,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        if let Some(ticket) = self.tickets.lock().unwrap().get_mut(&user_id) {
            ticket.last_message_time = now;
            ticket.last_support_message_time = Some(now);
            ticket.close_reminder_sent = false;
            ticket.human_responded = true;
        }
        Ok(())
    }

    async fn set_tech_thread(&self, user_id: i64, tech_thread_id: i64) -> Result<(), StoreError> {
        if let Some(ticket) = self.tickets.lock().unwrap().get_mut(&user_id) {
            ticket.tech_thread_id = Some(tech_thread_id);
        }
        Ok(())
    }

    async fn clear_tech_thread(&self, user_id: i64) -> Result<(), StoreError> {
        if let Some(ticket) = self.tickets.lock().unwrap().get_mut(&user_id) {
            ticket.tech_thread_id = None;
        }
        Ok(())
    }

    async fn close(&self, user_id: i64) -> Result<bool, StoreError> {
        let mut tickets = self.tickets.lock().unwrap();
        match tickets.get_mut(&user_id) {
            Some(ticket) if ticket.status == TicketStatus::Open => {
                ticket.status = TicketStatus::Closed;
                ticket.tech_thread_id = None;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_support_reminder_sent(&self, user_id: i64) -> Result<(), StoreError> {
        if let Some(ticket) = self.tickets.lock().unwrap().get_mut(&user_id) {
            ticket.support_reminder_sent = true;
        }
        Ok(())
    }

    async fn mark_tech_reminder_sent(&self, user_id: i64) -> Result<(), StoreError> {
        if let Some(ticket) = self.tickets.lock().unwrap().get_mut(&user_id) {
            ticket.tech_reminder_sent = true;
        }
        Ok(())
    }

    async fn mark_close_reminder_sent(&self, user_id: i64) -> Result<(), StoreError> {
        if let Some(ticket) = self.tickets.lock().unwrap().get_mut(&user_id) {
            ticket.close_reminder_sent = true;
        }
        Ok(())
    }

    async fn record_ai_reply(&self, user_id: i64) -> Result<(), StoreError> {
        if let Some(ticket) = self.tickets.lock().unwrap().get_mut(&user_id) {
            ticket.ai_responded = true;
            ticket.ai_response_count += 1;
        }
        Ok(())
    }

    async fn open_tickets(&self) -> Result<Vec<TicketRecord>, StoreError> {
        Ok(self
            .tickets
            .lock()
            .unwrap()
            .values()
            .filter(|t| t.status == TicketStatus::Open)
            .cloned()
            .collect())
    }

    async fn append_message(&self, record: MessageRecord) -> Result<(), StoreError> {
        self.messages.lock().unwrap().push(record);
        Ok(())
    }

    async fn thread_messages(&self, user_id: i64) -> Result<Vec<MessageRecord>, StoreError> {
        Ok(self
            .messages
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn language(&self, user_id: i64) -> Result<Option<String>, StoreError> {
        Ok(self.languages.lock().unwrap().get(&user_id).cloned())
    }

    async fn set_language(&self, user_id: i64, lang: &str) -> Result<(), StoreError> {
        self.languages
            .lock()
            .unwrap()
            .insert(user_id, lang.to_string());
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct Sent {
    pub chat_id: i64,
    pub thread_id: Option<i64>,
    pub text: String,
}

#[derive(Default)]
pub struct RecordingTransport {
    next_thread: AtomicI64,
    next_message: AtomicI64,
    pub sent: Mutex<Vec<Sent>>,
    pub created_threads: Mutex<Vec<(i64, String)>>,
    pub renamed: Mutex<Vec<(i64, i64, String)>>,
    pub closed_threads: Mutex<Vec<(i64, i64)>>,
    pub copied: Mutex<Vec<(i64, i64, i64, Option<i64>)>>,
    /// When set, thread probes report the thread as gone.
    pub reopen_not_found: AtomicBool,
}

impl RecordingTransport {
    pub fn messages_to(&self, chat_id: i64) -> Vec<Sent> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.chat_id == chat_id)
            .cloned()
            .collect()
    }

    pub fn thread_count(&self) -> usize {
        self.created_threads.lock().unwrap().len()
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn create_thread(&self, chat_id: i64, title: &str) -> Result<i64, TransportError> {
        let id = 100 + self.next_thread.fetch_add(1, Ordering::SeqCst);
        self.created_threads
            .lock()
            .unwrap()
            .push((chat_id, title.to_string()));
        Ok(id)
    }

    async fn send_message(
        &self,
        chat_id: i64,
        thread_id: Option<i64>,
        html: &str,
        _buttons: Option<InlineKeyboardMarkup>,
    ) -> Result<i64, TransportError> {
        self.sent.lock().unwrap().push(Sent {
            chat_id,
            thread_id,
            text: html.to_string(),
        });
        Ok(1000 + self.next_message.fetch_add(1, Ordering::SeqCst))
    }

    async fn send_sticker(
        &self,
        chat_id: i64,
        thread_id: Option<i64>,
        file_id: &str,
    ) -> Result<i64, TransportError> {
        self.sent.lock().unwrap().push(Sent {
            chat_id,
            thread_id,
            text: format!("[sticker {}]", file_id),
        });
        Ok(1000 + self.next_message.fetch_add(1, Ordering::SeqCst))
    }

    async fn send_photo(
        &self,
        chat_id: i64,
        thread_id: Option<i64>,
        file_id: &str,
        caption_html: Option<&str>,
    ) -> Result<i64, TransportError> {
        self.sent.lock().unwrap().push(Sent {
            chat_id,
            thread_id,
            text: format!("[photo {} {}]", file_id, caption_html.unwrap_or("")),
        });
        Ok(1000 + self.next_message.fetch_add(1, Ordering::SeqCst))
    }

    async fn send_animation(
        &self,
        chat_id: i64,
        thread_id: Option<i64>,
        file_id: &str,
    ) -> Result<i64, TransportError> {
        self.sent.lock().unwrap().push(Sent {
            chat_id,
            thread_id,
            text: format!("[animation {}]", file_id),
        });
        Ok(1000 + self.next_message.fetch_add(1, Ordering::SeqCst))
    }

    async fn edit_message(
        &self,
        _chat_id: i64,
        _message_id: i64,
        _html: &str,
        _buttons: Option<InlineKeyboardMarkup>,
    ) -> Result<(), TransportError> {
        Ok(())
    }

    async fn rename_thread(
        &self,
        chat_id: i64,
        thread_id: i64,
        title: &str,
    ) -> Result<(), TransportError> {
        self.renamed
            .lock()
            .unwrap()
            .push((chat_id, thread_id, title.to_string()));
        Ok(())
    }

    async fn close_thread(&self, chat_id: i64, thread_id: i64) -> Result<(), TransportError> {
        self.closed_threads.lock().unwrap().push((chat_id, thread_id));
        Ok(())
    }

    async fn reopen_thread(&self, _chat_id: i64, _thread_id: i64) -> Result<(), TransportError> {
        if self.reopen_not_found.load(Ordering::SeqCst) {
            return Err(TransportError::NotFound("message thread not found".into()));
        }
        Ok(())
    }

    async fn copy_message(
        &self,
        from_chat_id: i64,
        message_id: i64,
        to_chat_id: i64,
        to_thread_id: Option<i64>,
    ) -> Result<i64, TransportError> {
        self.copied
            .lock()
            .unwrap()
            .push((from_chat_id, message_id, to_chat_id, to_thread_id));
        Ok(1000 + self.next_message.fetch_add(1, Ordering::SeqCst))
    }

    async fn answer_callback(
        &self,
        _callback_id: &str,
        _text: Option<&str>,
    ) -> Result<(), TransportError> {
        Ok(())
    }

    async fn set_commands(
        &self,
        _commands: &[BotCommand],
        _language_code: Option<&str>,
        _chat_id: Option<i64>,
    ) -> Result<(), TransportError> {
        Ok(())
    }

    async fn chat_profile(&self, user_id: i64) -> Result<UserProfile, TransportError> {
        Ok(profile(user_id))
    }
}

pub struct StubReplyProvider {
    pub reply: Option<String>,
}

#[async_trait]
impl ReplyProvider for StubReplyProvider {
    async fn generate(&self, _topic: Topic, _lang: &str, _question: &str) -> Option<String> {
        self.reply.clone()
    }

    async fn summarize_as_title(&self, _topic: Topic, _first_message: &str) -> String {
        "💰 Вопрос по балансу".to_string()
    }
}

pub fn coordinator(
    store: Arc<MemoryStore>,
    transport: Arc<RecordingTransport>,
    reply: Option<String>,
) -> Arc<TicketCoordinator> {
    Arc::new(TicketCoordinator::new(
        test_config(),
        store,
        transport,
        Arc::new(StubReplyProvider { reply }),
    ))
}
