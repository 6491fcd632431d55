//! Ticket lifecycle coordination: opening threads, relaying both directions,
//! technical escalation, and closing.
//!
//! All client-side mutations for one user run under that user's async lock
//! and re-read persisted state after acquiring it, so two first messages
//! arriving together still produce exactly one thread.

use crate::assistant::ReplyProvider;
use crate::channels::{Transport, TransportError};
use crate::escalation;
use crate::kb::{self, Topic};
use crate::markup;
use crate::menu;
use crate::shared::config::AppConfig;
use crate::shared::models::{InboundContent, MessageRecord, TicketRecord, UserProfile};
use crate::storage::{StoreError, TicketStore};
use chrono::Utc;
use log::{error, info, warn};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// What happened to a client message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientOutcome {
    /// A new ticket and thread were created for it.
    Opened,
    /// It was relayed into the existing open ticket's thread.
    Relayed,
    /// The user's previous ticket is closed; tell them so and reopen the menu.
    PreviouslyClosed,
    /// Nothing on file and no topic selected; the menu should take over.
    NoTicket,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StaffOutcome {
    Relayed,
    UnknownThread,
}

/// Per-user mutual exclusion. Guards the read-decide-write window of every
/// client-side ticket mutation.
#[derive(Default)]
pub struct UserLocks {
    inner: Mutex<HashMap<i64, Arc<Mutex<()>>>>,
}

impl UserLocks {
    pub async fn acquire(&self, user_id: i64) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().await;
            map.entry(user_id).or_default().clone()
        };
        lock.lock_owned().await
    }
}

/// Read-through cache over the users table.
#[derive(Default)]
struct LanguageCache {
    inner: RwLock<HashMap<i64, String>>,
}

/// Deep link to a forum thread in a private supergroup.
pub fn build_topic_url(chat_id: i64, thread_id: i64) -> String {
    let internal = chat_id.abs() - 1_000_000_000_000;
    format!("https://t.me/c/{}/{}", internal, thread_id)
}

fn open_title(title: &str, user_id: i64) -> String {
    format!("🟢 ОТКРЫТО: {} - id{}", title, user_id)
}

fn closed_title(title: &str, user_id: i64) -> String {
    format!("🔒 ЗАКРЫТО: {} - id{}", title, user_id)
}

pub struct TicketCoordinator {
    config: AppConfig,
    store: Arc<dyn TicketStore>,
    transport: Arc<dyn Transport>,
    assistant: Arc<dyn ReplyProvider>,
    locks: UserLocks,
    languages: LanguageCache,
}

impl TicketCoordinator {
    pub fn new(
        config: AppConfig,
        store: Arc<dyn TicketStore>,
        transport: Arc<dyn Transport>,
        assistant: Arc<dyn ReplyProvider>,
    ) -> Self {
        Self {
            config,
            store,
            transport,
            assistant,
            locks: UserLocks::default(),
            languages: LanguageCache::default(),
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn is_support_staff(&self, user_id: i64) -> bool {
        self.config.support_owner_ids.is_empty()
            || self.config.support_owner_ids.contains(&user_id)
    }

    pub fn is_tech_staff(&self, user_id: i64) -> bool {
        self.config.tech_owner_ids.is_empty() || self.config.tech_owner_ids.contains(&user_id)
    }

    pub async fn language(&self, user_id: i64) -> String {
        self.resolve_language(user_id, None).await
    }

    /// Resolve a user's language: cache, then store, then the client-side
    /// locale hint, then the default. The first resolution for a user with
    /// no stored row is persisted; a stored choice is never overridden by
    /// the hint.
    pub async fn resolve_language(&self, user_id: i64, hint: Option<&str>) -> String {
        if let Some(lang) = self.languages.inner.read().await.get(&user_id) {
            return lang.clone();
        }
        let stored = match self.store.language(user_id).await {
            Ok(stored) => stored,
            Err(err) => {
                warn!("Language lookup failed for {}: {}", user_id, err);
                return self.config.default_language.clone();
            }
        };
        let lang = match stored {
            Some(lang) => lang,
            None => {
                let lang = hint
                    .filter(|hint| kb::is_supported_language(hint))
                    .unwrap_or(&self.config.default_language)
                    .to_string();
                if let Err(err) = self.store.set_language(user_id, &lang).await {
                    warn!("Could not persist language for {}: {}", user_id, err);
                }
                lang
            }
        };
        self.languages
            .inner
            .write()
            .await
            .insert(user_id, lang.clone());
        lang
    }

    pub async fn set_language(&self, user_id: i64, lang: &str) -> Result<(), RelayError> {
        let lang = if kb::is_supported_language(lang) {
            lang
        } else {
            &self.config.default_language
        };
        self.store.set_language(user_id, lang).await?;
        self.languages
            .inner
            .write()
            .await
            .insert(user_id, lang.to_string());
        Ok(())
    }

    pub async fn ticket(&self, user_id: i64) -> Result<Option<TicketRecord>, RelayError> {
        Ok(self.store.ticket(user_id).await?)
    }

    pub async fn ticket_by_thread(
        &self,
        thread_id: i64,
        technical: bool,
    ) -> Result<Option<TicketRecord>, RelayError> {
        Ok(self.store.owner_of_thread(thread_id, technical).await?)
    }

    /// Entry point for everything a client sends outside the menu flow.
    ///
    /// `topic` is present only when the menu just collected a topic choice
    /// and this message is the ticket's opening description.
    pub async fn handle_client_message(
        &self,
        profile: &UserProfile,
        topic: Option<Topic>,
        content: &InboundContent,
    ) -> Result<ClientOutcome, RelayError> {
        let _guard = self.locks.acquire(profile.user_id).await;

        let existing = self.store.ticket(profile.user_id).await?;
        match existing {
            Some(ticket) if ticket.is_open() => {
                self.relay_into_ticket(profile, &ticket, content).await?;
                self.maybe_auto_reply(profile, &ticket, content).await;
                Ok(ClientOutcome::Relayed)
            }
            closed => match topic {
                Some(topic) => {
                    let ticket = self.open_ticket(profile, topic, content).await?;
                    self.maybe_auto_reply(profile, &ticket, content).await;
                    Ok(ClientOutcome::Opened)
                }
                None if closed.is_some() => Ok(ClientOutcome::PreviouslyClosed),
                None => Ok(ClientOutcome::NoTicket),
            },
        }
    }

    async fn open_ticket(
        &self,
        profile: &UserProfile,
        topic: Topic,
        content: &InboundContent,
    ) -> Result<TicketRecord, RelayError> {
        let lang = self
            .resolve_language(profile.user_id, profile.language_code.as_deref())
            .await;
        let first_text = content.text().unwrap_or_default();
        let title = self.assistant.summarize_as_title(topic, first_text).await;

        let thread_id = self
            .transport
            .create_thread(
                self.config.support_chat_id,
                &open_title(&title, profile.user_id),
            )
            .await?;
        info!(
            "Opened ticket for user {} in thread {}",
            profile.user_id, thread_id
        );

        let header_id = self
            .transport
            .send_message(
                self.config.support_chat_id,
                Some(thread_id),
                &self.header_card(profile, topic, &lang),
                menu::staff_header_keyboard(profile.user_id, self.config.tech_chat_id.is_some()),
            )
            .await?;
        self.record_relayed(profile.user_id, header_id, Some(thread_id))
            .await;

        let now = Utc::now();
        self.store
            .upsert_open_ticket(profile.user_id, thread_id, topic.as_str(), now)
            .await?;

        let relayed_id = self
            .relay_content(self.config.support_chat_id, Some(thread_id), content)
            .await?;
        self.record_relayed(profile.user_id, relayed_id, Some(thread_id))
            .await;

        let messages = kb::messages(&lang);
        if let Err(err) = self
            .transport
            .send_message(profile.user_id, None, messages.ticket_submitted, None)
            .await
        {
            warn!("Could not confirm ticket to user {}: {}", profile.user_id, err);
        }

        Ok(self
            .store
            .ticket(profile.user_id)
            .await?
            .unwrap_or(TicketRecord {
                user_id: profile.user_id,
                thread_id,
                tech_thread_id: None,
                status: crate::shared::models::TicketStatus::Open,
                topic: topic.as_str().to_string(),
                last_message_time: now,
                last_client_message_time: Some(now),
                last_support_message_time: None,
                support_reminder_sent: false,
                tech_reminder_sent: false,
                close_reminder_sent: false,
                human_responded: false,
                ai_responded: false,
                ai_response_count: 0,
            }))
    }

    async fn relay_into_ticket(
        &self,
        profile: &UserProfile,
        ticket: &TicketRecord,
        content: &InboundContent,
    ) -> Result<(), RelayError> {
        let message_id = self
            .relay_content(self.config.support_chat_id, Some(ticket.thread_id), content)
            .await?;
        self.record_relayed(profile.user_id, message_id, Some(ticket.thread_id))
            .await;

        // Mirror into the technical thread when one is active. A failure
        // there must not break the primary relay.
        if let Some(tech_thread) = ticket.tech_thread_id {
            if let Some(tech_chat) = self.config.tech_chat_id {
                if let Err(err) = self
                    .transport
                    .copy_message(
                        self.config.support_chat_id,
                        message_id,
                        tech_chat,
                        Some(tech_thread),
                    )
                    .await
                {
                    warn!("Could not mirror message into tech thread: {}", err);
                }
            }
        }

        self.store
            .mark_client_activity(profile.user_id, Utc::now())
            .await?;
        Ok(())
    }

    async fn relay_content(
        &self,
        chat_id: i64,
        thread_id: Option<i64>,
        content: &InboundContent,
    ) -> Result<i64, RelayError> {
        let message_id = match content {
            InboundContent::Text { text, entities } => {
                self.transport
                    .send_message(chat_id, thread_id, &markup::to_html(text, entities), None)
                    .await?
            }
            InboundContent::Sticker { file_id } => {
                self.transport
                    .send_sticker(chat_id, thread_id, file_id)
                    .await?
            }
            InboundContent::Photo {
                file_id,
                caption,
                caption_entities,
            } => {
                let caption_html = caption
                    .as_deref()
                    .map(|c| markup::to_html(c, caption_entities));
                self.transport
                    .send_photo(chat_id, thread_id, file_id, caption_html.as_deref())
                    .await?
            }
            InboundContent::Animation { file_id } => {
                self.transport
                    .send_animation(chat_id, thread_id, file_id)
                    .await?
            }
        };
        Ok(message_id)
    }

    async fn record_relayed(&self, user_id: i64, message_id: i64, thread_id: Option<i64>) {
        let record = MessageRecord {
            user_id,
            message_id,
            chat_id: self.config.support_chat_id,
            thread_id,
            created_at: Utc::now(),
        };
        if let Err(err) = self.store.append_message(record).await {
            warn!("Could not record relayed message: {}", err);
        }
    }

    fn header_card(&self, profile: &UserProfile, topic: Topic, lang: &str) -> String {
        format!(
            "👤 <a href=\"tg://user?id={}\">{}</a> ({})\n🆔 <code>{}</code>\n🌐 {}\n📂 {}\n🕒 {}",
            profile.user_id,
            markup::escape(&profile.display_name()),
            markup::escape(&profile.handle()),
            profile.user_id,
            lang,
            topic.label(lang),
            Utc::now().format("%Y-%m-%d %H:%M UTC"),
        )
    }

    /// First-line generated reply, gated so a human conversation is never
    /// interrupted and no ticket gets more than the configured number of
    /// automatic answers.
    async fn maybe_auto_reply(
        &self,
        profile: &UserProfile,
        ticket: &TicketRecord,
        content: &InboundContent,
    ) {
        if !self.config.assistant.enabled || !self.config.assistant.auto_respond {
            return;
        }
        if ticket.human_responded {
            return;
        }
        let text = match content.text() {
            Some(text) if !text.trim().is_empty() => text,
            _ => return,
        };
        if ticket.ai_response_count >= self.config.assistant.max_responses {
            return;
        }
        if escalation::detects_distress(text) {
            self.post_thread_note(
                ticket,
                "⚠️ Пользователь выражает недовольство, нужен оператор.",
            )
            .await;
            return;
        }

        let topic = Topic::parse(&ticket.topic).unwrap_or(Topic::Other);
        let lang = self.language(profile.user_id).await;
        let reply = match self.assistant.generate(topic, &lang, text).await {
            Some(reply) => reply,
            None => return,
        };
        if escalation::requests_handoff(&reply) {
            return;
        }

        if let Err(err) = self
            .transport
            .send_message(profile.user_id, None, &reply, None)
            .await
        {
            warn!("Could not deliver generated reply: {}", err);
            return;
        }
        self.post_thread_note(ticket, &format!("🤖 <i>Автоответ:</i>\n{}", reply))
            .await;
        if let Err(err) = self.store.record_ai_reply(profile.user_id).await {
            error!("Could not record generated reply: {}", err);
        }
    }

    async fn post_thread_note(&self, ticket: &TicketRecord, html: &str) {
        if let Err(err) = self
            .transport
            .send_message(
                self.config.support_chat_id,
                Some(ticket.thread_id),
                html,
                None,
            )
            .await
        {
            warn!("Could not post note into thread {}: {}", ticket.thread_id, err);
        }
    }

    /// Staff wrote in a support or technical thread; deliver it to the owner.
    /// `technical` says which chat the reply came from.
    pub async fn handle_staff_reply(
        &self,
        thread_id: i64,
        technical: bool,
        content: &InboundContent,
    ) -> Result<StaffOutcome, RelayError> {
        let ticket = match self.store.owner_of_thread(thread_id, technical).await? {
            Some(ticket) if ticket.is_open() => ticket,
            _ => return Ok(StaffOutcome::UnknownThread),
        };

        self.relay_content(ticket.user_id, None, content).await?;
        self.store
            .mark_support_activity(ticket.user_id, Utc::now())
            .await?;

        // A tech reply should also land in the main support thread so the
        // support side keeps the full picture.
        if technical {
            if let Err(err) = self
                .relay_content(self.config.support_chat_id, Some(ticket.thread_id), content)
                .await
            {
                warn!("Could not mirror tech reply into support thread: {}", err);
            }
        }
        Ok(StaffOutcome::Relayed)
    }

    /// Open (or reuse) a technical thread for the ticket and replay its
    /// history there. Idempotent: a second request returns the live thread.
    pub async fn request_technical_escalation(
        &self,
        user_id: i64,
    ) -> Result<Option<i64>, RelayError> {
        let tech_chat = match self.config.tech_chat_id {
            Some(id) => id,
            None => return Ok(None),
        };
        let _guard = self.locks.acquire(user_id).await;

        let ticket = match self.store.ticket(user_id).await? {
            Some(ticket) if ticket.is_open() => ticket,
            _ => return Ok(None),
        };

        if let Some(tech_thread) = ticket.tech_thread_id {
            // Probe whether the thread still exists; reopening a live open
            // thread fails benignly.
            match self.transport.reopen_thread(tech_chat, tech_thread).await {
                Ok(()) | Err(TransportError::Api(_)) => return Ok(Some(tech_thread)),
                Err(err) if err.is_benign() => {
                    info!("Stale tech thread {} for user {}", tech_thread, user_id);
                    self.store.clear_tech_thread(user_id).await?;
                }
                Err(err) => return Err(err.into()),
            }
        }

        let topic = Topic::parse(&ticket.topic).unwrap_or(Topic::Other);
        let lang = self.language(user_id).await;
        let tech_thread = self
            .transport
            .create_thread(
                tech_chat,
                &open_title(&format!("{} тех", topic.label(&lang)), user_id),
            )
            .await?;
        self.store.set_tech_thread(user_id, tech_thread).await?;
        info!("Opened tech thread {} for user {}", tech_thread, user_id);

        // Replay the ticket history so tech staff see the whole exchange.
        match self.store.thread_messages(user_id).await {
            Ok(history) => {
                for record in history {
                    if let Err(err) = self
                        .transport
                        .copy_message(
                            record.chat_id,
                            record.message_id,
                            tech_chat,
                            Some(tech_thread),
                        )
                        .await
                    {
                        if !err.is_benign() {
                            warn!("History replay skipped message: {}", err);
                        }
                    }
                }
            }
            Err(err) => warn!("Could not load ticket history: {}", err),
        }

        // Cross-link the two threads.
        let support_link = build_topic_url(self.config.support_chat_id, ticket.thread_id);
        let tech_link = build_topic_url(tech_chat, tech_thread);
        if let Err(err) = self
            .transport
            .send_message(
                tech_chat,
                Some(tech_thread),
                &format!("🔗 Тикет поддержки: {}", support_link),
                menu::tech_thread_keyboard(user_id),
            )
            .await
        {
            warn!("Could not post support link: {}", err);
        }
        self.post_thread_note(&ticket, &format!("🔧 Подключены тех. специалисты: {}", tech_link))
            .await;

        Ok(Some(tech_thread))
    }

    /// Close only the technical part and offer to reconnect it later.
    pub async fn close_technical(&self, user_id: i64) -> Result<bool, RelayError> {
        let _guard = self.locks.acquire(user_id).await;
        let ticket = match self.store.ticket(user_id).await? {
            Some(ticket) if ticket.is_open() => ticket,
            _ => return Ok(false),
        };
        let (tech_chat, tech_thread) = match (self.config.tech_chat_id, ticket.tech_thread_id) {
            (Some(chat), Some(thread)) => (chat, thread),
            _ => return Ok(false),
        };

        if let Err(err) = self.transport.close_thread(tech_chat, tech_thread).await {
            if !err.is_benign() {
                return Err(err.into());
            }
        }
        self.store.clear_tech_thread(user_id).await?;

        let buttons = markup::keyboard(&[vec![markup::ButtonSpec::callback(
            "🔧 Вернуть тех. специалистов",
            menu::tech_reopen_data(user_id),
        )]]);
        if let Err(err) = self
            .transport
            .send_message(
                self.config.support_chat_id,
                Some(ticket.thread_id),
                "✅ Технический тред закрыт.",
                buttons,
            )
            .await
        {
            warn!("Could not post tech-closed note: {}", err);
        }
        Ok(true)
    }

    /// Close the ticket. Returns false when it was already closed; callers
    /// skip every announcement in that case.
    pub async fn close(&self, user_id: i64, notify_user: bool) -> Result<bool, RelayError> {
        let _guard = self.locks.acquire(user_id).await;
        self.close_locked(user_id, notify_user).await
    }

    async fn close_locked(&self, user_id: i64, notify_user: bool) -> Result<bool, RelayError> {
        let ticket = match self.store.ticket(user_id).await? {
            Some(ticket) => ticket,
            None => return Ok(false),
        };
        if !self.store.close(user_id).await? {
            return Ok(false);
        }
        info!("Closed ticket of user {}", user_id);

        let lang = self.language(user_id).await;
        let topic = Topic::parse(&ticket.topic).unwrap_or(Topic::Other);
        let title = closed_title(topic.label(&lang), user_id);
        if let Err(err) = self
            .transport
            .rename_thread(self.config.support_chat_id, ticket.thread_id, &title)
            .await
        {
            if !err.is_benign() {
                warn!("Could not rename closed thread: {}", err);
            }
        }
        if let Err(err) = self
            .transport
            .close_thread(self.config.support_chat_id, ticket.thread_id)
            .await
        {
            if !err.is_benign() {
                warn!("Could not close support thread: {}", err);
            }
        }

        if let (Some(tech_chat), Some(tech_thread)) =
            (self.config.tech_chat_id, ticket.tech_thread_id)
        {
            if let Err(err) = self.transport.close_thread(tech_chat, tech_thread).await {
                if !err.is_benign() {
                    warn!("Could not close tech thread: {}", err);
                }
            }
        }

        if notify_user {
            let messages = kb::messages(&lang);
            if let Err(err) = self
                .transport
                .send_message(user_id, None, messages.ticket_closed, None)
                .await
            {
                warn!("Could not notify user {} of close: {}", user_id, err);
            }
        }
        Ok(true)
    }

    /// Bulk close every open ticket. Returns how many actually closed.
    pub async fn close_all(&self) -> Result<usize, RelayError> {
        let open = self.store.open_tickets().await?;
        let mut closed = 0;
        for ticket in open {
            match self.close(ticket.user_id, true).await {
                Ok(true) => closed += 1,
                Ok(false) => {}
                Err(err) => warn!("Bulk close failed for {}: {}", ticket.user_id, err),
            }
        }
        Ok(closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topic_url_strips_supergroup_prefix() {
        assert_eq!(
            build_topic_url(-1001234567890, 42),
            "https://t.me/c/1234567890/42"
        );
    }

    #[test]
    fn titles_carry_state_prefix_and_user_id() {
        assert_eq!(open_title("💰 Баланс", 7), "🟢 ОТКРЫТО: 💰 Баланс - id7");
        assert_eq!(closed_title("💰 Баланс", 7), "🔒 ЗАКРЫТО: 💰 Баланс - id7");
    }
}
