//! Periodic background scan over open tickets.
//!
//! Each pass fires at most one reminder of each kind per ticket (the
//! persisted idempotency flags survive restarts) and auto-closes tickets
//! where staff answered and the client went quiet. Auto-close is silent
//! toward the client; only the staff thread gets a best-effort notice.
//! Every per-ticket action commits independently, so a pass interrupted by
//! shutdown leaves no inconsistent state.

use crate::channels::Transport;
use crate::coordinator::TicketCoordinator;
use crate::kb;
use crate::shared::config::{AppConfig, ReminderConfig};
use crate::shared::models::TicketRecord;
use crate::storage::TicketStore;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use log::{error, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

pub struct ReminderScheduler {
    coordinator: Arc<TicketCoordinator>,
    store: Arc<dyn TicketStore>,
    transport: Arc<dyn Transport>,
    support_chat_id: i64,
    tech_chat_id: Option<i64>,
    config: ReminderConfig,
}

impl ReminderScheduler {
    pub fn new(
        app: &AppConfig,
        coordinator: Arc<TicketCoordinator>,
        store: Arc<dyn TicketStore>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            coordinator,
            store,
            transport,
            support_chat_id: app.support_chat_id,
            tech_chat_id: app.tech_chat_id,
            config: app.reminders.clone(),
        }
    }

    /// Run the scan loop until `shutdown` flips to true.
    pub fn spawn(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(self.config.poll_secs));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            info!(
                "Reminder scheduler started, polling every {}s",
                self.config.poll_secs
            );
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.run_once(Utc::now()).await;
                    }
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            info!("Reminder scheduler stopping");
                            return;
                        }
                    }
                }
            }
        })
    }

    /// One full pass over open tickets. Failures are contained per ticket.
    pub async fn run_once(&self, now: DateTime<Utc>) {
        let open = match self.store.open_tickets().await {
            Ok(open) => open,
            Err(err) => {
                error!("Reminder scan could not list open tickets: {}", err);
                return;
            }
        };
        for ticket in open {
            if let Err(err) = self.check_ticket(&ticket, now).await {
                error!(
                    "Reminder pass failed for ticket of user {}: {}",
                    ticket.user_id, err
                );
            }
        }
    }

    async fn check_ticket(&self, ticket: &TicketRecord, now: DateTime<Utc>) -> anyhow::Result<()> {
        if ticket.client_is_waiting() {
            self.check_support_reminder(ticket, now).await?;
            self.check_tech_reminder(ticket, now).await?;
        } else if ticket.staff_spoke_last() {
            let waited = match ticket.last_support_message_time {
                Some(t) => now - t,
                None => return Ok(()),
            };
            if self.config.auto_close_enabled
                && waited >= ChronoDuration::minutes(self.config.auto_close_after_mins)
            {
                self.auto_close(ticket).await?;
            } else if !ticket.close_reminder_sent
                && waited >= ChronoDuration::minutes(self.config.close_warn_after_mins)
            {
                self.send_close_warning(ticket).await?;
            }
        }
        Ok(())
    }

    async fn check_support_reminder(
        &self,
        ticket: &TicketRecord,
        now: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        let waiting_since = match ticket.last_client_message_time {
            Some(t) => t,
            None => return Ok(()),
        };
        if ticket.support_reminder_sent
            || now - waiting_since < ChronoDuration::minutes(self.config.support_after_mins)
        {
            return Ok(());
        }
        let note = format!(
            "⏰ Клиент ждёт ответа более {} мин.",
            self.config.support_after_mins
        );
        match self
            .transport
            .send_message(self.support_chat_id, Some(ticket.thread_id), &note, None)
            .await
        {
            Ok(_) => {}
            Err(err) if err.is_benign() => {
                warn!("Support thread {} is gone: {}", ticket.thread_id, err)
            }
            Err(err) => return Err(err.into()),
        }
        self.store
            .mark_support_reminder_sent(ticket.user_id)
            .await?;
        Ok(())
    }

    async fn check_tech_reminder(
        &self,
        ticket: &TicketRecord,
        now: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        let (tech_chat, tech_thread) = match (self.tech_chat_id, ticket.tech_thread_id) {
            (Some(chat), Some(thread)) => (chat, thread),
            _ => return Ok(()),
        };
        let waiting_since = match ticket.last_client_message_time {
            Some(t) => t,
            None => return Ok(()),
        };
        if ticket.tech_reminder_sent
            || now - waiting_since < ChronoDuration::minutes(self.config.tech_after_mins)
        {
            return Ok(());
        }
        let note = format!(
            "⏰ Тикет ожидает ответа тех. специалистов более {} мин.",
            self.config.tech_after_mins
        );
        match self
            .transport
            .send_message(tech_chat, Some(tech_thread), &note, None)
            .await
        {
            Ok(_) => {}
            Err(err) if err.is_benign() => warn!("Tech thread {} is gone: {}", tech_thread, err),
            Err(err) => return Err(err.into()),
        }
        self.store.mark_tech_reminder_sent(ticket.user_id).await?;
        Ok(())
    }

    async fn send_close_warning(&self, ticket: &TicketRecord) -> anyhow::Result<()> {
        let lang = self.coordinator.language(ticket.user_id).await;
        let messages = kb::messages(&lang);
        match self
            .transport
            .send_message(ticket.user_id, None, messages.close_warning, None)
            .await
        {
            Ok(_) => {}
            Err(err) if err.is_benign() => {
                warn!("User {} unreachable for close warning: {}", ticket.user_id, err)
            }
            Err(err) => return Err(err.into()),
        }
        self.store.mark_close_reminder_sent(ticket.user_id).await?;
        Ok(())
    }

    async fn auto_close(&self, ticket: &TicketRecord) -> anyhow::Result<()> {
        info!("Auto-closing inactive ticket of user {}", ticket.user_id);
        let note = "⏱ Обращение закрыто автоматически: клиент не ответил.";
        if let Err(err) = self
            .transport
            .send_message(self.support_chat_id, Some(ticket.thread_id), note, None)
            .await
        {
            if !err.is_benign() {
                warn!("Could not post auto-close notice: {}", err);
            }
        }
        self.coordinator.close(ticket.user_id, false).await?;
        Ok(())
    }
}
