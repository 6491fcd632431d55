//! Persistence for tickets, relayed-message provenance, and user language
//! preferences. The `TicketStore` trait is the seam; `PgTicketStore` is the
//! Postgres implementation on a diesel/r2d2 pool. Every mutation re-reads
//! and writes inside a single statement so concurrent handlers converge on
//! one consistent row per user.

use crate::shared::models::{MessageRecord, TicketRecord, TicketStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, Pool};
use log::info;

pub mod schema {
    diesel::table! {
        tickets (user_id) {
            user_id -> Int8,
            thread_id -> Int8,
            tech_thread_id -> Nullable<Int8>,
            status -> Text,
            topic -> Text,
            last_message_time -> Timestamptz,
            last_client_message_time -> Nullable<Timestamptz>,
            last_support_message_time -> Nullable<Timestamptz>,
            support_reminder_sent -> Bool,
            tech_reminder_sent -> Bool,
            close_reminder_sent -> Bool,
            human_responded -> Bool,
            ai_responded -> Bool,
            ai_response_count -> Int4,
        }
    }

    diesel::table! {
        ticket_messages (user_id, message_id) {
            user_id -> Int8,
            message_id -> Int8,
            chat_id -> Int8,
            thread_id -> Nullable<Int8>,
            created_at -> Timestamptz,
        }
    }

    diesel::table! {
        users (user_id) {
            user_id -> Int8,
            lang -> Text,
        }
    }
}

pub type PgPool = Pool<ConnectionManager<PgConnection>>;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database pool error: {0}")]
    Pool(#[from] diesel::r2d2::PoolError),
    #[error("database error: {0}")]
    Query(#[from] diesel::result::Error),
    #[error("blocking task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Everything the coordinator and scheduler need from persistence.
///
/// Mutations that race (close, reminder flags, AI counters) are written as
/// single conditional statements so the last writer never resurrects state
/// another handler already advanced.
#[async_trait]
pub trait TicketStore: Send + Sync {
    async fn ticket(&self, user_id: i64) -> Result<Option<TicketRecord>, StoreError>;

    /// Find which user a staff thread belongs to. Thread ids are per-chat
    /// message ids, so the caller says which column to match: the support
    /// thread or, with `technical`, the technical one.
    async fn owner_of_thread(
        &self,
        thread_id: i64,
        technical: bool,
    ) -> Result<Option<TicketRecord>, StoreError>;

    /// Create an open ticket for the user, or reopen/refresh the existing row.
    async fn upsert_open_ticket(
        &self,
        user_id: i64,
        thread_id: i64,
        topic: &str,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Client spoke: bump timestamps and clear all reminder flags.
    async fn mark_client_activity(
        &self,
        user_id: i64,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Staff spoke: bump timestamps, clear the close-warning flag, and set
    /// `human_responded`. The flag never goes back to false for a ticket.
    async fn mark_support_activity(
        &self,
        user_id: i64,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    async fn set_tech_thread(&self, user_id: i64, tech_thread_id: i64) -> Result<(), StoreError>;

    async fn clear_tech_thread(&self, user_id: i64) -> Result<(), StoreError>;

    /// Close the ticket. Returns false when it was already closed, so
    /// callers can skip the announcement side effects.
    async fn close(&self, user_id: i64) -> Result<bool, StoreError>;

    async fn mark_support_reminder_sent(&self, user_id: i64) -> Result<(), StoreError>;

    async fn mark_tech_reminder_sent(&self, user_id: i64) -> Result<(), StoreError>;

    async fn mark_close_reminder_sent(&self, user_id: i64) -> Result<(), StoreError>;

    /// Record one generated reply: sets `ai_responded` and bumps the counter.
    async fn record_ai_reply(&self, user_id: i64) -> Result<(), StoreError>;

    async fn open_tickets(&self) -> Result<Vec<TicketRecord>, StoreError>;

    async fn append_message(&self, record: MessageRecord) -> Result<(), StoreError>;

    /// All relayed messages for a user in insertion order.
    async fn thread_messages(&self, user_id: i64) -> Result<Vec<MessageRecord>, StoreError>;

    async fn language(&self, user_id: i64) -> Result<Option<String>, StoreError>;

    async fn set_language(&self, user_id: i64, lang: &str) -> Result<(), StoreError>;
}

type TicketRow = (
    i64,
    i64,
    Option<i64>,
    String,
    String,
    DateTime<Utc>,
    Option<DateTime<Utc>>,
    Option<DateTime<Utc>>,
    bool,
    bool,
    bool,
    bool,
    bool,
    i32,
);

fn row_to_record(row: TicketRow) -> TicketRecord {
    TicketRecord {
        user_id: row.0,
        thread_id: row.1,
        tech_thread_id: row.2,
        status: TicketStatus::parse(&row.3),
        topic: row.4,
        last_message_time: row.5,
        last_client_message_time: row.6,
        last_support_message_time: row.7,
        support_reminder_sent: row.8,
        tech_reminder_sent: row.9,
        close_reminder_sent: row.10,
        human_responded: row.11,
        ai_responded: row.12,
        ai_response_count: row.13,
    }
}

pub struct PgTicketStore {
    pool: PgPool,
}

impl PgTicketStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let manager = ConnectionManager::<PgConnection>::new(database_url);
        let pool = Pool::builder().max_size(max_connections).build(manager)?;
        Ok(Self { pool })
    }

    /// Create tables on startup when they do not exist yet.
    pub async fn init_schema(&self) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            diesel::sql_query(
                r#"
                CREATE TABLE IF NOT EXISTS tickets (
                    user_id BIGINT PRIMARY KEY,
                    thread_id BIGINT NOT NULL,
                    tech_thread_id BIGINT,
                    status TEXT NOT NULL DEFAULT 'open',
                    topic TEXT NOT NULL DEFAULT 'other',
                    last_message_time TIMESTAMPTZ NOT NULL DEFAULT now(),
                    last_client_message_time TIMESTAMPTZ,
                    last_support_message_time TIMESTAMPTZ,
                    support_reminder_sent BOOLEAN NOT NULL DEFAULT FALSE,
                    tech_reminder_sent BOOLEAN NOT NULL DEFAULT FALSE,
                    close_reminder_sent BOOLEAN NOT NULL DEFAULT FALSE,
                    human_responded BOOLEAN NOT NULL DEFAULT FALSE,
                    ai_responded BOOLEAN NOT NULL DEFAULT FALSE,
                    ai_response_count INTEGER NOT NULL DEFAULT 0
                )
                "#,
            )
            .execute(conn)?;
            diesel::sql_query(
                r#"
                CREATE TABLE IF NOT EXISTS ticket_messages (
                    user_id BIGINT NOT NULL,
                    message_id BIGINT NOT NULL,
                    chat_id BIGINT NOT NULL,
                    thread_id BIGINT,
                    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                    PRIMARY KEY (user_id, message_id)
                )
                "#,
            )
            .execute(conn)?;
            diesel::sql_query(
                r#"
                CREATE TABLE IF NOT EXISTS users (
                    user_id BIGINT PRIMARY KEY,
                    lang TEXT NOT NULL DEFAULT 'en'
                )
                "#,
            )
            .execute(conn)?;
            Ok(())
        })
        .await?;
        info!("Database schema ready");
        Ok(())
    }

    async fn with_conn<T, F>(&self, op: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut PgConnection) -> Result<T, StoreError> + Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            op(&mut conn)
        })
        .await?
    }
}

#[async_trait]
impl TicketStore for PgTicketStore {
    async fn ticket(&self, user_id: i64) -> Result<Option<TicketRecord>, StoreError> {
        self.with_conn(move |conn| {
            use schema::tickets;
            let row: Option<TicketRow> = tickets::table
                .find(user_id)
                .first(conn)
                .optional()?;
            Ok(row.map(row_to_record))
        })
        .await
    }

    async fn owner_of_thread(
        &self,
        thread_id: i64,
        technical: bool,
    ) -> Result<Option<TicketRecord>, StoreError> {
        self.with_conn(move |conn| {
            use schema::tickets;
            let row: Option<TicketRow> = if technical {
                tickets::table
                    .filter(tickets::tech_thread_id.eq(thread_id))
                    .first(conn)
                    .optional()?
            } else {
                tickets::table
                    .filter(tickets::thread_id.eq(thread_id))
                    .first(conn)
                    .optional()?
            };
            Ok(row.map(row_to_record))
        })
        .await
    }

    async fn upsert_open_ticket(
        &self,
        user_id: i64,
        thread_id: i64,
        topic: &str,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let topic = topic.to_string();
        self.with_conn(move |conn| {
            use schema::tickets;
            diesel::insert_into(tickets::table)
                .values((
                    tickets::user_id.eq(user_id),
                    tickets::thread_id.eq(thread_id),
                    tickets::status.eq(TicketStatus::Open.as_str()),
                    tickets::topic.eq(&topic),
                    tickets::last_message_time.eq(now),
                    tickets::last_client_message_time.eq(Some(now)),
                ))
                .on_conflict(tickets::user_id)
                .do_update()
                .set((
                    tickets::thread_id.eq(thread_id),
                    tickets::tech_thread_id.eq(None::<i64>),
                    tickets::status.eq(TicketStatus::Open.as_str()),
                    tickets::topic.eq(&topic),
                    tickets::last_message_time.eq(now),
                    tickets::last_client_message_time.eq(Some(now)),
                    tickets::last_support_message_time.eq(None::<DateTime<Utc>>),
                    tickets::support_reminder_sent.eq(false),
                    tickets::tech_reminder_sent.eq(false),
                    tickets::close_reminder_sent.eq(false),
                    tickets::human_responded.eq(false),
                    tickets::ai_responded.eq(false),
                    tickets::ai_response_count.eq(0),
                ))
                .execute(conn)?;
            Ok(())
        })
        .await
    }

    async fn mark_client_activity(
        &self,
        user_id: i64,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.with_conn(move |conn| {
            use schema::tickets;
            diesel::update(tickets::table.find(user_id))
                .set((
                    tickets::last_message_time.eq(now),
                    tickets::last_client_message_time.eq(Some(now)),
                    tickets::support_reminder_sent.eq(false),
                    tickets::tech_reminder_sent.eq(false),
                    tickets::close_reminder_sent.eq(false),
                ))
                .execute(conn)?;
            Ok(())
        })
        .await
    }

    async fn mark_support_activity(
        &self,
        user_id: i64,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.with_conn(move |conn| {
            use schema::tickets;
            diesel::update(tickets::table.find(user_id))
                .set((
                    tickets::last_message_time.eq(now),
                    tickets::last_support_message_time.eq(Some(now)),
                    tickets::close_reminder_sent.eq(false),
                    tickets::human_responded.eq(true),
                ))
                .execute(conn)?;
            Ok(())
        })
        .await
    }

    async fn set_tech_thread(&self, user_id: i64, tech_thread_id: i64) -> Result<(), StoreError> {
        self.with_conn(move |conn| {
            use schema::tickets;
            diesel::update(tickets::table.find(user_id))
                .set(tickets::tech_thread_id.eq(Some(tech_thread_id)))
                .execute(conn)?;
            Ok(())
        })
        .await
    }

    async fn clear_tech_thread(&self, user_id: i64) -> Result<(), StoreError> {
        self.with_conn(move |conn| {
            use schema::tickets;
            diesel::update(tickets::table.find(user_id))
                .set(tickets::tech_thread_id.eq(None::<i64>))
                .execute(conn)?;
            Ok(())
        })
        .await
    }

    async fn close(&self, user_id: i64) -> Result<bool, StoreError> {
        self.with_conn(move |conn| {
            use schema::tickets;
            let changed = diesel::update(
                tickets::table
                    .find(user_id)
                    .filter(tickets::status.eq(TicketStatus::Open.as_str())),
            )
            .set((
                tickets::status.eq(TicketStatus::Closed.as_str()),
                tickets::tech_thread_id.eq(None::<i64>),
            ))
            .execute(conn)?;
            Ok(changed > 0)
        })
        .await
    }

    async fn mark_support_reminder_sent(&self, user_id: i64) -> Result<(), StoreError> {
        self.with_conn(move |conn| {
            use schema::tickets;
            diesel::update(tickets::table.find(user_id))
                .set(tickets::support_reminder_sent.eq(true))
                .execute(conn)?;
            Ok(())
        })
        .await
    }

    async fn mark_tech_reminder_sent(&self, user_id: i64) -> Result<(), StoreError> {
        self.with_conn(move |conn| {
            use schema::tickets;
            diesel::update(tickets::table.find(user_id))
                .set(tickets::tech_reminder_sent.eq(true))
                .execute(conn)?;
            Ok(())
        })
        .await
    }

    async fn mark_close_reminder_sent(&self, user_id: i64) -> Result<(), StoreError> {
        self.with_conn(move |conn| {
            use schema::tickets;
            diesel::update(tickets::table.find(user_id))
                .set(tickets::close_reminder_sent.eq(true))
                .execute(conn)?;
            Ok(())
        })
        .await
    }

    async fn record_ai_reply(&self, user_id: i64) -> Result<(), StoreError> {
        self.with_conn(move |conn| {
            use schema::tickets;
            diesel::update(tickets::table.find(user_id))
                .set((
                    tickets::ai_responded.eq(true),
                    tickets::ai_response_count.eq(tickets::ai_response_count + 1),
                ))
                .execute(conn)?;
            Ok(())
        })
        .await
    }

    async fn open_tickets(&self) -> Result<Vec<TicketRecord>, StoreError> {
        self.with_conn(move |conn| {
            use schema::tickets;
            let rows: Vec<TicketRow> = tickets::table
                .filter(tickets::status.eq(TicketStatus::Open.as_str()))
                .load(conn)?;
            Ok(rows.into_iter().map(row_to_record).collect())
        })
        .await
    }

    async fn append_message(&self, record: MessageRecord) -> Result<(), StoreError> {
        self.with_conn(move |conn| {
            use schema::ticket_messages;
            diesel::insert_into(ticket_messages::table)
                .values((
                    ticket_messages::user_id.eq(record.user_id),
                    ticket_messages::message_id.eq(record.message_id),
                    ticket_messages::chat_id.eq(record.chat_id),
                    ticket_messages::thread_id.eq(record.thread_id),
                    ticket_messages::created_at.eq(record.created_at),
                ))
                .on_conflict_do_nothing()
                .execute(conn)?;
            Ok(())
        })
        .await
    }

    async fn thread_messages(&self, user_id: i64) -> Result<Vec<MessageRecord>, StoreError> {
        self.with_conn(move |conn| {
            use schema::ticket_messages;
            let rows: Vec<(i64, i64, i64, Option<i64>, DateTime<Utc>)> = ticket_messages::table
                .filter(ticket_messages::user_id.eq(user_id))
                .order(ticket_messages::created_at.asc())
                .load(conn)?;
            Ok(rows
                .into_iter()
                .map(|(user_id, message_id, chat_id, thread_id, created_at)| MessageRecord {
                    user_id,
                    message_id,
                    chat_id,
                    thread_id,
                    created_at,
                })
                .collect())
        })
        .await
    }

    async fn language(&self, user_id: i64) -> Result<Option<String>, StoreError> {
        self.with_conn(move |conn| {
            use schema::users;
            let lang: Option<String> = users::table
                .find(user_id)
                .select(users::lang)
                .first(conn)
                .optional()?;
            Ok(lang)
        })
        .await
    }

    async fn set_language(&self, user_id: i64, lang: &str) -> Result<(), StoreError> {
        let lang = lang.to_string();
        self.with_conn(move |conn| {
            use schema::users;
            diesel::insert_into(users::table)
                .values((users::user_id.eq(user_id), users::lang.eq(&lang)))
                .on_conflict(users::user_id)
                .do_update()
                .set(users::lang.eq(&lang))
                .execute(conn)?;
            Ok(())
        })
        .await
    }
}
