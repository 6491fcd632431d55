use crate::markup::Annotation;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TicketStatus {
    Open,
    Closed,
}

impl TicketStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TicketStatus::Open => "open",
            TicketStatus::Closed => "closed",
        }
    }

    pub fn parse(raw: &str) -> Self {
        if raw == "open" {
            TicketStatus::Open
        } else {
            TicketStatus::Closed
        }
    }
}

/// Persisted state of one support case. At most one open ticket per user.
#[derive(Debug, Clone)]
pub struct TicketRecord {
    pub user_id: i64,
    pub thread_id: i64,
    pub tech_thread_id: Option<i64>,
    pub status: TicketStatus,
    pub topic: String,
    pub last_message_time: DateTime<Utc>,
    pub last_client_message_time: Option<DateTime<Utc>>,
    pub last_support_message_time: Option<DateTime<Utc>>,
    pub support_reminder_sent: bool,
    pub tech_reminder_sent: bool,
    pub close_reminder_sent: bool,
    pub human_responded: bool,
    pub ai_responded: bool,
    pub ai_response_count: i32,
}

impl TicketRecord {
    pub fn is_open(&self) -> bool {
        self.status == TicketStatus::Open
    }

    /// True when the client spoke after the last staff reply (or staff never
    /// replied at all).
    pub fn client_is_waiting(&self) -> bool {
        match (self.last_client_message_time, self.last_support_message_time) {
            (Some(client), Some(support)) => client > support,
            (Some(_), None) => true,
            _ => false,
        }
    }

    /// True when staff spoke last and the client has gone quiet since.
    pub fn staff_spoke_last(&self) -> bool {
        match (self.last_client_message_time, self.last_support_message_time) {
            (Some(client), Some(support)) => support >= client,
            (None, Some(_)) => true,
            _ => false,
        }
    }
}

/// Append-only provenance entry for a message relayed into a support thread.
/// Replayed into a technical thread when one is opened.
#[derive(Debug, Clone)]
pub struct MessageRecord {
    pub user_id: i64,
    pub message_id: i64,
    pub chat_id: i64,
    pub thread_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

/// What we know about the end user from the transport side.
#[derive(Debug, Clone, Default)]
pub struct UserProfile {
    pub user_id: i64,
    pub first_name: String,
    pub last_name: Option<String>,
    pub username: Option<String>,
    pub language_code: Option<String>,
}

impl UserProfile {
    pub fn display_name(&self) -> String {
        match &self.last_name {
            Some(last) => format!("{} {}", self.first_name, last),
            None => self.first_name.clone(),
        }
    }

    pub fn handle(&self) -> String {
        match &self.username {
            Some(name) => format!("@{}", name),
            None => format!("user{}", self.user_id),
        }
    }
}

/// Closed set of relayable message kinds. One relay path per variant instead
/// of per-call-site branching on the raw transport message.
#[derive(Debug, Clone)]
pub enum InboundContent {
    Text {
        text: String,
        entities: Vec<Annotation>,
    },
    Sticker {
        file_id: String,
    },
    Photo {
        file_id: String,
        caption: Option<String>,
        caption_entities: Vec<Annotation>,
    },
    Animation {
        file_id: String,
    },
}

impl InboundContent {
    pub fn text(&self) -> Option<&str> {
        match self {
            InboundContent::Text { text, .. } => Some(text),
            InboundContent::Photo { caption, .. } => caption.as_deref(),
            _ => None,
        }
    }
}
