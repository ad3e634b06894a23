//! Inbound message records.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::attachment::AttachmentRecord;

/// A persisted inbound email, owned by exactly one project.
///
/// `subject`, `body_text` and `body_html` are `None` when the source
/// message carried no such part; an empty-but-present part round-trips as
/// `Some("")`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    pub id: Uuid,
    pub project_id: Uuid,
    /// Raw sender text from the From header (or the envelope sender).
    pub from_addr: String,
    /// Recipient addresses, in header order.
    pub to_recipients: Vec<String>,
    pub subject: Option<String>,
    pub body_text: Option<String>,
    pub body_html: Option<String>,
    /// Header name → value, first occurrence wins.
    pub headers: BTreeMap<String, String>,
    pub received_at: DateTime<Utc>,
    pub is_read: bool,
    pub attachments: Vec<AttachmentRecord>,
}

/// Message fields assembled by the ingestion pipeline, ready to commit.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub from_addr: String,
    pub to_recipients: Vec<String>,
    pub subject: Option<String>,
    pub body_text: Option<String>,
    pub body_html: Option<String>,
    pub headers: BTreeMap<String, String>,
}

/// One row of a paginated project listing.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct MessageSummary {
    pub id: Uuid,
    pub from_addr: String,
    pub subject: Option<String>,
    pub received_at: DateTime<Utc>,
    pub is_read: bool,
    pub attachment_count: i64,
}

/// A page of message summaries plus the project's total message count.
#[derive(Debug, Clone, Serialize)]
pub struct MessagePage {
    pub messages: Vec<MessageSummary>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}
