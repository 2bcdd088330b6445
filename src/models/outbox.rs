// src/models/outbox.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{types::Json, FromRow};
use uuid::Uuid;

/// Ação na plataforma, serializável para a fila de retentativas.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PlatformAction {
    ApproveJoinRequest { chat_id: i64, user_id: i64 },
    RejectJoinRequest { chat_id: i64, user_id: i64 },
    BanMember { chat_id: i64, user_id: i64 },
    SendMessage { chat_id: i64, text: String },
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct OutboxEntry {
    pub id: i64,
    pub application_id: Option<Uuid>,
    pub action: Json<PlatformAction>,
    pub attempts: i32,
    pub last_error: Option<String>,
    pub next_attempt_at: DateTime<Utc>,
    pub done_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

pub const OUTBOX_MAX_ATTEMPTS: i32 = 5;
