// src/models/org.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[sqlx(type_name = "binding_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum BindingStatus {
    Active,
    Archived,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "bot_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum BotStatus {
    // Grupo visto pelo bot mas ainda sem tenant vinculado
    Pending,
    Connected,
    Inactive,
}

// Vínculo tenant ↔ chat. Um chat pode ter vários (fan-out ou migração).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct OrgChatBinding {
    pub tenant_id: Uuid,
    pub tg_chat_id: i64,
    pub status: BindingStatus,
    pub archived_reason: Option<String>,
    pub archived_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct TelegramGroup {
    pub tg_chat_id: i64,
    pub title: Option<String>,
    pub bot_status: BotStatus,
    pub last_activity_at: Option<DateTime<Utc>>,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Motivos de arquivamento automático.
pub const ARCHIVE_BOT_REMOVED: &str = "bot_removed";
pub const ARCHIVE_BOT_LOST_ADMIN: &str = "bot_lost_admin";
