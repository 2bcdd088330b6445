// src/models/activity.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sqlx::{types::Json, FromRow};
use uuid::Uuid;

use crate::models::event::{Actor, JoinVia, MediaType};

// Mapeia o CREATE TYPE activity_event_type do banco
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "activity_event_type", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ActivityEventType {
    Message,
    Join,
    Leave,
    Reaction,
    // Pedido de entrada e outros eventos de serviço
    Service,
    Callback,
}

impl ActivityEventType {
    /// Só mensagens e reações têm chave natural (o Telegram reentrega esses updates).
    pub fn has_natural_key(self) -> bool {
        matches!(self, ActivityEventType::Message | ActivityEventType::Reaction)
    }

    /// Eventos que contam como "usuário ativo" no rollup diário.
    pub fn counts_as_active(self) -> bool {
        matches!(
            self,
            ActivityEventType::Message | ActivityEventType::Reaction | ActivityEventType::Callback
        )
    }
}

// --- Metadados por variante (em vez de um saco de JSON sem tipo) ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserMeta {
    pub tg_user_id: i64,
    pub username: Option<String>,
    pub name: Option<String>,
}

impl From<&Actor> for UserMeta {
    fn from(actor: &Actor) -> Self {
        Self {
            tg_user_id: actor.tg_user_id,
            username: actor.username.clone(),
            name: actor.full_name(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageMeta {
    pub thread_id: Option<i64>,
    pub reply_to_id: Option<i64>,
    pub reply_to_user_id: Option<i64>,
    pub text_preview: String,
    pub text_length: i32,
    pub has_media: bool,
    pub media_type: Option<MediaType>,
    pub is_topic_message: bool,
    pub edited: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventDetail {
    Message { user: UserMeta, message: MessageMeta },
    Join { user: UserMeta, added_by: Option<UserMeta>, via: JoinVia },
    Leave { user: UserMeta, removed_by: Option<UserMeta>, old_status: Option<String>, new_status: Option<String> },
    Reaction { user: UserMeta, emojis: Vec<String> },
    JoinRequest { user: UserMeta, bio: Option<String>, invite_link: Option<String> },
    Callback { user: UserMeta, data: Option<String> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventMeta {
    pub detail: EventDetail,
    // Só para campos realmente opacos a este núcleo (debug do provedor etc.)
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub extra: Map<String, Value>,
}

impl EventMeta {
    pub fn new(detail: EventDetail) -> Self {
        Self { detail, extra: Map::new() }
    }
}

// --- Linha do ledger ---

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ActivityEvent {
    pub id: i64,
    pub tenant_id: Uuid,
    pub event_type: ActivityEventType,
    pub tg_user_id: i64,
    pub participant_id: Option<Uuid>,
    pub tg_chat_id: i64,
    pub message_id: Option<i64>,
    pub message_thread_id: Option<i64>,
    pub reply_to_message_id: Option<i64>,
    pub chars_count: i32,
    pub links_count: i32,
    pub mentions_count: i32,
    pub meta: Json<EventMeta>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewActivityEvent {
    pub tenant_id: Uuid,
    pub event_type: ActivityEventType,
    pub tg_user_id: i64,
    pub participant_id: Option<Uuid>,
    pub tg_chat_id: i64,
    pub message_id: Option<i64>,
    pub message_thread_id: Option<i64>,
    pub reply_to_message_id: Option<i64>,
    pub chars_count: i32,
    pub links_count: i32,
    pub mentions_count: i32,
    pub meta: EventMeta,
    // Texto completo (registro companheiro), só para mensagens
    pub text: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

impl NewActivityEvent {
    pub fn natural_key(&self) -> Option<NaturalKey> {
        if !self.event_type.has_natural_key() {
            return None;
        }
        self.message_id.map(|message_id| NaturalKey {
            tenant_id: self.tenant_id,
            tg_chat_id: self.tg_chat_id,
            message_id,
            event_type: self.event_type,
            tg_user_id: self.tg_user_id,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NaturalKey {
    pub tenant_id: Uuid,
    pub tg_chat_id: i64,
    pub message_id: i64,
    pub event_type: ActivityEventType,
    pub tg_user_id: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    Inserted(i64),
    Existing(i64),
}

impl AppendOutcome {
    pub fn event_id(self) -> i64 {
        match self {
            AppendOutcome::Inserted(id) | AppendOutcome::Existing(id) => id,
        }
    }

    pub fn is_new(self) -> bool {
        matches!(self, AppendOutcome::Inserted(_))
    }
}
