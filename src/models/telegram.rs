// src/models/telegram.rs

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

// Formato bruto dos updates da Bot API. Só os campos que o pipeline consome;
// o resto do JSON é ignorado pelo serde.

#[derive(Debug, Clone, Deserialize)]
pub struct TgUpdate {
    pub update_id: i64,
    pub message: Option<TgMessage>,
    pub edited_message: Option<TgMessage>,
    pub chat_member: Option<TgChatMemberUpdated>,
    pub my_chat_member: Option<TgChatMemberUpdated>,
    pub chat_join_request: Option<TgChatJoinRequest>,
    pub callback_query: Option<TgCallbackQuery>,
    pub message_reaction: Option<TgMessageReactionUpdated>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TgUser {
    pub id: i64,
    #[serde(default)]
    pub is_bot: bool,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub username: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TgChat {
    pub id: i64,
    #[serde(rename = "type")]
    pub kind: String,
    pub title: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TgMessageEntity {
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TgReplyTo {
    pub message_id: i64,
    pub from: Option<TgUser>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TgMessage {
    pub message_id: i64,
    pub message_thread_id: Option<i64>,
    pub date: i64,
    pub chat: TgChat,
    pub from: Option<TgUser>,
    pub text: Option<String>,
    pub caption: Option<String>,
    #[serde(default)]
    pub entities: Vec<TgMessageEntity>,
    #[serde(default)]
    pub caption_entities: Vec<TgMessageEntity>,
    pub reply_to_message: Option<Box<TgReplyTo>>,
    #[serde(default)]
    pub is_topic_message: bool,
    pub new_chat_members: Option<Vec<TgUser>>,
    pub left_chat_member: Option<TgUser>,
    // Mídia: basta saber se veio
    pub photo: Option<serde_json::Value>,
    pub video: Option<serde_json::Value>,
    pub document: Option<serde_json::Value>,
    pub audio: Option<serde_json::Value>,
    pub voice: Option<serde_json::Value>,
    pub sticker: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TgChatMember {
    pub status: String,
    pub user: TgUser,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TgChatMemberUpdated {
    pub chat: TgChat,
    pub from: Option<TgUser>,
    pub date: i64,
    pub old_chat_member: TgChatMember,
    pub new_chat_member: TgChatMember,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TgChatJoinRequest {
    pub chat: TgChat,
    pub from: TgUser,
    pub date: i64,
    pub bio: Option<String>,
    pub invite_link: Option<TgInviteLink>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TgInviteLink {
    pub invite_link: String,
    pub name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TgCallbackQuery {
    pub id: String,
    pub from: TgUser,
    pub message: Option<TgCallbackMessage>,
    pub data: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TgCallbackMessage {
    pub message_id: i64,
    pub chat: TgChat,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TgMessageReactionUpdated {
    pub chat: TgChat,
    pub message_id: i64,
    pub user: Option<TgUser>,
    pub date: i64,
    #[serde(default)]
    pub new_reaction: Vec<TgReactionType>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TgReactionType {
    #[serde(rename = "type")]
    pub kind: String,
    pub emoji: Option<String>,
    pub custom_emoji_id: Option<String>,
}

// Resposta padrão da Bot API: { ok, result, error_code, description }
#[derive(Debug, Clone, Deserialize)]
pub struct TgApiResponse<T> {
    pub ok: bool,
    pub result: Option<T>,
    pub error_code: Option<i32>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TgWebhookInfo {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub pending_update_count: i64,
    pub last_error_date: Option<i64>,
    pub last_error_message: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TgUserProfilePhotos {
    pub total_count: i64,
}

/// Resposta do webhook. Sempre `ok: true` para o provedor não reentregar.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct WebhookAck {
    pub ok: bool,
}
