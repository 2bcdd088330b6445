// src/models/event.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::participant::ObservedFields;

// --- Chat ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatKind {
    Private,
    Group,
    Supergroup,
    Channel,
}

impl ChatKind {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "private" => Some(ChatKind::Private),
            "group" => Some(ChatKind::Group),
            "supergroup" => Some(ChatKind::Supergroup),
            "channel" => Some(ChatKind::Channel),
            _ => None,
        }
    }

    pub fn is_group(self) -> bool {
        matches!(self, ChatKind::Group | ChatKind::Supergroup)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatRef {
    pub id: i64,
    pub kind: ChatKind,
    pub title: Option<String>,
}

// --- Ator humano ---

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub tg_user_id: i64,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub username: Option<String>,
}

impl Actor {
    /// "Nome Sobrenome" sem espaços sobrando; `None` se ambos vierem vazios.
    pub fn full_name(&self) -> Option<String> {
        let parts: Vec<&str> = [self.first_name.as_deref(), self.last_name.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .collect();
        if parts.is_empty() { None } else { Some(parts.join(" ")) }
    }

    pub fn observed(&self) -> ObservedFields {
        ObservedFields {
            first_name: self.first_name.clone(),
            last_name: self.last_name.clone(),
            full_name: self.full_name(),
            username: self.username.clone(),
            ..ObservedFields::default()
        }
    }
}

// --- Status de membro (chat_member / my_chat_member) ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberStatus {
    Creator,
    Administrator,
    Member,
    Restricted,
    Left,
    Kicked,
}

impl MemberStatus {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "creator" => Some(MemberStatus::Creator),
            "administrator" => Some(MemberStatus::Administrator),
            "member" => Some(MemberStatus::Member),
            "restricted" => Some(MemberStatus::Restricted),
            "left" => Some(MemberStatus::Left),
            "kicked" => Some(MemberStatus::Kicked),
            _ => None,
        }
    }

    pub fn is_present(self) -> bool {
        !matches!(self, MemberStatus::Left | MemberStatus::Kicked)
    }

    pub fn is_admin(self) -> bool {
        matches!(self, MemberStatus::Creator | MemberStatus::Administrator)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MemberStatus::Creator => "creator",
            MemberStatus::Administrator => "administrator",
            MemberStatus::Member => "member",
            MemberStatus::Restricted => "restricted",
            MemberStatus::Left => "left",
            MemberStatus::Kicked => "kicked",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaType {
    Photo,
    Video,
    Document,
    Audio,
    Voice,
    Sticker,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinVia {
    ServiceMessage,
    StatusChange,
}

// --- Variantes canônicas ---

#[derive(Debug, Clone)]
pub struct MessageEvent {
    pub chat: ChatRef,
    pub actor: Actor,
    pub message_id: i64,
    pub thread_id: Option<i64>,
    pub reply_to_message_id: Option<i64>,
    pub reply_to_user_id: Option<i64>,
    pub text: Option<String>,
    pub chars_count: i32,
    pub links_count: i32,
    pub mentions_count: i32,
    pub media_type: Option<MediaType>,
    pub is_topic_message: bool,
    pub edited: bool,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct JoinEvent {
    pub chat: ChatRef,
    pub members: Vec<Actor>,
    pub added_by: Option<Actor>,
    pub via: JoinVia,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct LeaveEvent {
    pub chat: ChatRef,
    pub member: Actor,
    pub removed_by: Option<Actor>,
    pub old_status: Option<MemberStatus>,
    pub new_status: Option<MemberStatus>,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ReactionEvent {
    pub chat: ChatRef,
    pub actor: Actor,
    pub message_id: i64,
    pub emojis: Vec<String>,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct JoinRequestEvent {
    pub chat: ChatRef,
    pub actor: Actor,
    pub bio: Option<String>,
    pub invite_link: Option<String>,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CallbackEvent {
    pub chat: ChatRef,
    pub actor: Actor,
    pub message_id: i64,
    pub data: Option<String>,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct BotStatusEvent {
    pub chat: ChatRef,
    pub old_status: MemberStatus,
    pub new_status: MemberStatus,
    pub at: DateTime<Utc>,
}

/// Evento normalizado: produzido uma única vez pelo normalizador e consumido
/// com `match` exaustivo pelo resto do pipeline.
#[derive(Debug, Clone)]
pub enum NormalizedEvent {
    Message(MessageEvent),
    Join(JoinEvent),
    Leave(LeaveEvent),
    Reaction(ReactionEvent),
    JoinRequest(JoinRequestEvent),
    Callback(CallbackEvent),
    BotStatusChanged(BotStatusEvent),
}

impl NormalizedEvent {
    pub fn chat(&self) -> &ChatRef {
        match self {
            NormalizedEvent::Message(e) => &e.chat,
            NormalizedEvent::Join(e) => &e.chat,
            NormalizedEvent::Leave(e) => &e.chat,
            NormalizedEvent::Reaction(e) => &e.chat,
            NormalizedEvent::JoinRequest(e) => &e.chat,
            NormalizedEvent::Callback(e) => &e.chat,
            NormalizedEvent::BotStatusChanged(e) => &e.chat,
        }
    }

    pub fn at(&self) -> DateTime<Utc> {
        match self {
            NormalizedEvent::Message(e) => e.at,
            NormalizedEvent::Join(e) => e.at,
            NormalizedEvent::Leave(e) => e.at,
            NormalizedEvent::Reaction(e) => e.at,
            NormalizedEvent::JoinRequest(e) => e.at,
            NormalizedEvent::Callback(e) => e.at,
            NormalizedEvent::BotStatusChanged(e) => e.at,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            NormalizedEvent::Message(_) => "message",
            NormalizedEvent::Join(_) => "join",
            NormalizedEvent::Leave(_) => "leave",
            NormalizedEvent::Reaction(_) => "reaction",
            NormalizedEvent::JoinRequest(_) => "join_request",
            NormalizedEvent::Callback(_) => "callback",
            NormalizedEvent::BotStatusChanged(_) => "bot_status",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    BotActor,
    SystemAccount,
    MissingActor,
    NotAGroup,
    NoMembershipTransition,
    UnsupportedShape,
}

#[derive(Debug, Clone)]
pub enum Classification {
    Event(NormalizedEvent),
    Ignored(IgnoreReason),
}
