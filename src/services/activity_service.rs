// src/services/activity_service.rs

use std::sync::Arc;

use uuid::Uuid;

use crate::{
    common::error::AppError,
    db::ActivityStore,
    models::{
        activity::{ActivityEventType, AppendOutcome, EventDetail, EventMeta, MessageMeta, NewActivityEvent, UserMeta},
        event::{Actor, CallbackEvent, JoinEvent, JoinRequestEvent, LeaveEvent, MessageEvent, ReactionEvent},
    },
    services::normalizer::text_preview,
};

/// Ledger somente-inserção, deduplicado pela chave natural quando ela existe.
#[derive(Clone)]
pub struct ActivityLedger {
    store: Arc<dyn ActivityStore>,
}

impl ActivityLedger {
    pub fn new(store: Arc<dyn ActivityStore>) -> Self {
        Self { store }
    }

    pub async fn append(&self, event: &NewActivityEvent) -> Result<AppendOutcome, AppError> {
        let key = event.natural_key();

        if let Some(key) = &key {
            if let Some(existing) = self.store.find_by_key(key).await? {
                return Ok(AppendOutcome::Existing(existing));
            }
        }

        match self.store.insert(event).await {
            Ok(id) => Ok(AppendOutcome::Inserted(id)),
            // Duas entregas do mesmo update correram; a outra já gravou
            Err(e) if e.is_conflict() => match &key {
                Some(key) => self
                    .store
                    .find_by_key(key)
                    .await?
                    .map(AppendOutcome::Existing)
                    .ok_or(e),
                None => Err(e),
            },
            Err(e) => Err(e),
        }
    }

    pub async fn is_update_processed(&self, update_id: i64) -> Result<bool, AppError> {
        self.store.is_update_processed(update_id).await
    }

    pub async fn record_update(&self, update_id: i64, tg_chat_id: Option<i64>) -> Result<(), AppError> {
        self.store.record_update(update_id, tg_chat_id).await
    }
}

// --- Construção das linhas a partir das variantes normalizadas ---

fn base_row(
    tenant_id: Uuid,
    participant_id: Uuid,
    event_type: ActivityEventType,
    actor: &Actor,
    tg_chat_id: i64,
    detail: EventDetail,
    at: chrono::DateTime<chrono::Utc>,
) -> NewActivityEvent {
    NewActivityEvent {
        tenant_id,
        event_type,
        tg_user_id: actor.tg_user_id,
        participant_id: Some(participant_id),
        tg_chat_id,
        message_id: None,
        message_thread_id: None,
        reply_to_message_id: None,
        chars_count: 0,
        links_count: 0,
        mentions_count: 0,
        meta: EventMeta::new(detail),
        text: None,
        occurred_at: at,
    }
}

pub fn message_row(tenant_id: Uuid, participant_id: Uuid, event: &MessageEvent) -> NewActivityEvent {
    let text = event.text.as_deref().unwrap_or_default();
    let detail = EventDetail::Message {
        user: UserMeta::from(&event.actor),
        message: MessageMeta {
            thread_id: event.thread_id,
            reply_to_id: event.reply_to_message_id,
            reply_to_user_id: event.reply_to_user_id,
            text_preview: text_preview(text),
            text_length: event.chars_count,
            has_media: event.media_type.is_some(),
            media_type: event.media_type,
            is_topic_message: event.is_topic_message,
            edited: event.edited,
        },
    };

    NewActivityEvent {
        message_id: Some(event.message_id),
        message_thread_id: event.thread_id,
        reply_to_message_id: event.reply_to_message_id,
        chars_count: event.chars_count,
        links_count: event.links_count,
        mentions_count: event.mentions_count,
        text: event.text.clone().filter(|t| !t.is_empty()),
        ..base_row(
            tenant_id,
            participant_id,
            ActivityEventType::Message,
            &event.actor,
            event.chat.id,
            detail,
            event.at,
        )
    }
}

pub fn join_row(tenant_id: Uuid, participant_id: Uuid, event: &JoinEvent, member: &Actor) -> NewActivityEvent {
    let detail = EventDetail::Join {
        user: UserMeta::from(member),
        added_by: event.added_by.as_ref().map(UserMeta::from),
        via: event.via,
    };
    base_row(tenant_id, participant_id, ActivityEventType::Join, member, event.chat.id, detail, event.at)
}

pub fn leave_row(tenant_id: Uuid, participant_id: Uuid, event: &LeaveEvent) -> NewActivityEvent {
    let detail = EventDetail::Leave {
        user: UserMeta::from(&event.member),
        removed_by: event.removed_by.as_ref().map(UserMeta::from),
        old_status: event.old_status.map(|s| s.as_str().to_string()),
        new_status: event.new_status.map(|s| s.as_str().to_string()),
    };
    base_row(tenant_id, participant_id, ActivityEventType::Leave, &event.member, event.chat.id, detail, event.at)
}

pub fn reaction_row(tenant_id: Uuid, participant_id: Uuid, event: &ReactionEvent) -> NewActivityEvent {
    let detail = EventDetail::Reaction { user: UserMeta::from(&event.actor), emojis: event.emojis.clone() };
    NewActivityEvent {
        message_id: Some(event.message_id),
        ..base_row(tenant_id, participant_id, ActivityEventType::Reaction, &event.actor, event.chat.id, detail, event.at)
    }
}

pub fn join_request_row(tenant_id: Uuid, participant_id: Uuid, event: &JoinRequestEvent) -> NewActivityEvent {
    let detail = EventDetail::JoinRequest {
        user: UserMeta::from(&event.actor),
        bio: event.bio.clone(),
        invite_link: event.invite_link.clone(),
    };
    base_row(tenant_id, participant_id, ActivityEventType::Service, &event.actor, event.chat.id, detail, event.at)
}

pub fn callback_row(tenant_id: Uuid, participant_id: Uuid, event: &CallbackEvent) -> NewActivityEvent {
    let detail = EventDetail::Callback { user: UserMeta::from(&event.actor), data: event.data.clone() };
    NewActivityEvent {
        message_id: Some(event.message_id),
        ..base_row(tenant_id, participant_id, ActivityEventType::Callback, &event.actor, event.chat.id, detail, event.at)
    }
}
