// src/services/normalizer.rs

// Classificação pura: um update bruto vira exatamente uma variante canônica ou "ignorado".
// Nada aqui toca o banco.

use chrono::{DateTime, Utc};

use crate::{
    common::error::AppError,
    models::{
        event::{
            Actor, BotStatusEvent, CallbackEvent, ChatKind, ChatRef, Classification, IgnoreReason, JoinEvent,
            JoinRequestEvent, JoinVia, LeaveEvent, MediaType, MemberStatus, MessageEvent, NormalizedEvent,
            ReactionEvent,
        },
        telegram::{TgChat, TgChatMemberUpdated, TgMessage, TgMessageEntity, TgUpdate, TgUser},
    },
};

/// Contas de serviço da plataforma (notificações, Channel_Bot, GroupAnonymousBot).
pub const SYSTEM_ACCOUNT_IDS: [i64; 3] = [777_000, 136_817_688, 1_087_968_824];

pub const TEXT_PREVIEW_CHARS: usize = 500;

pub fn parse_update(body: &[u8]) -> Result<TgUpdate, AppError> {
    Ok(serde_json::from_slice(body)?)
}

pub fn classify(update: &TgUpdate) -> Classification {
    let result = if let Some(message) = &update.message {
        classify_message(message, false)
    } else if let Some(message) = &update.edited_message {
        classify_message(message, true)
    } else if let Some(change) = &update.chat_member {
        classify_member_change(change)
    } else if let Some(change) = &update.my_chat_member {
        classify_bot_change(change)
    } else if let Some(request) = &update.chat_join_request {
        chat_ref(&request.chat).and_then(|chat| {
            let actor = human(&request.from)?;
            Ok(NormalizedEvent::JoinRequest(JoinRequestEvent {
                chat,
                actor,
                bio: request.bio.clone().filter(|b| !b.trim().is_empty()),
                invite_link: request.invite_link.as_ref().map(|l| l.invite_link.clone()),
                at: timestamp(request.date),
            }))
        })
    } else if let Some(callback) = &update.callback_query {
        match &callback.message {
            Some(message) => chat_ref(&message.chat).and_then(|chat| {
                let actor = human(&callback.from)?;
                Ok(NormalizedEvent::Callback(CallbackEvent {
                    chat,
                    actor,
                    message_id: message.message_id,
                    data: callback.data.clone(),
                    at: Utc::now(),
                }))
            }),
            None => Err(IgnoreReason::UnsupportedShape),
        }
    } else if let Some(reaction) = &update.message_reaction {
        chat_ref(&reaction.chat).and_then(|chat| {
            // Reações anônimas (em nome do grupo) não têm usuário
            let user = reaction.user.as_ref().ok_or(IgnoreReason::MissingActor)?;
            let actor = human(user)?;
            let emojis = reaction
                .new_reaction
                .iter()
                .filter_map(|r| r.emoji.clone().or_else(|| r.custom_emoji_id.clone()))
                .collect();
            Ok(NormalizedEvent::Reaction(ReactionEvent {
                chat,
                actor,
                message_id: reaction.message_id,
                emojis,
                at: timestamp(reaction.date),
            }))
        })
    } else {
        Err(IgnoreReason::UnsupportedShape)
    };

    match result {
        Ok(event) => Classification::Event(event),
        Err(reason) => Classification::Ignored(reason),
    }
}

// --- Mensagens (inclui as mensagens de serviço de entrada/saída) ---

fn classify_message(message: &TgMessage, edited: bool) -> Result<NormalizedEvent, IgnoreReason> {
    let chat = chat_ref(&message.chat)?;
    let at = timestamp(message.date);

    if let Some(new_members) = &message.new_chat_members {
        let members: Vec<Actor> = new_members.iter().filter_map(|u| human(u).ok()).collect();
        if members.is_empty() {
            return Err(IgnoreReason::BotActor);
        }
        let added_by = message
            .from
            .as_ref()
            .and_then(|u| human(u).ok())
            .filter(|adder| !members.iter().any(|m| m.tg_user_id == adder.tg_user_id));
        return Ok(NormalizedEvent::Join(JoinEvent { chat, members, added_by, via: JoinVia::ServiceMessage, at }));
    }

    if let Some(left) = &message.left_chat_member {
        let member = human(left)?;
        let removed_by = message
            .from
            .as_ref()
            .and_then(|u| human(u).ok())
            .filter(|by| by.tg_user_id != member.tg_user_id);
        return Ok(NormalizedEvent::Leave(LeaveEvent {
            chat,
            member,
            removed_by,
            old_status: None,
            new_status: None,
            at,
        }));
    }

    let from = message.from.as_ref().ok_or(IgnoreReason::MissingActor)?;
    let actor = human(from)?;

    let (text, entities) = match (&message.text, &message.caption) {
        (Some(text), _) => (Some(text.clone()), &message.entities),
        (None, Some(caption)) => (Some(caption.clone()), &message.caption_entities),
        (None, None) => (None, &message.entities),
    };
    let reply = message.reply_to_message.as_deref();

    Ok(NormalizedEvent::Message(MessageEvent {
        chat,
        actor,
        message_id: message.message_id,
        thread_id: message.message_thread_id,
        reply_to_message_id: reply.map(|r| r.message_id),
        reply_to_user_id: reply.and_then(|r| r.from.as_ref()).map(|u| u.id),
        chars_count: text.as_deref().map_or(0, |t| t.chars().count() as i32),
        links_count: count_entities(entities, &["url", "text_link"]),
        mentions_count: count_entities(entities, &["mention", "text_mention"]),
        text,
        media_type: media_type(message),
        is_topic_message: message.is_topic_message,
        edited,
        at,
    }))
}

// --- chat_member: transições de status de um humano ---

fn classify_member_change(change: &TgChatMemberUpdated) -> Result<NormalizedEvent, IgnoreReason> {
    let chat = chat_ref(&change.chat)?;
    let member = human(&change.new_chat_member.user)?;
    let old = MemberStatus::parse(&change.old_chat_member.status).ok_or(IgnoreReason::UnsupportedShape)?;
    let new = MemberStatus::parse(&change.new_chat_member.status).ok_or(IgnoreReason::UnsupportedShape)?;
    let by = change
        .from
        .as_ref()
        .and_then(|u| human(u).ok())
        .filter(|by| by.tg_user_id != member.tg_user_id);
    let at = timestamp(change.date);

    match (old.is_present(), new.is_present()) {
        (false, true) => Ok(NormalizedEvent::Join(JoinEvent {
            chat,
            members: vec![member],
            added_by: by,
            via: JoinVia::StatusChange,
            at,
        })),
        (true, false) => Ok(NormalizedEvent::Leave(LeaveEvent {
            chat,
            member,
            removed_by: by,
            old_status: Some(old),
            new_status: Some(new),
            at,
        })),
        // promoção, restrição etc.: não muda a presença
        _ => Err(IgnoreReason::NoMembershipTransition),
    }
}

// --- my_chat_member: o próprio bot mudou de status ---

fn classify_bot_change(change: &TgChatMemberUpdated) -> Result<NormalizedEvent, IgnoreReason> {
    let chat = chat_ref(&change.chat)?;
    let old_status = MemberStatus::parse(&change.old_chat_member.status).ok_or(IgnoreReason::UnsupportedShape)?;
    let new_status = MemberStatus::parse(&change.new_chat_member.status).ok_or(IgnoreReason::UnsupportedShape)?;
    if old_status == new_status {
        return Err(IgnoreReason::NoMembershipTransition);
    }
    Ok(NormalizedEvent::BotStatusChanged(BotStatusEvent {
        chat,
        old_status,
        new_status,
        at: timestamp(change.date),
    }))
}

// --- Helpers ---

fn chat_ref(chat: &TgChat) -> Result<ChatRef, IgnoreReason> {
    let kind = ChatKind::parse(&chat.kind).ok_or(IgnoreReason::UnsupportedShape)?;
    if !kind.is_group() {
        return Err(IgnoreReason::NotAGroup);
    }
    Ok(ChatRef { id: chat.id, kind, title: chat.title.clone() })
}

/// Só humanos passam daqui: bots e contas de sistema são descartados antes de qualquer escrita.
fn human(user: &TgUser) -> Result<Actor, IgnoreReason> {
    if user.is_bot {
        return Err(IgnoreReason::BotActor);
    }
    if SYSTEM_ACCOUNT_IDS.contains(&user.id) {
        return Err(IgnoreReason::SystemAccount);
    }
    Ok(Actor {
        tg_user_id: user.id,
        first_name: user.first_name.clone(),
        last_name: user.last_name.clone(),
        username: user.username.clone(),
    })
}

fn count_entities(entities: &[TgMessageEntity], kinds: &[&str]) -> i32 {
    entities.iter().filter(|e| kinds.contains(&e.kind.as_str())).count() as i32
}

fn media_type(message: &TgMessage) -> Option<MediaType> {
    if message.photo.is_some() {
        Some(MediaType::Photo)
    } else if message.video.is_some() {
        Some(MediaType::Video)
    } else if message.document.is_some() {
        Some(MediaType::Document)
    } else if message.audio.is_some() {
        Some(MediaType::Audio)
    } else if message.voice.is_some() {
        Some(MediaType::Voice)
    } else if message.sticker.is_some() {
        Some(MediaType::Sticker)
    } else {
        None
    }
}

fn timestamp(unix: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(unix, 0).unwrap_or_else(Utc::now)
}

/// Prévia truncada por caracteres (nunca corta um code point ao meio).
pub fn text_preview(text: &str) -> String {
    text.chars().take(TEXT_PREVIEW_CHARS).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn update(value: serde_json::Value) -> TgUpdate {
        serde_json::from_value(value).unwrap()
    }

    fn group_message(from: serde_json::Value) -> TgUpdate {
        update(json!({
            "update_id": 1,
            "message": {
                "message_id": 10,
                "date": 1_700_000_000,
                "chat": { "id": -100, "type": "supergroup", "title": "Comunidade" },
                "from": from,
                "text": "veja https://exemplo.com @ana",
                "entities": [
                    { "type": "url", "offset": 5, "length": 19 },
                    { "type": "mention", "offset": 25, "length": 4 }
                ],
                "reply_to_message": { "message_id": 9, "from": { "id": 7, "first_name": "Bia" } }
            }
        }))
    }

    #[test]
    fn classifies_group_message_with_entities() {
        let classified = classify(&group_message(json!({ "id": 42, "first_name": "Ana", "username": "ana" })));
        let Classification::Event(NormalizedEvent::Message(msg)) = classified else {
            panic!("esperava mensagem, veio {classified:?}");
        };
        assert_eq!(msg.chat.id, -100);
        assert_eq!(msg.actor.tg_user_id, 42);
        assert_eq!(msg.links_count, 1);
        assert_eq!(msg.mentions_count, 1);
        assert_eq!(msg.reply_to_message_id, Some(9));
        assert_eq!(msg.reply_to_user_id, Some(7));
        assert_eq!(msg.chars_count, "veja https://exemplo.com @ana".chars().count() as i32);
        assert!(!msg.edited);
    }

    #[test]
    fn ignores_bots_and_system_accounts() {
        let bot = classify(&group_message(json!({ "id": 5, "is_bot": true, "first_name": "Bot" })));
        assert!(matches!(bot, Classification::Ignored(IgnoreReason::BotActor)));

        let system = classify(&group_message(json!({ "id": 777000, "first_name": "Telegram" })));
        assert!(matches!(system, Classification::Ignored(IgnoreReason::SystemAccount)));
    }

    #[test]
    fn ignores_private_chats() {
        let classified = classify(&update(json!({
            "update_id": 2,
            "message": {
                "message_id": 1, "date": 1_700_000_000,
                "chat": { "id": 42, "type": "private" },
                "from": { "id": 42, "first_name": "Ana" },
                "text": "oi"
            }
        })));
        assert!(matches!(classified, Classification::Ignored(IgnoreReason::NotAGroup)));
    }

    #[test]
    fn service_message_join_drops_bot_members() {
        let classified = classify(&update(json!({
            "update_id": 3,
            "message": {
                "message_id": 2, "date": 1_700_000_000,
                "chat": { "id": -100, "type": "group" },
                "from": { "id": 1, "first_name": "Admin" },
                "new_chat_members": [
                    { "id": 42, "first_name": "Ana" },
                    { "id": 99, "is_bot": true, "first_name": "OutroBot" }
                ]
            }
        })));
        let Classification::Event(NormalizedEvent::Join(join)) = classified else {
            panic!("esperava entrada");
        };
        assert_eq!(join.members.len(), 1);
        assert_eq!(join.members[0].tg_user_id, 42);
        assert_eq!(join.added_by.map(|a| a.tg_user_id), Some(1));
        assert_eq!(join.via, JoinVia::ServiceMessage);
    }

    #[test]
    fn member_status_transitions() {
        let change = |old: &str, new: &str| {
            classify(&update(json!({
                "update_id": 4,
                "chat_member": {
                    "chat": { "id": -100, "type": "supergroup" },
                    "from": { "id": 42, "first_name": "Ana" },
                    "date": 1_700_000_000,
                    "old_chat_member": { "status": old, "user": { "id": 42, "first_name": "Ana" } },
                    "new_chat_member": { "status": new, "user": { "id": 42, "first_name": "Ana" } }
                }
            })))
        };

        assert!(matches!(change("left", "member"), Classification::Event(NormalizedEvent::Join(_))));
        assert!(matches!(change("member", "kicked"), Classification::Event(NormalizedEvent::Leave(_))));
        assert!(matches!(
            change("member", "administrator"),
            Classification::Ignored(IgnoreReason::NoMembershipTransition)
        ));
    }

    #[test]
    fn bot_status_change_is_its_own_variant() {
        let classified = classify(&update(json!({
            "update_id": 5,
            "my_chat_member": {
                "chat": { "id": -100, "type": "supergroup" },
                "from": { "id": 1, "first_name": "Admin" },
                "date": 1_700_000_000,
                "old_chat_member": { "status": "administrator", "user": { "id": 900, "is_bot": true, "first_name": "Nós" } },
                "new_chat_member": { "status": "left", "user": { "id": 900, "is_bot": true, "first_name": "Nós" } }
            }
        })));
        let Classification::Event(NormalizedEvent::BotStatusChanged(ev)) = classified else {
            panic!("esperava mudança de status do bot");
        };
        assert_eq!(ev.new_status, MemberStatus::Left);
    }

    #[test]
    fn anonymous_reaction_has_no_actor() {
        let classified = classify(&update(json!({
            "update_id": 6,
            "message_reaction": {
                "chat": { "id": -100, "type": "supergroup" },
                "message_id": 10,
                "date": 1_700_000_000,
                "new_reaction": [{ "type": "emoji", "emoji": "👍" }]
            }
        })));
        assert!(matches!(classified, Classification::Ignored(IgnoreReason::MissingActor)));
    }

    #[test]
    fn unknown_update_shape_is_ignored() {
        let classified = classify(&update(json!({ "update_id": 7, "poll": { "id": "x" } })));
        assert!(matches!(classified, Classification::Ignored(IgnoreReason::UnsupportedShape)));
    }

    #[test]
    fn malformed_payload_is_an_error_not_a_panic() {
        assert!(matches!(parse_update(b"{not json"), Err(AppError::InvalidPayload(_))));
    }

    #[test]
    fn preview_truncates_on_char_boundary() {
        let text = "é".repeat(TEXT_PREVIEW_CHARS + 10);
        assert_eq!(text_preview(&text).chars().count(), TEXT_PREVIEW_CHARS);
    }
}
