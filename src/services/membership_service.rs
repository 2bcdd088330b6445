// src/services/membership_service.rs

use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{common::error::AppError, db::MembershipStore, models::membership::MembershipChange};

/// Mantém uma linha por (participante, grupo); reentrar reativa a mesma linha.
#[derive(Clone)]
pub struct MembershipTracker {
    store: Arc<dyn MembershipStore>,
}

impl MembershipTracker {
    pub fn new(store: Arc<dyn MembershipStore>) -> Self {
        Self { store }
    }

    pub async fn on_join(&self, participant_id: Uuid, tg_chat_id: i64, at: DateTime<Utc>) -> Result<MembershipChange, AppError> {
        self.ensure_active(participant_id, tg_chat_id, at).await
    }

    /// Entrada implícita: mensagem ou reação de quem não vimos entrar.
    pub async fn on_activity(&self, participant_id: Uuid, tg_chat_id: i64, at: DateTime<Utc>) -> Result<MembershipChange, AppError> {
        self.ensure_active(participant_id, tg_chat_id, at).await
    }

    pub async fn on_leave(&self, participant_id: Uuid, tg_chat_id: i64, at: DateTime<Utc>) -> Result<MembershipChange, AppError> {
        match self.store.find(participant_id, tg_chat_id).await? {
            Some(row) if !row.is_active => Ok(MembershipChange::Unchanged),
            Some(_) => Ok(self.deactivated(participant_id, tg_chat_id, at).await?),
            None => {
                // Saída de quem nunca vimos: registra a linha já inativa
                if self.store.insert(participant_id, tg_chat_id, false, at).await? {
                    return Ok(MembershipChange::Deactivated);
                }
                self.deactivated(participant_id, tg_chat_id, at).await
            }
        }
    }

    async fn ensure_active(&self, participant_id: Uuid, tg_chat_id: i64, at: DateTime<Utc>) -> Result<MembershipChange, AppError> {
        match self.store.find(participant_id, tg_chat_id).await? {
            Some(row) if row.is_active => Ok(MembershipChange::Unchanged),
            Some(_) => self.reactivated(participant_id, tg_chat_id, at).await,
            None => {
                if self.store.insert(participant_id, tg_chat_id, true, at).await? {
                    tracing::debug!(%participant_id, chat_id = tg_chat_id, "Nova participação no grupo");
                    return Ok(MembershipChange::Created);
                }
                // Outra escrita criou a linha entre a busca e o INSERT
                self.reactivated(participant_id, tg_chat_id, at).await
            }
        }
    }

    async fn reactivated(&self, participant_id: Uuid, tg_chat_id: i64, at: DateTime<Utc>) -> Result<MembershipChange, AppError> {
        Ok(if self.store.reactivate(participant_id, tg_chat_id, at).await? {
            MembershipChange::Reactivated
        } else {
            MembershipChange::Unchanged
        })
    }

    async fn deactivated(&self, participant_id: Uuid, tg_chat_id: i64, at: DateTime<Utc>) -> Result<MembershipChange, AppError> {
        Ok(if self.store.deactivate(participant_id, tg_chat_id, at).await? {
            MembershipChange::Deactivated
        } else {
            MembershipChange::Unchanged
        })
    }
}
