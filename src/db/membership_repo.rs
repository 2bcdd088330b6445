// src/db/membership_repo.rs

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::{common::error::AppError, db::store::MembershipStore, models::membership::GroupMembership};

#[derive(Clone)]
pub struct MembershipRepository {
    pool: PgPool,
}

impl MembershipRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

// As transições usam UPDATE condicional: duas entregas concorrentes do mesmo
// evento resultam numa única mudança de estado.
#[async_trait]
impl MembershipStore for MembershipRepository {
    async fn find(&self, participant_id: Uuid, tg_chat_id: i64) -> Result<Option<GroupMembership>, AppError> {
        let membership = sqlx::query_as::<_, GroupMembership>(
            r#"
            SELECT participant_id, tg_chat_id, joined_at, left_at, is_active
            FROM group_memberships
            WHERE participant_id = $1 AND tg_chat_id = $2
            "#,
        )
        .bind(participant_id)
        .bind(tg_chat_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(membership)
    }

    async fn insert(&self, participant_id: Uuid, tg_chat_id: i64, active: bool, at: DateTime<Utc>) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            INSERT INTO group_memberships (participant_id, tg_chat_id, joined_at, left_at, is_active)
            VALUES ($1, $2, $3, CASE WHEN $4 THEN NULL ELSE $3 END, $4)
            ON CONFLICT (participant_id, tg_chat_id) DO NOTHING
            "#,
        )
        .bind(participant_id)
        .bind(tg_chat_id)
        .bind(at)
        .bind(active)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn reactivate(&self, participant_id: Uuid, tg_chat_id: i64, at: DateTime<Utc>) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE group_memberships
            SET is_active = TRUE, joined_at = $3, left_at = NULL
            WHERE participant_id = $1 AND tg_chat_id = $2 AND is_active = FALSE
            "#,
        )
        .bind(participant_id)
        .bind(tg_chat_id)
        .bind(at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn deactivate(&self, participant_id: Uuid, tg_chat_id: i64, at: DateTime<Utc>) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE group_memberships
            SET is_active = FALSE, left_at = $3
            WHERE participant_id = $1 AND tg_chat_id = $2 AND is_active = TRUE
            "#,
        )
        .bind(participant_id)
        .bind(tg_chat_id)
        .bind(at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}
