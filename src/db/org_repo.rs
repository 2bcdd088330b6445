// src/db/org_repo.rs

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::{
    common::error::AppError,
    db::store::OrgStore,
    models::org::{BotStatus, OrgChatBinding},
};

#[derive(Clone)]
pub struct OrgRepository {
    pool: PgPool,
}

impl OrgRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl OrgStore for OrgRepository {
    // =========================================================================
    //  VÍNCULOS (tenant ↔ chat)
    // =========================================================================

    async fn active_tenants_for_chat(&self, tg_chat_id: i64) -> Result<Vec<Uuid>, AppError> {
        let tenants = sqlx::query_scalar::<_, Uuid>(
            r#"
            SELECT tenant_id
            FROM org_chat_bindings
            WHERE tg_chat_id = $1 AND status = 'active'
            ORDER BY created_at ASC
            "#,
        )
        .bind(tg_chat_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(tenants)
    }

    async fn archive_bindings(&self, tg_chat_id: i64, reason: &str) -> Result<u64, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE org_chat_bindings
            SET status = 'archived', archived_reason = $2, archived_at = NOW()
            WHERE tg_chat_id = $1 AND status = 'active'
            "#,
        )
        .bind(tg_chat_id)
        .bind(reason)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn bind_chat(&self, tenant_id: Uuid, tg_chat_id: i64) -> Result<OrgChatBinding, AppError> {
        // Religar um vínculo arquivado reaproveita a mesma linha
        let binding = sqlx::query_as::<_, OrgChatBinding>(
            r#"
            INSERT INTO org_chat_bindings (tenant_id, tg_chat_id, status)
            VALUES ($1, $2, 'active')
            ON CONFLICT (tenant_id, tg_chat_id) DO UPDATE
            SET status = 'active', archived_reason = NULL, archived_at = NULL
            RETURNING tenant_id, tg_chat_id, status, archived_reason, archived_at, created_at
            "#,
        )
        .bind(tenant_id)
        .bind(tg_chat_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(binding)
    }

    async fn list_active_bindings(&self) -> Result<Vec<OrgChatBinding>, AppError> {
        let bindings = sqlx::query_as::<_, OrgChatBinding>(
            r#"
            SELECT tenant_id, tg_chat_id, status, archived_reason, archived_at, created_at
            FROM org_chat_bindings
            WHERE status = 'active'
            ORDER BY tenant_id, tg_chat_id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(bindings)
    }

    // =========================================================================
    //  GRUPOS (registro global, independente de tenant)
    // =========================================================================

    async fn ensure_pending_group(&self, tg_chat_id: i64, title: Option<&str>) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO telegram_groups (tg_chat_id, title, bot_status)
            VALUES ($1, $2, 'pending')
            ON CONFLICT (tg_chat_id) DO UPDATE
            SET title = COALESCE(EXCLUDED.title, telegram_groups.title)
            "#,
        )
        .bind(tg_chat_id)
        .bind(title)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn set_bot_status(&self, tg_chat_id: i64, title: Option<&str>, status: BotStatus) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO telegram_groups (tg_chat_id, title, bot_status, last_sync_at)
            VALUES ($1, $2, $3, NOW())
            ON CONFLICT (tg_chat_id) DO UPDATE
            SET bot_status = EXCLUDED.bot_status,
                title = COALESCE(EXCLUDED.title, telegram_groups.title),
                last_sync_at = NOW()
            "#,
        )
        .bind(tg_chat_id)
        .bind(title)
        .bind(status)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn touch_group_activity(&self, tg_chat_id: i64, at: DateTime<Utc>) -> Result<(), AppError> {
        // GREATEST: updates fora de ordem não fazem o relógio andar para trás
        sqlx::query(
            r#"
            UPDATE telegram_groups
            SET last_activity_at = GREATEST(COALESCE(last_activity_at, $2), $2)
            WHERE tg_chat_id = $1
            "#,
        )
        .bind(tg_chat_id)
        .bind(at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
