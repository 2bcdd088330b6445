// src/db/activity_repo.rs

use async_trait::async_trait;
use sqlx::{types::Json, PgPool};

use crate::{
    common::{db_utils::map_conflict, error::AppError},
    db::store::ActivityStore,
    models::activity::{NaturalKey, NewActivityEvent},
};

#[derive(Clone)]
pub struct ActivityRepository {
    pool: PgPool,
}

impl ActivityRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ActivityStore for ActivityRepository {
    // =========================================================================
    //  LEDGER (somente inserção)
    // =========================================================================

    async fn find_by_key(&self, key: &NaturalKey) -> Result<Option<i64>, AppError> {
        let id = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT id FROM activity_events
            WHERE tenant_id = $1 AND tg_chat_id = $2 AND message_id = $3
              AND event_type = $4 AND tg_user_id = $5
            "#,
        )
        .bind(key.tenant_id)
        .bind(key.tg_chat_id)
        .bind(key.message_id)
        .bind(key.event_type)
        .bind(key.tg_user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(id)
    }

    async fn insert(&self, event: &NewActivityEvent) -> Result<i64, AppError> {
        let mut tx = self.pool.begin().await?;

        // created_at = data do provedor, para updates atrasados caírem no dia certo
        let id = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO activity_events (
                tenant_id, event_type, tg_user_id, participant_id, tg_chat_id,
                message_id, message_thread_id, reply_to_message_id,
                chars_count, links_count, mentions_count, meta, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            RETURNING id
            "#,
        )
        .bind(event.tenant_id)
        .bind(event.event_type)
        .bind(event.tg_user_id)
        .bind(event.participant_id)
        .bind(event.tg_chat_id)
        .bind(event.message_id)
        .bind(event.message_thread_id)
        .bind(event.reply_to_message_id)
        .bind(event.chars_count)
        .bind(event.links_count)
        .bind(event.mentions_count)
        .bind(Json(&event.meta))
        .bind(event.occurred_at)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| map_conflict(e, "evento de atividade"))?;

        if let Some(body) = event.text.as_deref().filter(|t| !t.is_empty()) {
            sqlx::query("INSERT INTO activity_event_texts (event_id, body) VALUES ($1, $2)")
                .bind(id)
                .bind(body)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(id)
    }

    // =========================================================================
    //  IDEMPOTÊNCIA POR UPDATE
    // =========================================================================

    async fn is_update_processed(&self, update_id: i64) -> Result<bool, AppError> {
        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS (SELECT 1 FROM processed_updates WHERE update_id = $1)",
        )
        .bind(update_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(exists)
    }

    async fn record_update(&self, update_id: i64, tg_chat_id: Option<i64>) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO processed_updates (update_id, tg_chat_id)
            VALUES ($1, $2)
            ON CONFLICT (update_id) DO NOTHING
            "#,
        )
        .bind(update_id)
        .bind(tg_chat_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
