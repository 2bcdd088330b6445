// src/db/outbox_repo.rs

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{types::Json, PgPool};
use uuid::Uuid;

use crate::{
    common::error::AppError,
    db::store::OutboxStore,
    models::outbox::{OutboxEntry, PlatformAction, OUTBOX_MAX_ATTEMPTS},
};

#[derive(Clone)]
pub struct OutboxRepository {
    pool: PgPool,
}

impl OutboxRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl OutboxStore for OutboxRepository {
    async fn enqueue(&self, application_id: Option<Uuid>, action: &PlatformAction) -> Result<i64, AppError> {
        let id = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO platform_outbox (application_id, action)
            VALUES ($1, $2)
            RETURNING id
            "#,
        )
        .bind(application_id)
        .bind(Json(action))
        .fetch_one(&self.pool)
        .await?;

        Ok(id)
    }

    async fn claim_due(&self, now: DateTime<Utc>, lease_until: DateTime<Utc>, limit: i64) -> Result<Vec<OutboxEntry>, AppError> {
        // SKIP LOCKED + lease em next_attempt_at: dois drains nunca executam a mesma entrada
        let entries = sqlx::query_as::<_, OutboxEntry>(
            r#"
            WITH claimable AS (
                SELECT id FROM platform_outbox
                WHERE done_at IS NULL AND attempts < $3 AND next_attempt_at <= $1
                ORDER BY next_attempt_at ASC
                LIMIT $2
                FOR UPDATE SKIP LOCKED
            )
            UPDATE platform_outbox o
            SET next_attempt_at = $4
            FROM claimable c
            WHERE o.id = c.id
            RETURNING o.id, o.application_id, o.action, o.attempts, o.last_error, o.next_attempt_at, o.done_at, o.created_at
            "#,
        )
        .bind(now)
        .bind(limit)
        .bind(OUTBOX_MAX_ATTEMPTS)
        .bind(lease_until)
        .fetch_all(&self.pool)
        .await?;

        Ok(entries)
    }

    async fn mark_done(&self, id: i64, at: DateTime<Utc>) -> Result<(), AppError> {
        sqlx::query("UPDATE platform_outbox SET done_at = $2, attempts = attempts + 1 WHERE id = $1")
            .bind(id)
            .bind(at)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn mark_failed(&self, id: i64, error: &str, next_attempt_at: DateTime<Utc>) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE platform_outbox
            SET attempts = attempts + 1, last_error = $2, next_attempt_at = $3
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(error)
        .bind(next_attempt_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
