// src/db/metrics_repo.rs

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::{
    common::error::AppError,
    db::store::MetricsStore,
    models::{
        activity::ActivityEventType,
        metrics::{DayWindow, GroupMetricsDay},
    },
};

#[derive(Clone)]
pub struct MetricsRepository {
    pool: PgPool,
}

impl MetricsRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MetricsStore for MetricsRepository {
    // =========================================================================
    //  CONTADORES (sempre a partir do ledger)
    // =========================================================================

    async fn count_events(
        &self,
        tenant_id: Uuid,
        tg_chat_id: i64,
        event_type: ActivityEventType,
        window: DayWindow,
    ) -> Result<i64, AppError> {
        let count = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*) FROM activity_events
            WHERE tenant_id = $1 AND tg_chat_id = $2 AND event_type = $3
              AND created_at >= $4 AND created_at < $5
            "#,
        )
        .bind(tenant_id)
        .bind(tg_chat_id)
        .bind(event_type)
        .bind(window.start)
        .bind(window.end)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    async fn count_replies(&self, tenant_id: Uuid, tg_chat_id: i64, window: DayWindow) -> Result<i64, AppError> {
        let count = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*) FROM activity_events
            WHERE tenant_id = $1 AND tg_chat_id = $2 AND event_type = 'message'
              AND reply_to_message_id IS NOT NULL
              AND created_at >= $3 AND created_at < $4
            "#,
        )
        .bind(tenant_id)
        .bind(tg_chat_id)
        .bind(window.start)
        .bind(window.end)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    async fn count_active_users(&self, tenant_id: Uuid, tg_chat_id: i64, window: DayWindow) -> Result<i64, AppError> {
        // Pessoas, não contas: registros mesclados contam como o canônico
        let count = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(DISTINCT COALESCE(p.merged_into, p.id))
                 + COUNT(DISTINCT e.tg_user_id) FILTER (WHERE e.participant_id IS NULL)
            FROM activity_events e
            LEFT JOIN participants p ON p.id = e.participant_id
            WHERE e.tenant_id = $1 AND e.tg_chat_id = $2
              AND e.event_type IN ('message', 'reaction', 'callback')
              AND e.created_at >= $3 AND e.created_at < $4
            "#,
        )
        .bind(tenant_id)
        .bind(tg_chat_id)
        .bind(window.start)
        .bind(window.end)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    async fn upsert_day(&self, row: &GroupMetricsDay) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO group_metrics (
                tenant_id, tg_chat_id, day, active_user_count, message_count,
                reply_count, reply_ratio, join_count, leave_count, net_member_change, computed_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, NOW())
            ON CONFLICT (tenant_id, tg_chat_id, day) DO UPDATE
            SET active_user_count = EXCLUDED.active_user_count,
                message_count = EXCLUDED.message_count,
                reply_count = EXCLUDED.reply_count,
                reply_ratio = EXCLUDED.reply_ratio,
                join_count = EXCLUDED.join_count,
                leave_count = EXCLUDED.leave_count,
                net_member_change = EXCLUDED.net_member_change,
                computed_at = NOW()
            "#,
        )
        .bind(row.tenant_id)
        .bind(row.tg_chat_id)
        .bind(row.day)
        .bind(row.active_user_count)
        .bind(row.message_count)
        .bind(row.reply_count)
        .bind(row.reply_ratio)
        .bind(row.join_count)
        .bind(row.leave_count)
        .bind(row.net_member_change)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // =========================================================================
    //  ENGAJAMENTO
    // =========================================================================

    async fn message_counts_since(&self, tenant_id: Uuid, since: DateTime<Utc>) -> Result<Vec<(Uuid, i64)>, AppError> {
        // Eventos de registros mesclados contam para o canônico
        let rows = sqlx::query_as::<_, (Uuid, i64)>(
            r#"
            SELECT COALESCE(p.merged_into, p.id) AS participant_id, COUNT(*) AS messages
            FROM activity_events e
            JOIN participants p ON p.id = e.participant_id
            WHERE e.tenant_id = $1 AND e.event_type = 'message' AND e.created_at >= $2
            GROUP BY 1
            "#,
        )
        .bind(tenant_id)
        .bind(since)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }
}
