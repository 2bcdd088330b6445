// src/services/metrics_service.rs

use std::sync::Arc;

use chrono::NaiveDate;
use uuid::Uuid;

use crate::{
    common::{db_utils::clamp_count, error::AppError},
    db::MetricsStore,
    models::{
        activity::ActivityEventType,
        metrics::{DayWindow, GroupMetricsDay},
    },
};

/// Rollup diário recalculado do zero a partir do ledger. Rodar de novo é seguro.
#[derive(Clone)]
pub struct MetricsAggregator {
    store: Arc<dyn MetricsStore>,
}

impl MetricsAggregator {
    pub fn new(store: Arc<dyn MetricsStore>) -> Self {
        Self { store }
    }

    pub async fn rollup(&self, tenant_id: Uuid, tg_chat_id: i64, day: NaiveDate) -> Result<GroupMetricsDay, AppError> {
        let window = DayWindow::for_day(day);
        let store = &self.store;

        // Um contador que falha vira zero; o resto do rollup segue
        let or_zero = |counter: &'static str, result: Result<i64, AppError>| match result {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(%tenant_id, chat_id = tg_chat_id, %day, counter, error = %e, "Falha num contador do rollup, usando 0");
                0
            }
        };

        let messages = or_zero(
            "message_count",
            store.count_events(tenant_id, tg_chat_id, ActivityEventType::Message, window).await,
        );
        let replies = or_zero("reply_count", store.count_replies(tenant_id, tg_chat_id, window).await);
        let joins = or_zero(
            "join_count",
            store.count_events(tenant_id, tg_chat_id, ActivityEventType::Join, window).await,
        );
        let leaves = or_zero(
            "leave_count",
            store.count_events(tenant_id, tg_chat_id, ActivityEventType::Leave, window).await,
        );
        let active_users = or_zero("active_user_count", store.count_active_users(tenant_id, tg_chat_id, window).await);

        let row = GroupMetricsDay {
            tenant_id,
            tg_chat_id,
            day,
            active_user_count: clamp_count(active_users),
            message_count: clamp_count(messages),
            reply_count: clamp_count(replies),
            reply_ratio: reply_ratio(replies, messages),
            join_count: clamp_count(joins),
            leave_count: clamp_count(leaves),
            net_member_change: (joins - leaves).clamp(i32::MIN as i64, i32::MAX as i64) as i32,
        };

        self.store.upsert_day(&row).await?;
        Ok(row)
    }

    /// Backfill: roda o rollup para cada dia de `from` até `to`, inclusive.
    pub async fn rollup_range(&self, tenant_id: Uuid, tg_chat_id: i64, from: NaiveDate, to: NaiveDate) -> Result<usize, AppError> {
        let mut days = 0;
        for day in from.iter_days().take_while(|d| *d <= to) {
            self.rollup(tenant_id, tg_chat_id, day).await?;
            days += 1;
        }
        Ok(days)
    }
}

/// Percentual de mensagens que são respostas, arredondado.
pub fn reply_ratio(replies: i64, messages: i64) -> i32 {
    if messages <= 0 {
        return 0;
    }
    ((replies as f64 / messages as f64) * 100.0).round() as i32
}
