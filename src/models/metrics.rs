// src/models/metrics.rs

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

// Uma linha por (tenant, chat, dia). Sempre recalculada a partir do ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct GroupMetricsDay {
    pub tenant_id: Uuid,
    pub tg_chat_id: i64,
    pub day: NaiveDate,
    pub active_user_count: i32,
    pub message_count: i32,
    pub reply_count: i32,
    pub reply_ratio: i32,
    pub join_count: i32,
    pub leave_count: i32,
    pub net_member_change: i32,
}

/// Janela [início, fim) em UTC de um dia do calendário.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DayWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl DayWindow {
    pub fn for_day(day: NaiveDate) -> Self {
        let start = day.and_hms_opt(0, 0, 0).unwrap_or_default().and_utc();
        Self { start, end: start + chrono::Duration::days(1) }
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        at >= self.start && at < self.end
    }
}
