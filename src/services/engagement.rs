// src/services/engagement.rs

use std::{collections::HashMap, sync::Arc};

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::{
    common::error::AppError,
    db::{MetricsStore, ParticipantStore},
    models::participant::Participant,
};

// --- Escada de engajamento (única fonte) ---
pub const SILENT_AFTER_DAYS: i64 = 30;
pub const NEVER_ACTIVE_GRACE_DAYS: i64 = 7;
pub const NEWCOMER_DAYS: i64 = 30;
pub const CORE_SCORE: i32 = 60;
pub const EXPERIENCED_SCORE: i32 = 30;
pub const SCORE_WINDOW_DAYS: i64 = 30;
pub const MAX_SCORE: i64 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngagementCategory {
    Silent,
    Newcomer,
    Core,
    Experienced,
    Other,
}

impl EngagementCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            EngagementCategory::Silent => "silent",
            EngagementCategory::Newcomer => "newcomer",
            EngagementCategory::Core => "core",
            EngagementCategory::Experienced => "experienced",
            EngagementCategory::Other => "other",
        }
    }
}

/// A primeira regra que casar vence.
pub fn categorize(
    joined_at: DateTime<Utc>,
    last_activity_at: Option<DateTime<Utc>>,
    score: i32,
    now: DateTime<Utc>,
) -> EngagementCategory {
    match last_activity_at {
        Some(last) if now - last > Duration::days(SILENT_AFTER_DAYS) => return EngagementCategory::Silent,
        None if now - joined_at > Duration::days(NEVER_ACTIVE_GRACE_DAYS) => return EngagementCategory::Silent,
        _ => {}
    }
    if now - joined_at < Duration::days(NEWCOMER_DAYS) {
        return EngagementCategory::Newcomer;
    }
    if score >= CORE_SCORE {
        EngagementCategory::Core
    } else if score >= EXPERIENCED_SCORE {
        EngagementCategory::Experienced
    } else {
        EngagementCategory::Other
    }
}

#[derive(Clone)]
pub struct EngagementService {
    participants: Arc<dyn ParticipantStore>,
    metrics: Arc<dyn MetricsStore>,
}

impl EngagementService {
    pub fn new(participants: Arc<dyn ParticipantStore>, metrics: Arc<dyn MetricsStore>) -> Self {
        Self { participants, metrics }
    }

    /// Recalcula score e categoria de todos os participantes canônicos do tenant.
    pub async fn refresh(&self, tenant_id: Uuid, now: DateTime<Utc>) -> Result<usize, AppError> {
        let since = now - Duration::days(SCORE_WINDOW_DAYS);
        let counts: HashMap<Uuid, i64> = self.metrics.message_counts_since(tenant_id, since).await?.into_iter().collect();

        let mut updated = 0;
        for participant in self.participants.list_canonical(tenant_id).await? {
            let score = counts.get(&participant.id).copied().unwrap_or(0).min(MAX_SCORE) as i32;
            let category = categorize(participant.created_at, participant.last_activity_at, score, now);
            if unchanged(&participant, score, category) {
                continue;
            }
            self.participants
                .update_engagement(participant.id, score, category.as_str())
                .await?;
            updated += 1;
        }

        tracing::info!(%tenant_id, updated, "✅ Engajamento recalculado");
        Ok(updated)
    }
}

fn unchanged(participant: &Participant, score: i32, category: EngagementCategory) -> bool {
    participant.activity_score == score && participant.engagement_category.as_deref() == Some(category.as_str())
}
