// src/services/scheduler.rs

// Jobs periódicos, independentes da carga do webhook.

use std::{collections::BTreeSet, future::Future, time::Duration};

use chrono::{Days, NaiveDate, Utc};
use tokio::{task::JoinHandle, time::MissedTickBehavior};
use uuid::Uuid;

use crate::{
    common::error::AppError,
    services::{
        engagement::EngagementService, metrics_service::MetricsAggregator, org_resolver::OrgResolver,
        outbox_service::OutboxRelay, recovery::WebhookRecovery,
    },
};

#[derive(Debug, Clone, Copy)]
pub struct JobIntervals {
    pub metrics_rollup: Duration,
    pub outbox: Duration,
    pub webhook_health: Duration,
    pub engagement: Duration,
}

/// Sobe todos os jobs; a recuperação do webhook só roda se houver URL pública.
pub fn spawn_jobs(
    intervals: JobIntervals,
    orgs: OrgResolver,
    metrics: MetricsAggregator,
    outbox: OutboxRelay,
    engagement: EngagementService,
    recovery: Option<WebhookRecovery>,
) -> Vec<JoinHandle<()>> {
    let mut handles = Vec::new();

    {
        let orgs = orgs.clone();
        handles.push(every("metrics_rollup", intervals.metrics_rollup, move || {
            let orgs = orgs.clone();
            let metrics = metrics.clone();
            async move { rollup_tick(&orgs, &metrics, Utc::now().date_naive()).await.map(|_| ()) }
        }));
    }

    handles.push(every("outbox", intervals.outbox, move || {
        let outbox = outbox.clone();
        async move { outbox.drain(Utc::now()).await.map(|_| ()) }
    }));

    handles.push(every("engagement", intervals.engagement, move || {
        let orgs = orgs.clone();
        let engagement = engagement.clone();
        async move {
            for tenant_id in bound_tenants(&orgs).await? {
                if let Err(e) = engagement.refresh(tenant_id, Utc::now()).await {
                    tracing::warn!(%tenant_id, error = %e, "Falha ao recalcular engajamento do tenant");
                }
            }
            Ok::<(), AppError>(())
        }
    }));

    match recovery {
        Some(recovery) => handles.push(every("webhook_health", intervals.webhook_health, move || {
            let recovery = recovery.clone();
            async move { recovery.check().await.map(|_| ()) }
        })),
        None => tracing::info!("PUBLIC_BASE_URL ausente, verificação do webhook desativada"),
    }

    handles
}

fn every<F, Fut>(job: &'static str, period: Duration, mut tick: F) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<(), AppError>> + Send,
{
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            if let Err(e) = tick().await {
                tracing::error!(job, error = %e, "❌ Falha no job periódico");
            }
        }
    })
}

/// Hoje e ontem para cada vínculo ativo; ontem cobre eventos que chegaram atrasados.
pub async fn rollup_tick(orgs: &OrgResolver, metrics: &MetricsAggregator, today: NaiveDate) -> Result<usize, AppError> {
    let yesterday = today.checked_sub_days(Days::new(1)).unwrap_or(today);
    let mut rolled = 0;

    for binding in orgs.list_active_bindings().await? {
        match metrics.rollup_range(binding.tenant_id, binding.tg_chat_id, yesterday, today).await {
            Ok(days) => rolled += days,
            Err(e) => tracing::warn!(
                tenant_id = %binding.tenant_id,
                chat_id = binding.tg_chat_id,
                error = %e,
                "Falha no rollup do grupo"
            ),
        }
    }

    tracing::debug!(rolled, "Rollup de métricas concluído");
    Ok(rolled)
}

async fn bound_tenants(orgs: &OrgResolver) -> Result<BTreeSet<Uuid>, AppError> {
    Ok(orgs.list_active_bindings().await?.into_iter().map(|b| b.tenant_id).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory::MemoryStore;
    use std::sync::Arc;

    #[tokio::test]
    async fn rollup_tick_covers_today_and_yesterday_for_each_binding() {
        let store = Arc::new(
            MemoryStore::new()
                .with_binding(Uuid::new_v4(), 100)
                .with_binding(Uuid::new_v4(), 200),
        );
        let orgs = OrgResolver::new(store.clone());
        let metrics = MetricsAggregator::new(store.clone());
        let today = NaiveDate::from_ymd_opt(2025, 3, 10).unwrap();

        let rolled = rollup_tick(&orgs, &metrics, today).await.unwrap();

        assert_eq!(rolled, 4);
        assert_eq!(store.metrics_rows(), 4);
    }
}
