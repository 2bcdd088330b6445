// src/services/outbox_service.rs

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use crate::{
    common::error::AppError,
    db::OutboxStore,
    models::outbox::{OutboxEntry, OUTBOX_MAX_ATTEMPTS},
    services::platform_client::PlatformClient,
};

const BASE_BACKOFF_SECS: i64 = 30;
const BATCH_SIZE: i64 = 50;
// Tempo que uma entrada reivindicada fica fora do alcance de outros drains
const CLAIM_LEASE_SECS: i64 = 300;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DrainReport {
    pub delivered: usize,
    pub skipped: usize,
    pub retried: usize,
    pub exhausted: usize,
}

/// Reexecuta as ações na plataforma que falharam de forma inesperada.
#[derive(Clone)]
pub struct OutboxRelay {
    store: Arc<dyn OutboxStore>,
    platform: Arc<dyn PlatformClient>,
}

impl OutboxRelay {
    pub fn new(store: Arc<dyn OutboxStore>, platform: Arc<dyn PlatformClient>) -> Self {
        Self { store, platform }
    }

    pub async fn drain(&self, now: DateTime<Utc>) -> Result<DrainReport, AppError> {
        let mut report = DrainReport::default();
        let lease_until = now + Duration::seconds(CLAIM_LEASE_SECS);

        for entry in self.store.claim_due(now, lease_until, BATCH_SIZE).await? {
            let result = self.platform.execute(&entry.action.0).await;

            if result.ok {
                self.close(&entry, now).await;
                report.delivered += 1;
                continue;
            }
            if result.is_expected_failure() {
                tracing::info!(outbox_id = entry.id, error = %result.error_summary(), "Ação descartada: alvo indisponível");
                self.close(&entry, now).await;
                report.skipped += 1;
                continue;
            }

            let attempt = entry.attempts + 1;
            if let Err(e) = self
                .store
                .mark_failed(entry.id, &result.error_summary(), next_attempt_at(&entry, now))
                .await
            {
                // A entrada volta quando o lease vencer
                tracing::error!(outbox_id = entry.id, error = %e, "❌ Falha ao reagendar entrada da fila");
            }
            if attempt >= OUTBOX_MAX_ATTEMPTS {
                tracing::error!(
                    outbox_id = entry.id,
                    application_id = ?entry.application_id,
                    attempts = attempt,
                    error = %result.error_summary(),
                    "❌ Ação na plataforma esgotou as tentativas"
                );
                report.exhausted += 1;
            } else {
                tracing::warn!(outbox_id = entry.id, attempts = attempt, error = %result.error_summary(), "Nova falha, reagendando");
                report.retried += 1;
            }
        }

        if report != DrainReport::default() {
            tracing::info!(?report, "Fila de ações processada");
        }
        Ok(report)
    }

    // A ação já rodou: uma falha aqui não pode interromper o resto do lote
    async fn close(&self, entry: &OutboxEntry, now: DateTime<Utc>) {
        if let Err(e) = self.store.mark_done(entry.id, now).await {
            tracing::error!(outbox_id = entry.id, error = %e, "❌ Falha ao encerrar entrada da fila");
        }
    }
}

/// Backoff exponencial: 30s, 60s, 120s...
fn next_attempt_at(entry: &OutboxEntry, now: DateTime<Utc>) -> DateTime<Utc> {
    let exponent = entry.attempts.clamp(0, 10) as u32;
    now + Duration::seconds(BASE_BACKOFF_SECS * 2_i64.pow(exponent))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        db::memory::MemoryStore,
        models::outbox::PlatformAction,
        services::platform_client::{recording::RecordingPlatform, ActionResult},
    };

    fn setup() -> (Arc<MemoryStore>, Arc<RecordingPlatform>, OutboxRelay) {
        let store = Arc::new(MemoryStore::new());
        let platform = Arc::new(RecordingPlatform::new());
        let relay = OutboxRelay::new(store.clone(), platform.clone());
        (store, platform, relay)
    }

    #[tokio::test]
    async fn delivered_entries_are_closed() {
        let (store, platform, relay) = setup();
        let action = PlatformAction::ApproveJoinRequest { chat_id: 100, user_id: 42 };
        store.enqueue(None, &action).await.unwrap();

        let report = relay.drain(Utc::now()).await.unwrap();

        assert_eq!(report.delivered, 1);
        assert_eq!(platform.calls(), vec![action]);
        assert!(store.outbox()[0].done_at.is_some());
        assert_eq!(relay.drain(Utc::now()).await.unwrap(), DrainReport::default());
    }

    #[tokio::test]
    async fn failures_back_off_and_stop_after_max_attempts() {
        let (store, platform, relay) = setup();
        platform.fail("send", ActionResult::failure(Some(500), Some("Internal Server Error".into())));
        store
            .enqueue(None, &PlatformAction::SendMessage { chat_id: 42, text: "oi".into() })
            .await
            .unwrap();

        let mut now = Utc::now();
        let first = relay.drain(now).await.unwrap();
        assert_eq!(first.retried, 1);
        // Ainda dentro do backoff
        assert_eq!(relay.drain(now).await.unwrap(), DrainReport::default());

        for _ in 1..OUTBOX_MAX_ATTEMPTS {
            now += Duration::hours(2);
            relay.drain(now).await.unwrap();
        }

        let entry = &store.outbox()[0];
        assert_eq!(entry.attempts, OUTBOX_MAX_ATTEMPTS);
        assert!(entry.done_at.is_none());
        assert_eq!(entry.last_error.as_deref(), Some("500: Internal Server Error"));

        now += Duration::days(1);
        assert_eq!(relay.drain(now).await.unwrap(), DrainReport::default());
        assert_eq!(platform.calls().len(), OUTBOX_MAX_ATTEMPTS as usize);
    }

    #[tokio::test]
    async fn claimed_entries_are_not_handed_out_twice() {
        let (store, _, _) = setup();
        store
            .enqueue(None, &PlatformAction::BanMember { chat_id: 100, user_id: 42 })
            .await
            .unwrap();
        let now = Utc::now();
        let lease = now + Duration::minutes(5);

        let (first, second) = tokio::join!(store.claim_due(now, lease, 10), store.claim_due(now, lease, 10));
        assert_eq!(first.unwrap().len() + second.unwrap().len(), 1);

        // Lease vencido sem encerramento: a entrada volta
        assert_eq!(store.claim_due(lease, lease + Duration::minutes(5), 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn store_failure_after_delivery_does_not_abort_the_batch() {
        let (store, platform, relay) = setup();
        for user_id in [1, 2, 3] {
            store
                .enqueue(None, &PlatformAction::ApproveJoinRequest { chat_id: 100, user_id })
                .await
                .unwrap();
        }
        store.fail_outbox_writes();

        let now = Utc::now();
        let report = relay.drain(now).await.unwrap();

        assert_eq!(report.delivered, 3);
        assert_eq!(platform.calls().len(), 3);
        // Ainda sob lease: não reexecuta no próximo tick
        assert_eq!(relay.drain(now + Duration::seconds(60)).await.unwrap(), DrainReport::default());
        assert_eq!(platform.calls().len(), 3);
    }

    #[tokio::test]
    async fn expected_failure_closes_entry_without_retry() {
        let (store, platform, relay) = setup();
        platform.fail("send", ActionResult::failure(Some(403), Some("Forbidden: bot was blocked by the user".into())));
        store
            .enqueue(None, &PlatformAction::SendMessage { chat_id: 42, text: "oi".into() })
            .await
            .unwrap();

        let report = relay.drain(Utc::now()).await.unwrap();

        assert_eq!(report.skipped, 1);
        assert!(store.outbox()[0].done_at.is_some());
    }
}
