// src/services/ingestion_service.rs

// Orquestra uma entrega do webhook: normaliza, resolve os tenants e, para cada um,
// identidade → filiação → ledger (→ pipeline, nos pedidos de entrada).

use std::sync::Arc;

use uuid::Uuid;

use crate::{
    common::error::AppError,
    db::ParticipantStore,
    models::event::{Actor, Classification, IgnoreReason, NormalizedEvent},
    services::{
        activity_service::{self, ActivityLedger},
        identity_service::IdentityService,
        membership_service::MembershipTracker,
        normalizer::{classify, parse_update},
        org_resolver::OrgResolver,
        pipeline_service::PipelineEngine,
    },
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// update_id já processado antes
    Duplicate,
    Ignored(IgnoreReason),
    BotStatus { archived: u64 },
    Processed { tenants: usize, failed: usize },
}

#[derive(Clone)]
pub struct IngestionService {
    orgs: OrgResolver,
    identity: IdentityService,
    membership: MembershipTracker,
    ledger: ActivityLedger,
    pipeline: PipelineEngine,
    participants: Arc<dyn ParticipantStore>,
}

impl IngestionService {
    pub fn new(
        orgs: OrgResolver,
        identity: IdentityService,
        membership: MembershipTracker,
        ledger: ActivityLedger,
        pipeline: PipelineEngine,
        participants: Arc<dyn ParticipantStore>,
    ) -> Self {
        Self { orgs, identity, membership, ledger, pipeline, participants }
    }

    /// Processa o corpo cru de uma entrega. Erros de um tenant não interrompem os demais.
    pub async fn ingest(&self, body: &[u8]) -> Result<IngestOutcome, AppError> {
        let update = parse_update(body)?;
        let update_id = update.update_id;

        if self.ledger.is_update_processed(update_id).await? {
            tracing::debug!(update_id, "Update reentregue, ignorando");
            return Ok(IngestOutcome::Duplicate);
        }

        let (outcome, chat_id) = match classify(&update) {
            Classification::Ignored(reason) => {
                tracing::debug!(update_id, ?reason, "Update ignorado");
                (IngestOutcome::Ignored(reason), None)
            }
            Classification::Event(event) => {
                let chat_id = event.chat().id;
                (self.dispatch(update_id, &event).await?, Some(chat_id))
            }
        };

        self.ledger.record_update(update_id, chat_id).await?;
        Ok(outcome)
    }

    async fn dispatch(&self, update_id: i64, event: &NormalizedEvent) -> Result<IngestOutcome, AppError> {
        if let NormalizedEvent::BotStatusChanged(status) = event {
            let archived = self.orgs.on_bot_status(status).await?;
            return Ok(IngestOutcome::BotStatus { archived });
        }

        let chat = event.chat();
        let tenants = self.orgs.resolve(chat).await?;
        if tenants.is_empty() {
            return Ok(IngestOutcome::Processed { tenants: 0, failed: 0 });
        }

        if let Err(e) = self.orgs.touch(chat.id, event.at()).await {
            tracing::warn!(chat_id = chat.id, error = %e, "Falha ao atualizar a última atividade do grupo");
        }

        let mut failed = 0;
        for tenant_id in &tenants {
            if let Err(e) = self.process_for_tenant(*tenant_id, event).await {
                failed += 1;
                tracing::error!(
                    update_id,
                    %tenant_id,
                    chat_id = chat.id,
                    kind = event.kind(),
                    error = %e,
                    "❌ Falha ao processar evento para o tenant"
                );
            }
        }

        Ok(IngestOutcome::Processed { tenants: tenants.len(), failed })
    }

    async fn process_for_tenant(&self, tenant_id: Uuid, event: &NormalizedEvent) -> Result<(), AppError> {
        match event {
            NormalizedEvent::Message(message) => {
                let pid = self.participant(tenant_id, &message.actor).await?;
                self.membership.on_activity(pid, message.chat.id, message.at).await?;
                self.ledger
                    .append(&activity_service::message_row(tenant_id, pid, message))
                    .await?;
                self.participants.touch_activity(pid, message.at).await?;
            }
            NormalizedEvent::Join(join) => {
                for member in &join.members {
                    let pid = self.participant(tenant_id, member).await?;
                    self.membership.on_join(pid, join.chat.id, join.at).await?;
                    self.ledger
                        .append(&activity_service::join_row(tenant_id, pid, join, member))
                        .await?;
                }
            }
            NormalizedEvent::Leave(leave) => {
                let pid = self.participant(tenant_id, &leave.member).await?;
                self.membership.on_leave(pid, leave.chat.id, leave.at).await?;
                self.ledger
                    .append(&activity_service::leave_row(tenant_id, pid, leave))
                    .await?;
            }
            NormalizedEvent::Reaction(reaction) => {
                let pid = self.participant(tenant_id, &reaction.actor).await?;
                self.membership.on_activity(pid, reaction.chat.id, reaction.at).await?;
                self.ledger
                    .append(&activity_service::reaction_row(tenant_id, pid, reaction))
                    .await?;
                self.participants.touch_activity(pid, reaction.at).await?;
            }
            NormalizedEvent::Callback(callback) => {
                let pid = self.participant(tenant_id, &callback.actor).await?;
                self.ledger
                    .append(&activity_service::callback_row(tenant_id, pid, callback))
                    .await?;
                self.participants.touch_activity(pid, callback.at).await?;
            }
            NormalizedEvent::JoinRequest(request) => {
                let pid = self.participant(tenant_id, &request.actor).await?;
                self.ledger
                    .append(&activity_service::join_request_row(tenant_id, pid, request))
                    .await?;
                let outcome = self.pipeline.on_join_request(tenant_id, Some(pid), request).await?;
                tracing::info!(
                    %tenant_id,
                    chat_id = request.chat.id,
                    tg_user_id = request.actor.tg_user_id,
                    application_id = ?outcome.application_id,
                    decision = ?outcome.decision,
                    "Pedido de entrada avaliado"
                );
            }
            // Tratado antes da distribuição por tenant
            NormalizedEvent::BotStatusChanged(_) => {}
        }
        Ok(())
    }

    async fn participant(&self, tenant_id: Uuid, actor: &Actor) -> Result<Uuid, AppError> {
        let resolved = self.identity.resolve(tenant_id, actor.tg_user_id, &actor.observed()).await?;
        Ok(resolved.participant_id)
    }
}
