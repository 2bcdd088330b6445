// src/db/store.rs

// Contratos do armazenamento persistente consumidos pelos serviços.
// Os repositórios Postgres implementam cada trait; nos testes usamos o MemoryStore.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use crate::{
    common::error::AppError,
    models::{
        activity::{ActivityEventType, NaturalKey, NewActivityEvent},
        application::{Application, ApplicationEventKind, ApplicationForm, NewApplication, Pipeline, PipelineStage},
        membership::GroupMembership,
        metrics::{DayWindow, GroupMetricsDay},
        org::{BotStatus, OrgChatBinding},
        outbox::{OutboxEntry, PlatformAction},
        participant::{NewParticipant, Participant, ParticipantPatch},
    },
};

#[async_trait]
pub trait OrgStore: Send + Sync {
    /// Tenants com vínculo `active` para o chat.
    async fn active_tenants_for_chat(&self, tg_chat_id: i64) -> Result<Vec<Uuid>, AppError>;

    /// Cria o registro do grupo em `pending` se ainda não existir. Nunca cria vínculo.
    async fn ensure_pending_group(&self, tg_chat_id: i64, title: Option<&str>) -> Result<(), AppError>;

    async fn set_bot_status(&self, tg_chat_id: i64, title: Option<&str>, status: BotStatus) -> Result<(), AppError>;

    /// Arquiva todos os vínculos ativos do chat. Retorna quantos foram arquivados.
    async fn archive_bindings(&self, tg_chat_id: i64, reason: &str) -> Result<u64, AppError>;

    /// Vincula (ou reativa) o chat ao tenant.
    async fn bind_chat(&self, tenant_id: Uuid, tg_chat_id: i64) -> Result<OrgChatBinding, AppError>;

    async fn list_active_bindings(&self) -> Result<Vec<OrgChatBinding>, AppError>;

    async fn touch_group_activity(&self, tg_chat_id: i64, at: DateTime<Utc>) -> Result<(), AppError>;
}

#[async_trait]
pub trait ParticipantStore: Send + Sync {
    /// Busca pela chave externa ignorando registros mesclados.
    async fn find_by_external_id(&self, tenant_id: Uuid, tg_user_id: i64) -> Result<Option<Participant>, AppError>;

    /// Registro mesclado mais recente com essa chave externa (para seguir o redirecionamento).
    async fn find_merged_by_external_id(&self, tenant_id: Uuid, tg_user_id: i64) -> Result<Option<Participant>, AppError>;

    async fn find_by_id(&self, tenant_id: Uuid, id: Uuid) -> Result<Option<Participant>, AppError>;

    /// Upsert atômico por (tenant, tg_user_id). Retorna o registro vencedor e se foi criado agora.
    /// Pode devolver `UniqueConstraintViolation` quando perde a corrida.
    async fn create(&self, new: &NewParticipant) -> Result<(Participant, bool), AppError>;

    async fn apply_patch(&self, id: Uuid, patch: &ParticipantPatch) -> Result<(), AppError>;

    /// Aponta `duplicate` para `target` e reaponta quem já apontava para `duplicate`.
    /// As participações do duplicado passam para o alvo e as dele ficam inativas.
    async fn mark_merged(&self, tenant_id: Uuid, duplicate_id: Uuid, target_id: Uuid) -> Result<(), AppError>;

    async fn touch_activity(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), AppError>;

    async fn list_canonical(&self, tenant_id: Uuid) -> Result<Vec<Participant>, AppError>;

    async fn update_engagement(&self, id: Uuid, score: i32, category: &str) -> Result<(), AppError>;
}

#[async_trait]
pub trait MembershipStore: Send + Sync {
    async fn find(&self, participant_id: Uuid, tg_chat_id: i64) -> Result<Option<GroupMembership>, AppError>;

    /// INSERT com conflito ignorado. `false` = outra escrita criou a linha antes.
    async fn insert(&self, participant_id: Uuid, tg_chat_id: i64, active: bool, at: DateTime<Utc>) -> Result<bool, AppError>;

    /// Só altera linhas inativas. `false` = nada mudou.
    async fn reactivate(&self, participant_id: Uuid, tg_chat_id: i64, at: DateTime<Utc>) -> Result<bool, AppError>;

    /// Só altera linhas ativas. `false` = nada mudou.
    async fn deactivate(&self, participant_id: Uuid, tg_chat_id: i64, at: DateTime<Utc>) -> Result<bool, AppError>;
}

#[async_trait]
pub trait ActivityStore: Send + Sync {
    async fn find_by_key(&self, key: &NaturalKey) -> Result<Option<i64>, AppError>;

    /// Insere o evento (e o texto completo, se houver). Pode devolver `UniqueConstraintViolation`.
    async fn insert(&self, event: &NewActivityEvent) -> Result<i64, AppError>;

    async fn is_update_processed(&self, update_id: i64) -> Result<bool, AppError>;

    async fn record_update(&self, update_id: i64, tg_chat_id: Option<i64>) -> Result<(), AppError>;
}

#[async_trait]
pub trait MetricsStore: Send + Sync {
    async fn count_events(
        &self,
        tenant_id: Uuid,
        tg_chat_id: i64,
        event_type: ActivityEventType,
        window: DayWindow,
    ) -> Result<i64, AppError>;

    async fn count_replies(&self, tenant_id: Uuid, tg_chat_id: i64, window: DayWindow) -> Result<i64, AppError>;

    async fn count_active_users(&self, tenant_id: Uuid, tg_chat_id: i64, window: DayWindow) -> Result<i64, AppError>;

    async fn upsert_day(&self, row: &GroupMetricsDay) -> Result<(), AppError>;

    /// Mensagens por participante canônico desde `since`.
    async fn message_counts_since(&self, tenant_id: Uuid, since: DateTime<Utc>) -> Result<Vec<(Uuid, i64)>, AppError>;
}

#[async_trait]
pub trait ApplicationStore: Send + Sync {
    /// Pipeline do chat, ou o padrão do tenant.
    async fn find_pipeline_for_chat(
        &self,
        tenant_id: Uuid,
        tg_chat_id: i64,
        pipeline_type: &str,
    ) -> Result<Option<Pipeline>, AppError>;

    async fn find_active_form(&self, pipeline_id: Uuid) -> Result<Option<ApplicationForm>, AppError>;

    /// Estágios ordenados por posição.
    async fn list_stages(&self, pipeline_id: Uuid) -> Result<Vec<PipelineStage>, AppError>;

    /// Atômico, idempotente pela request key, grava a própria trilha de auditoria.
    async fn create_application(&self, new: &NewApplication) -> Result<(Application, bool), AppError>;

    /// Atômico, grava a própria trilha de auditoria.
    /// `ApplicationClosed` quando o estágio atual, relido sob lock, é terminal.
    async fn move_to_stage(&self, application_id: Uuid, stage_id: Uuid, notes: &str) -> Result<(), AppError>;

    async fn find_application(&self, application_id: Uuid) -> Result<Option<Application>, AppError>;

    async fn log_event(&self, application_id: Uuid, kind: ApplicationEventKind, data: Value) -> Result<(), AppError>;
}

#[async_trait]
pub trait OutboxStore: Send + Sync {
    async fn enqueue(&self, application_id: Option<Uuid>, action: &PlatformAction) -> Result<i64, AppError>;

    /// Reivindica até `limit` entradas vencidas: ficam invisíveis para outros workers até `lease_until`.
    async fn claim_due(&self, now: DateTime<Utc>, lease_until: DateTime<Utc>, limit: i64) -> Result<Vec<OutboxEntry>, AppError>;

    async fn mark_done(&self, id: i64, at: DateTime<Utc>) -> Result<(), AppError>;

    async fn mark_failed(&self, id: i64, error: &str, next_attempt_at: DateTime<Utc>) -> Result<(), AppError>;
}
