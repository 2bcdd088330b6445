// src/handlers/admin.rs

// Rotas de operador: vincular chats, mesclar participantes, mover candidaturas e backfill.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::{Validate, ValidationError, ValidationErrors};

use crate::{
    common::error::AppError,
    config::AppState,
    models::{application::AutoDecision, org::OrgChatBinding},
};

// --- Payloads ---

#[derive(Debug, Deserialize, ToSchema)]
pub struct BindChatPayload {
    pub tenant_id: Uuid,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct MergeParticipantsPayload {
    pub target_id: Uuid,
    pub duplicate_id: Uuid,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct MergeResponse {
    pub canonical_id: Uuid,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct MoveApplicationPayload {
    pub stage_id: Uuid,
    #[validate(length(max = 2000))]
    #[serde(default)]
    pub notes: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct MoveApplicationResponse {
    pub decision: AutoDecision,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct BackfillPayload {
    pub tenant_id: Uuid,
    pub from: NaiveDate,
    pub to: NaiveDate,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct BackfillResponse {
    pub days: usize,
}

// --- Handlers ---

#[utoipa::path(
    post,
    path = "/api/admin/chats/{chat_id}/bind",
    tag = "Admin",
    request_body = BindChatPayload,
    params(("chat_id" = i64, Path, description = "Id do chat no Telegram")),
    responses(
        (status = 201, description = "Chat vinculado", body = OrgChatBinding),
        (status = 401, description = "Token de operador inválido")
    ),
    security(("admin_token" = []))
)]
pub async fn bind_chat(
    State(app_state): State<AppState>,
    Path(chat_id): Path<i64>,
    Json(payload): Json<BindChatPayload>,
) -> Result<(StatusCode, Json<OrgChatBinding>), AppError> {
    let binding = app_state.orgs.bind_chat(payload.tenant_id, chat_id).await?;
    Ok((StatusCode::CREATED, Json(binding)))
}

#[utoipa::path(
    post,
    path = "/api/admin/tenants/{tenant_id}/participants/merge",
    tag = "Admin",
    request_body = MergeParticipantsPayload,
    params(("tenant_id" = Uuid, Path, description = "Tenant dos participantes")),
    responses(
        (status = 200, description = "Participantes mesclados", body = MergeResponse),
        (status = 400, description = "Mesclagem recusada"),
        (status = 404, description = "Participante não encontrado")
    ),
    security(("admin_token" = []))
)]
pub async fn merge_participants(
    State(app_state): State<AppState>,
    Path(tenant_id): Path<Uuid>,
    Json(payload): Json<MergeParticipantsPayload>,
) -> Result<Json<MergeResponse>, AppError> {
    let canonical_id = app_state
        .identity
        .merge(tenant_id, payload.target_id, payload.duplicate_id)
        .await?;
    Ok(Json(MergeResponse { canonical_id }))
}

#[utoipa::path(
    post,
    path = "/api/admin/applications/{application_id}/move",
    tag = "Admin",
    request_body = MoveApplicationPayload,
    params(("application_id" = Uuid, Path, description = "Id da candidatura")),
    responses(
        (status = 200, description = "Candidatura movida", body = MoveApplicationResponse),
        (status = 404, description = "Candidatura ou estágio não encontrado"),
        (status = 409, description = "Candidatura já encerrada")
    ),
    security(("admin_token" = []))
)]
pub async fn move_application(
    State(app_state): State<AppState>,
    Path(application_id): Path<Uuid>,
    Json(payload): Json<MoveApplicationPayload>,
) -> Result<Json<MoveApplicationResponse>, AppError> {
    payload.validate().map_err(AppError::ValidationError)?;

    let decision = app_state
        .pipeline
        .move_application(application_id, payload.stage_id, &payload.notes)
        .await?;
    Ok(Json(MoveApplicationResponse { decision }))
}

#[utoipa::path(
    post,
    path = "/api/admin/chats/{chat_id}/metrics/backfill",
    tag = "Admin",
    request_body = BackfillPayload,
    params(("chat_id" = i64, Path, description = "Id do chat no Telegram")),
    responses(
        (status = 200, description = "Dias recalculados", body = BackfillResponse),
        (status = 400, description = "Intervalo invertido ou maior que o permitido")
    ),
    security(("admin_token" = []))
)]
pub async fn backfill_metrics(
    State(app_state): State<AppState>,
    Path(chat_id): Path<i64>,
    Json(payload): Json<BackfillPayload>,
) -> Result<Json<BackfillResponse>, AppError> {
    check_backfill_range(payload.from, payload.to, app_state.config.backfill_max_days)?;

    let days = app_state
        .metrics
        .rollup_range(payload.tenant_id, chat_id, payload.from, payload.to)
        .await?;
    tracing::info!(tenant_id = %payload.tenant_id, chat_id, days, "✅ Backfill de métricas concluído");
    Ok(Json(BackfillResponse { days }))
}

fn check_backfill_range(from: NaiveDate, to: NaiveDate, max_days: i64) -> Result<(), AppError> {
    let days = (to - from).num_days() + 1;
    if (1..=max_days).contains(&days) {
        return Ok(());
    }
    let mut errors = ValidationErrors::new();
    errors.add("to", ValidationError::new("range"));
    Err(AppError::ValidationError(errors))
}
