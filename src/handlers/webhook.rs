// src/handlers/webhook.rs

use axum::{body::Bytes, extract::State, Json};

use crate::{common::error::AppError, config::AppState, models::telegram::WebhookAck};

/// Recebe um update da Bot API. Responde na hora e processa em segundo plano:
/// qualquer resposta diferente de 2xx faz o provedor reentregar em loop.
#[utoipa::path(
    post,
    path = "/api/telegram/webhook",
    tag = "Telegram",
    // O corpo é lido cru: um JSON inválido ainda precisa receber 200
    request_body(content = String, content_type = "application/json", description = "Update da Bot API"),
    responses(
        (status = 200, description = "Update recebido", body = WebhookAck),
        (status = 401, description = "Segredo do webhook inválido")
    ),
    params(
        ("x-telegram-bot-api-secret-token" = String, Header, description = "Segredo configurado no setWebhook")
    ),
    security(("webhook_secret" = []))
)]
pub async fn receive_update(State(app_state): State<AppState>, body: Bytes) -> Json<WebhookAck> {
    let ingestion = app_state.ingestion.clone();

    tokio::spawn(async move {
        match ingestion.ingest(&body).await {
            Ok(outcome) => tracing::debug!(?outcome, "Update processado"),
            Err(AppError::InvalidPayload(e)) => {
                tracing::warn!(error = %e, bytes = body.len(), "Payload do webhook malformado, descartado");
            }
            Err(e) => tracing::error!(error = %e, "❌ Falha ao processar update do webhook"),
        }
    });

    Json(WebhookAck { ok: true })
}
