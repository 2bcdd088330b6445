// src/middleware/webhook_auth.rs

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use subtle::ConstantTimeEq;

use crate::{common::error::AppError, config::AppState};

pub const SECRET_HEADER: &str = "x-telegram-bot-api-secret-token";

// Guarda do webhook: só o provedor conhece o segredo registrado no setWebhook
pub async fn webhook_secret_guard(
    State(app_state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let provided = request
        .headers()
        .get(SECRET_HEADER)
        .and_then(|value| value.to_str().ok());

    match provided {
        Some(secret) if secrets_match(secret, &app_state.config.webhook_secret) => Ok(next.run(request).await),
        _ => {
            tracing::warn!("Chamada ao webhook com segredo inválido ou ausente");
            Err(AppError::InvalidWebhookSecret)
        }
    }
}

/// Comparação em tempo constante para o tamanho dado. Também usada pela guarda de operador.
pub(crate) fn secrets_match(provided: &str, expected: &str) -> bool {
    let (a, b) = (provided.as_bytes(), expected.as_bytes());
    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}
