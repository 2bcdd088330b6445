// src/middleware/admin_auth.rs

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};

use crate::{common::error::AppError, config::AppState, middleware::webhook_auth::secrets_match};

// Rotas de operador exigem "Authorization: Bearer <ADMIN_API_TOKEN>"
pub async fn admin_guard(
    State(app_state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = request
        .headers()
        .get("Authorization")
        .and_then(|value| value.to_str().ok())
        .and_then(|header| header.strip_prefix("Bearer "));

    match (token, app_state.config.admin_api_token.as_deref()) {
        (Some(token), Some(expected)) if secrets_match(token, expected) => Ok(next.run(request).await),
        _ => Err(AppError::InvalidToken),
    }
}
