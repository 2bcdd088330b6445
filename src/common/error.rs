use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

// Nosso tipo de erro, com `thiserror` para melhor ergonomia.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuração inválida")]
    ValidationError(#[from] validator::ValidationErrors),

    #[error("Segredo do webhook inválido")]
    InvalidWebhookSecret,

    #[error("Token de operador inválido")]
    InvalidToken,

    #[error("Payload inválido: {0}")]
    InvalidPayload(#[from] serde_json::Error),

    #[error("Registro não encontrado: {0}")]
    NotFound(String),

    // Corrida perdida num INSERT. Os serviços tratam isso com uma releitura.
    #[error("Violação de unicidade: {0}")]
    UniqueConstraintViolation(String),

    #[error("Mesclagem recusada: {0}")]
    MergeRejected(String),

    #[error("Candidatura {0} já está num estágio terminal")]
    ApplicationClosed(uuid::Uuid),

    #[error("Erro de transporte com a plataforma: {0}")]
    PlatformTransport(#[from] reqwest::Error),

    // Variante para erros de banco de dados
    #[error("Erro de banco de dados")]
    DatabaseError(#[from] sqlx::Error),

    // Variante genérica para qualquer outro erro inesperado
    #[error("Erro interno do servidor")]
    InternalServerError(#[from] anyhow::Error),
}

impl AppError {
    /// Erros de conflito resolvidos por releitura; nunca devem virar alerta.
    pub fn is_conflict(&self) -> bool {
        matches!(self, AppError::UniqueConstraintViolation(_))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::ValidationError(errors) => {
                let mut details = std::collections::HashMap::new();
                for (field, field_errors) in errors.field_errors() {
                    let codes: Vec<String> = field_errors.iter().map(|e| e.code.to_string()).collect();
                    details.insert(field.to_string(), codes);
                }
                let body = Json(json!({
                    "error": "Um ou mais campos são inválidos.",
                    "details": details,
                }));
                return (StatusCode::BAD_REQUEST, body).into_response();
            }
            AppError::InvalidWebhookSecret => (StatusCode::UNAUTHORIZED, "Segredo do webhook inválido ou ausente."),
            AppError::InvalidToken => (StatusCode::UNAUTHORIZED, "Token inválido ou ausente."),
            AppError::InvalidPayload(_) => (StatusCode::BAD_REQUEST, "Payload inválido."),
            AppError::NotFound(_) => (StatusCode::NOT_FOUND, "Registro não encontrado."),
            AppError::UniqueConstraintViolation(_) => (StatusCode::CONFLICT, "Registro já existe."),
            AppError::MergeRejected(_) => (StatusCode::BAD_REQUEST, "Não é possível mesclar estes participantes."),
            AppError::ApplicationClosed(_) => (StatusCode::CONFLICT, "A candidatura já foi encerrada."),

            // Todos os outros erros viram 500. O `tracing` loga a mensagem detalhada.
            ref e => {
                tracing::error!(error = ?e, "Erro Interno do Servidor: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Ocorreu um erro inesperado.")
            }
        };

        let body = Json(json!({ "error": error_message }));
        (status, body).into_response()
    }
}
