// src/docs.rs

use utoipa::OpenApi;
use utoipa::openapi::security::{ApiKey, ApiKeyValue, Http, HttpAuthScheme, SecurityScheme};
use crate::handlers;
use crate::models;

#[derive(OpenApi)]
#[openapi(
    paths(
        // --- Health ---
        handlers::health::health,

        // --- Telegram ---
        handlers::webhook::receive_update,

        // --- Admin ---
        handlers::admin::bind_chat,
        handlers::admin::merge_participants,
        handlers::admin::move_application,
        handlers::admin::backfill_metrics,
    ),
    components(
        schemas(
            models::telegram::WebhookAck,
            models::org::BindingStatus,
            models::org::OrgChatBinding,
            models::metrics::GroupMetricsDay,
            models::application::AutoDecision,

            // --- Payloads ---
            handlers::admin::BindChatPayload,
            handlers::admin::MergeParticipantsPayload,
            handlers::admin::MergeResponse,
            handlers::admin::MoveApplicationPayload,
            handlers::admin::MoveApplicationResponse,
            handlers::admin::BackfillPayload,
            handlers::admin::BackfillResponse,
        )
    ),
    tags(
        (name = "Health", description = "Disponibilidade do serviço"),
        (name = "Telegram", description = "Entrada de updates da Bot API"),
        (name = "Admin", description = "Operações de operador (vínculos, mesclagem, candidaturas, métricas)")
    ),
    modifiers(&SecurityAddon)
)]
pub struct ApiDoc;

struct SecurityAddon;

impl utoipa::Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "webhook_secret",
            SecurityScheme::ApiKey(ApiKey::Header(ApiKeyValue::new("x-telegram-bot-api-secret-token"))),
        );
        components.add_security_scheme(
            "admin_token",
            SecurityScheme::Http(
                Http::new(HttpAuthScheme::Bearer)
            ),
        );
    }
}
