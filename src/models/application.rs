// src/models/application.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sqlx::{types::Json, FromRow};
use utoipa::ToSchema;
use uuid::Uuid;

// --- Enums ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "terminal_type", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum TerminalType {
    Success,
    Failure,
}

/// Estágios conhecidos, procurados pelo slug.
pub const STAGE_APPROVED: &str = "approved";
pub const STAGE_SPAM: &str = "spam";

pub const PIPELINE_JOIN_REQUEST: &str = "join_request";

// --- Structs de Configuração ---

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Pipeline {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    pub pipeline_type: String,
    pub tg_chat_id: Option<i64>,
    pub is_default: bool,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

/// Ações automáticas de um estágio (JSONB `auto_actions`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageAutoActions {
    #[serde(default)]
    pub approve_telegram: bool,
    #[serde(default)]
    pub reject_telegram: bool,
    #[serde(default)]
    pub ban_telegram: bool,
    #[serde(default)]
    pub send_message_template_id: Option<String>,
    #[serde(default)]
    pub notify_admins: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct PipelineStage {
    pub id: Uuid,
    pub pipeline_id: Uuid,
    pub name: String,
    pub slug: String,
    pub position: i32,
    pub is_terminal: bool,
    pub terminal_type: Option<TerminalType>,
    pub auto_actions: Json<StageAutoActions>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationForm {
    pub id: Uuid,
    pub pipeline_id: Uuid,
    pub settings: Json<Value>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl ApplicationForm {
    /// Lê as chaves reconhecidas; configuração malformada vira o padrão (tudo desligado).
    pub fn pipeline_settings(&self) -> PipelineSettings {
        serde_json::from_value(self.settings.0.clone()).unwrap_or_else(|e| {
            tracing::warn!(form_id = %self.id, error = %e, "Configuração do formulário inválida, usando padrão");
            PipelineSettings::default()
        })
    }
}

// --- Configuração consumida do tenant ---

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineSettings {
    #[serde(default)]
    pub spam_detection: SpamDetectionSettings,
    #[serde(default)]
    pub auto_approve: AutoApproveSettings,
    #[serde(default)]
    pub require_form: bool,
    #[serde(default)]
    pub welcome_message: Option<String>,
    // Chat dos operadores para a ação "notify_admins"
    #[serde(default)]
    pub notify_chat_id: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SpamDetectionSettings {
    #[serde(default)]
    pub auto_reject_score: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AutoApproveSettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub conditions: AutoApproveConditions,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AutoApproveConditions {
    #[serde(default)]
    pub spam_score_below: Option<f64>,
    #[serde(default)]
    pub has_photo: bool,
    #[serde(default)]
    pub has_username: bool,
}

// --- Structs de Operação ---

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Application {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub pipeline_id: Uuid,
    pub form_id: Option<Uuid>,
    pub stage_id: Uuid,
    pub participant_id: Option<Uuid>,
    pub tg_user_id: i64,
    pub tg_chat_id: i64,
    pub request_key: String,
    pub spam_score: i32,
    pub spam_reasons: Vec<String>,
    pub tg_user_data: Json<Value>,
    pub form_data: Json<Map<String, Value>>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewApplication {
    pub tenant_id: Uuid,
    pub pipeline_id: Uuid,
    pub form_id: Option<Uuid>,
    pub stage_id: Uuid,
    pub participant_id: Option<Uuid>,
    pub tg_user_id: i64,
    pub tg_chat_id: i64,
    pub request_key: String,
    pub spam_score: i32,
    pub spam_reasons: Vec<String>,
    pub tg_user_data: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplicationEventKind {
    StageChanged,
    TgApproved,
    TgRejected,
    TgBanned,
    WelcomeQueued,
    AdminsNotified,
    RetryQueued,
}

impl ApplicationEventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ApplicationEventKind::StageChanged => "stage_changed",
            ApplicationEventKind::TgApproved => "tg_approved",
            ApplicationEventKind::TgRejected => "tg_rejected",
            ApplicationEventKind::TgBanned => "tg_banned",
            ApplicationEventKind::WelcomeQueued => "welcome_queued",
            ApplicationEventKind::AdminsNotified => "admins_notified",
            ApplicationEventKind::RetryQueued => "retry_queued",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationEvent {
    pub id: i64,
    pub application_id: Uuid,
    pub event_type: String,
    pub actor_type: String,
    pub data: Json<Value>,
    pub created_at: DateTime<Utc>,
}

/// Resultado da automação para um pedido de entrada.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum AutoDecision {
    Approved,
    Rejected,
    Pending,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApplicationOutcome {
    pub application_id: Option<Uuid>,
    pub decision: AutoDecision,
}

impl ApplicationOutcome {
    pub fn pending_without_application() -> Self {
        Self { application_id: None, decision: AutoDecision::Pending }
    }
}
