// src/models/participant.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sqlx::{types::Json, FromRow};
use uuid::Uuid;

// ---
// 1. Participant (a identidade durável de um humano dentro de um tenant)
// ---
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub tg_user_id: Option<i64>,

    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub full_name: Option<String>,
    pub username: Option<String>,

    // Contato: editável pelo usuário, o webhook nunca sobrescreve
    pub email: Option<String>,
    pub phone: Option<String>,

    // Quem escreveu por último os campos de exibição (ver FieldSource)
    pub source: String,
    pub merged_into: Option<Uuid>,
    pub status: String,
    pub attributes: Json<Map<String, Value>>,

    pub activity_score: i32,
    pub engagement_category: Option<String>,
    pub last_activity_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Participant {
    /// Id canônico com no máximo um salto (a mesclagem nunca cria cadeias).
    pub fn canonical_id(&self) -> Uuid {
        self.merged_into.unwrap_or(self.id)
    }

    pub fn is_merged(&self) -> bool {
        self.merged_into.is_some()
    }
}

/// Origem de um dado de perfil, em ordem crescente de confiança.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FieldSource {
    Import,
    #[default]
    Telegram,
    Manual,
}

impl FieldSource {
    pub fn as_str(self) -> &'static str {
        match self {
            FieldSource::Import => "import",
            FieldSource::Telegram => "telegram",
            FieldSource::Manual => "manual",
        }
    }

    // Valores desconhecidos no banco contam como a fonte mais confiável:
    // na dúvida, não sobrescrevemos.
    pub fn parse(raw: &str) -> Self {
        match raw {
            "import" => FieldSource::Import,
            "telegram" => FieldSource::Telegram,
            _ => FieldSource::Manual,
        }
    }
}

/// O que um evento observou sobre o usuário.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObservedFields {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub full_name: Option<String>,
    pub username: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub source: FieldSource,
    pub attributes: Map<String, Value>,
}

/// Alterações a aplicar num participante. `None` = manter o valor atual.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParticipantPatch {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub full_name: Option<String>,
    pub username: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub source: Option<FieldSource>,
    pub attributes: Option<Map<String, Value>>,
}

impl ParticipantPatch {
    pub fn is_empty(&self) -> bool {
        self.first_name.is_none()
            && self.last_name.is_none()
            && self.full_name.is_none()
            && self.username.is_none()
            && self.email.is_none()
            && self.phone.is_none()
            && self.attributes.is_none()
    }
}

/// Dados para a criação atômica (upsert) na primeira aparição.
#[derive(Debug, Clone)]
pub struct NewParticipant {
    pub tenant_id: Uuid,
    pub tg_user_id: i64,
    pub fields: ObservedFields,
}

/// Resultado da resolução de identidade.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedParticipant {
    pub participant_id: Uuid,
    pub created: bool,
    // Id do registro encontrado pela chave externa, quando foi redirecionado
    pub redirected_from: Option<Uuid>,
}
