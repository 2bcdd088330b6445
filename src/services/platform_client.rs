// src/services/platform_client.rs

// Cliente das ações na plataforma (aprovar, recusar, banir, enviar mensagem).
// Toda chamada tem timeout; falhas viram `ActionResult`, nunca pânico.

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};

use crate::{
    common::error::AppError,
    models::{
        outbox::PlatformAction,
        telegram::{TgApiResponse, TgUserProfilePhotos, TgWebhookInfo},
    },
};

pub const TELEGRAM_API_BASE: &str = "https://api.telegram.org";

/// Updates que pedimos ao registrar o webhook.
pub const ALLOWED_UPDATES: [&str; 7] = [
    "message",
    "edited_message",
    "chat_member",
    "my_chat_member",
    "chat_join_request",
    "callback_query",
    "message_reaction",
];

// Falhas esperadas: o alvo sumiu ou não quer falar com o bot. Não geram alerta.
const EXPECTED_FAILURES: [&str; 6] = [
    "user not found",
    "chat not found",
    "bot was blocked",
    "user is deactivated",
    "hide_requester_missing",
    "user_already_participant",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionResult {
    pub ok: bool,
    pub error_code: Option<i32>,
    pub description: Option<String>,
}

impl ActionResult {
    pub fn success() -> Self {
        Self { ok: true, error_code: None, description: None }
    }

    pub fn failure(error_code: Option<i32>, description: Option<String>) -> Self {
        Self { ok: false, error_code, description }
    }

    pub fn is_expected_failure(&self) -> bool {
        if self.ok {
            return false;
        }
        if self.error_code == Some(403) {
            return true;
        }
        let description = self.description.as_deref().unwrap_or_default().to_ascii_lowercase();
        EXPECTED_FAILURES.iter().any(|marker| description.contains(marker))
    }

    pub fn error_summary(&self) -> String {
        format!(
            "{}: {}",
            self.error_code.map_or_else(|| "transporte".to_string(), |c| c.to_string()),
            self.description.as_deref().unwrap_or("sem descrição")
        )
    }
}

#[async_trait]
pub trait PlatformClient: Send + Sync {
    async fn approve_join_request(&self, chat_id: i64, user_id: i64) -> ActionResult;
    async fn reject_join_request(&self, chat_id: i64, user_id: i64) -> ActionResult;
    async fn ban_member(&self, chat_id: i64, user_id: i64) -> ActionResult;
    async fn send_message(&self, chat_id: i64, text: &str) -> ActionResult;

    async fn has_profile_photo(&self, user_id: i64) -> Result<bool, AppError>;
    async fn get_webhook_info(&self) -> Result<TgWebhookInfo, AppError>;
    async fn set_webhook(&self, url: &str, secret_token: &str) -> ActionResult;

    /// Identidade do bot, usada como chave do limitador de recuperação.
    fn bot_key(&self) -> String;

    async fn execute(&self, action: &PlatformAction) -> ActionResult {
        match action {
            PlatformAction::ApproveJoinRequest { chat_id, user_id } => self.approve_join_request(*chat_id, *user_id).await,
            PlatformAction::RejectJoinRequest { chat_id, user_id } => self.reject_join_request(*chat_id, *user_id).await,
            PlatformAction::BanMember { chat_id, user_id } => self.ban_member(*chat_id, *user_id).await,
            PlatformAction::SendMessage { chat_id, text } => self.send_message(*chat_id, text).await,
        }
    }
}

// =========================================================================
//  IMPLEMENTAÇÃO HTTP (Bot API)
// =========================================================================

#[derive(Clone)]
pub struct TelegramClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl TelegramClient {
    pub fn new(token: impl Into<String>, timeout: Duration) -> Result<Self, AppError> {
        Self::with_base_url(TELEGRAM_API_BASE, token, timeout)
    }

    pub fn with_base_url(base_url: impl Into<String>, token: impl Into<String>, timeout: Duration) -> Result<Self, AppError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        })
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, body: Value) -> Result<TgApiResponse<T>, AppError> {
        let url = format!("{}/bot{}/{}", self.base_url, self.token, method);
        let response = self.http.post(url).json(&body).send().await?;
        // A Bot API devolve o JSON de erro mesmo em respostas 4xx
        Ok(response.json::<TgApiResponse<T>>().await?)
    }

    async fn action(&self, method: &str, body: Value) -> ActionResult {
        match self.call::<Value>(method, body).await {
            Ok(response) if response.ok => ActionResult::success(),
            Ok(response) => ActionResult::failure(response.error_code, response.description),
            Err(e) => {
                tracing::warn!(method, error = %e, "Falha de transporte com a Bot API");
                ActionResult::failure(None, Some(e.to_string()))
            }
        }
    }
}

#[async_trait]
impl PlatformClient for TelegramClient {
    async fn approve_join_request(&self, chat_id: i64, user_id: i64) -> ActionResult {
        self.action("approveChatJoinRequest", json!({ "chat_id": chat_id, "user_id": user_id })).await
    }

    async fn reject_join_request(&self, chat_id: i64, user_id: i64) -> ActionResult {
        self.action("declineChatJoinRequest", json!({ "chat_id": chat_id, "user_id": user_id })).await
    }

    async fn ban_member(&self, chat_id: i64, user_id: i64) -> ActionResult {
        self.action("banChatMember", json!({ "chat_id": chat_id, "user_id": user_id })).await
    }

    async fn send_message(&self, chat_id: i64, text: &str) -> ActionResult {
        self.action("sendMessage", json!({ "chat_id": chat_id, "text": text })).await
    }

    async fn has_profile_photo(&self, user_id: i64) -> Result<bool, AppError> {
        let response = self
            .call::<TgUserProfilePhotos>("getUserProfilePhotos", json!({ "user_id": user_id, "limit": 1 }))
            .await?;
        Ok(response.result.is_some_and(|photos| photos.total_count > 0))
    }

    async fn get_webhook_info(&self) -> Result<TgWebhookInfo, AppError> {
        let response = self.call::<TgWebhookInfo>("getWebhookInfo", json!({})).await?;
        match (response.ok, response.result) {
            (true, Some(info)) => Ok(info),
            _ => Err(AppError::InternalServerError(anyhow::anyhow!(
                "getWebhookInfo falhou: {}",
                response.description.unwrap_or_default()
            ))),
        }
    }

    async fn set_webhook(&self, url: &str, secret_token: &str) -> ActionResult {
        self.action(
            "setWebhook",
            json!({ "url": url, "secret_token": secret_token, "allowed_updates": ALLOWED_UPDATES }),
        )
        .await
    }

    fn bot_key(&self) -> String {
        // O token é "<id do bot>:<segredo>"; só o id entra em logs e chaves
        self.token.split(':').next().unwrap_or_default().to_string()
    }
}

// =========================================================================
//  CLIENTE DE TESTE (grava as chamadas, falhas roteirizadas)
// =========================================================================

#[cfg(test)]
pub mod recording {
    use std::{collections::HashMap, sync::Mutex};

    use super::*;

    #[derive(Default)]
    pub struct RecordingPlatform {
        calls: Mutex<Vec<PlatformAction>>,
        failures: Mutex<HashMap<&'static str, ActionResult>>,
        photo: Mutex<bool>,
        webhook: Mutex<Option<TgWebhookInfo>>,
        webhook_sets: Mutex<Vec<String>>,
    }

    pub fn action_kind(action: &PlatformAction) -> &'static str {
        match action {
            PlatformAction::ApproveJoinRequest { .. } => "approve",
            PlatformAction::RejectJoinRequest { .. } => "reject",
            PlatformAction::BanMember { .. } => "ban",
            PlatformAction::SendMessage { .. } => "send",
        }
    }

    impl RecordingPlatform {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn fail(&self, kind: &'static str, result: ActionResult) {
            self.failures.lock().unwrap().insert(kind, result);
        }

        pub fn clear_failures(&self) {
            self.failures.lock().unwrap().clear();
        }

        pub fn set_has_photo(&self, value: bool) {
            *self.photo.lock().unwrap() = value;
        }

        pub fn set_webhook_info(&self, info: TgWebhookInfo) {
            *self.webhook.lock().unwrap() = Some(info);
        }

        pub fn calls(&self) -> Vec<PlatformAction> {
            self.calls.lock().unwrap().clone()
        }

        pub fn webhook_sets(&self) -> Vec<String> {
            self.webhook_sets.lock().unwrap().clone()
        }

        fn record(&self, action: PlatformAction) -> ActionResult {
            let result = self
                .failures
                .lock()
                .unwrap()
                .get(action_kind(&action))
                .cloned()
                .unwrap_or_else(ActionResult::success);
            self.calls.lock().unwrap().push(action);
            result
        }
    }

    #[async_trait]
    impl PlatformClient for RecordingPlatform {
        async fn approve_join_request(&self, chat_id: i64, user_id: i64) -> ActionResult {
            self.record(PlatformAction::ApproveJoinRequest { chat_id, user_id })
        }

        async fn reject_join_request(&self, chat_id: i64, user_id: i64) -> ActionResult {
            self.record(PlatformAction::RejectJoinRequest { chat_id, user_id })
        }

        async fn ban_member(&self, chat_id: i64, user_id: i64) -> ActionResult {
            self.record(PlatformAction::BanMember { chat_id, user_id })
        }

        async fn send_message(&self, chat_id: i64, text: &str) -> ActionResult {
            self.record(PlatformAction::SendMessage { chat_id, text: text.to_string() })
        }

        async fn has_profile_photo(&self, _user_id: i64) -> Result<bool, AppError> {
            Ok(*self.photo.lock().unwrap())
        }

        async fn get_webhook_info(&self) -> Result<TgWebhookInfo, AppError> {
            self.webhook
                .lock()
                .unwrap()
                .clone()
                .ok_or_else(|| AppError::NotFound("webhook info".into()))
        }

        async fn set_webhook(&self, url: &str, _secret_token: &str) -> ActionResult {
            self.webhook_sets.lock().unwrap().push(url.to_string());
            ActionResult::success()
        }

        fn bot_key(&self) -> String {
            "123456".to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_expected_failures() {
        assert!(ActionResult::failure(Some(403), Some("Forbidden: bot was kicked".into())).is_expected_failure());
        assert!(ActionResult::failure(Some(400), Some("Bad Request: user not found".into())).is_expected_failure());
        assert!(ActionResult::failure(Some(400), Some("Bad Request: HIDE_REQUESTER_MISSING".into())).is_expected_failure());
        assert!(!ActionResult::failure(Some(429), Some("Too Many Requests".into())).is_expected_failure());
        assert!(!ActionResult::failure(None, Some("timeout".into())).is_expected_failure());
        assert!(!ActionResult::success().is_expected_failure());
    }

    #[test]
    fn bot_key_never_contains_the_secret() {
        let client = TelegramClient::new("123456:segredo", Duration::from_secs(1)).unwrap();
        assert_eq!(client.bot_key(), "123456");
    }
}
