// src/services/recovery.rs

use std::{collections::HashMap, sync::Arc, sync::Mutex};

use chrono::{DateTime, Duration, Utc};

use crate::{common::error::AppError, models::telegram::TgWebhookInfo, services::platform_client::PlatformClient};

pub const MAX_ATTEMPTS_PER_HOUR: usize = 3;
pub const COOLDOWN_MINUTES: i64 = 20;
// Erro de entrega mais antigo que isso já não dispara recuperação
const RECENT_ERROR_MINUTES: i64 = 15;

pub const WEBHOOK_PATH: &str = "/api/telegram/webhook";

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Limita as tentativas de re-registro por bot: janela móvel de 1h e intervalo mínimo.
pub struct RecoveryLimiter {
    clock: Arc<dyn Clock>,
    attempts: Mutex<HashMap<String, Vec<DateTime<Utc>>>>,
}

impl RecoveryLimiter {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock, attempts: Mutex::new(HashMap::new()) }
    }

    /// Reserva uma tentativa se permitido. A tentativa conta mesmo que falhe.
    pub fn try_acquire(&self, bot_key: &str) -> bool {
        let now = self.clock.now();
        let mut attempts = match self.attempts.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let history = attempts.entry(bot_key.to_string()).or_default();
        history.retain(|at| now - *at < Duration::hours(1));

        if history.len() >= MAX_ATTEMPTS_PER_HOUR {
            tracing::warn!(bot = bot_key, attempts = history.len(), "Recuperação bloqueada: limite por hora atingido");
            return false;
        }
        if let Some(last) = history.last() {
            let elapsed = now - *last;
            if elapsed < Duration::minutes(COOLDOWN_MINUTES) {
                let wait = (Duration::minutes(COOLDOWN_MINUTES) - elapsed).num_minutes() + 1;
                tracing::warn!(bot = bot_key, wait_minutes = wait, "Recuperação em cooldown");
                return false;
            }
        }

        history.push(now);
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryOutcome {
    Healthy,
    Recovered,
    Failed,
    RateLimited,
}

#[derive(Clone)]
pub struct WebhookRecovery {
    platform: Arc<dyn PlatformClient>,
    limiter: Arc<RecoveryLimiter>,
    clock: Arc<dyn Clock>,
    webhook_url: String,
    secret: String,
}

impl WebhookRecovery {
    pub fn new(
        platform: Arc<dyn PlatformClient>,
        limiter: Arc<RecoveryLimiter>,
        clock: Arc<dyn Clock>,
        public_base_url: &str,
        secret: impl Into<String>,
    ) -> Self {
        Self {
            platform,
            limiter,
            clock,
            webhook_url: format!("{}{}", public_base_url.trim_end_matches('/'), WEBHOOK_PATH),
            secret: secret.into(),
        }
    }

    pub async fn check(&self) -> Result<RecoveryOutcome, AppError> {
        let info = self.platform.get_webhook_info().await?;
        let Some(reason) = self.problem(&info) else {
            tracing::debug!(pending = info.pending_update_count, "Webhook saudável");
            return Ok(RecoveryOutcome::Healthy);
        };
        Ok(self.recover(&reason).await)
    }

    fn problem(&self, info: &TgWebhookInfo) -> Option<String> {
        if info.url != self.webhook_url {
            return Some(format!("url registrada '{}' difere da esperada", info.url));
        }
        let recent = info
            .last_error_date
            .and_then(|ts| DateTime::<Utc>::from_timestamp(ts, 0))
            .is_some_and(|at| self.clock.now() - at < Duration::minutes(RECENT_ERROR_MINUTES));
        if recent {
            return Some(format!(
                "erro recente de entrega: {}",
                info.last_error_message.as_deref().unwrap_or("sem mensagem")
            ));
        }
        None
    }

    pub async fn recover(&self, reason: &str) -> RecoveryOutcome {
        let bot = self.platform.bot_key();
        if !self.limiter.try_acquire(&bot) {
            return RecoveryOutcome::RateLimited;
        }

        tracing::warn!(bot, reason, url = %self.webhook_url, "Re-registrando webhook");
        let result = self.platform.set_webhook(&self.webhook_url, &self.secret).await;
        if result.ok {
            tracing::info!(bot, "✅ Webhook recuperado");
            RecoveryOutcome::Recovered
        } else {
            tracing::error!(bot, error = %result.error_summary(), "❌ Falha ao recuperar o webhook");
            RecoveryOutcome::Failed
        }
    }
}
