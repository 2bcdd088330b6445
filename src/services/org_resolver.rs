// src/services/org_resolver.rs

use std::sync::Arc;

use uuid::Uuid;

use crate::{
    common::error::AppError,
    db::OrgStore,
    models::{
        event::{BotStatusEvent, ChatRef},
        org::{BotStatus, OrgChatBinding, ARCHIVE_BOT_LOST_ADMIN, ARCHIVE_BOT_REMOVED},
    },
};

#[derive(Clone)]
pub struct OrgResolver {
    store: Arc<dyn OrgStore>,
}

impl OrgResolver {
    pub fn new(store: Arc<dyn OrgStore>) -> Self {
        Self { store }
    }

    /// Tenants com vínculo ativo para o chat. Sem vínculo, garante o placeholder `pending`
    /// para um operador vincular depois. Nunca inventa vínculo.
    pub async fn resolve(&self, chat: &ChatRef) -> Result<Vec<Uuid>, AppError> {
        let tenants = self.store.active_tenants_for_chat(chat.id).await?;

        if tenants.is_empty() && chat.kind.is_group() {
            self.store.ensure_pending_group(chat.id, chat.title.as_deref()).await?;
            tracing::debug!(chat_id = chat.id, "Chat sem vínculo, grupo mantido como pendente");
        }

        Ok(tenants)
    }

    pub async fn touch(&self, tg_chat_id: i64, at: chrono::DateTime<chrono::Utc>) -> Result<(), AppError> {
        self.store.touch_group_activity(tg_chat_id, at).await
    }

    pub async fn list_active_bindings(&self) -> Result<Vec<OrgChatBinding>, AppError> {
        self.store.list_active_bindings().await
    }

    /// Operação do operador: vincula o chat ao tenant (reativa vínculo arquivado).
    pub async fn bind_chat(&self, tenant_id: Uuid, tg_chat_id: i64) -> Result<OrgChatBinding, AppError> {
        let binding = self.store.bind_chat(tenant_id, tg_chat_id).await?;
        tracing::info!(%tenant_id, chat_id = tg_chat_id, "✅ Chat vinculado ao tenant");
        Ok(binding)
    }

    /// Reage à mudança de status do próprio bot no grupo.
    /// Retorna quantos vínculos foram arquivados.
    pub async fn on_bot_status(&self, event: &BotStatusEvent) -> Result<u64, AppError> {
        let chat = &event.chat;
        let title = chat.title.as_deref();

        if event.new_status.is_admin() {
            self.store.set_bot_status(chat.id, title, BotStatus::Connected).await?;
            tracing::info!(chat_id = chat.id, "✅ Bot promovido a administrador");
            return Ok(0);
        }

        let reason = if !event.new_status.is_present() {
            ARCHIVE_BOT_REMOVED
        } else if event.old_status.is_admin() {
            ARCHIVE_BOT_LOST_ADMIN
        } else {
            // Bot entrou como membro comum: fica pendente até virar admin
            self.store.ensure_pending_group(chat.id, title).await?;
            return Ok(0);
        };

        self.store.set_bot_status(chat.id, title, BotStatus::Inactive).await?;
        let archived = self.store.archive_bindings(chat.id, reason).await?;
        tracing::warn!(chat_id = chat.id, reason, archived, "Vínculos arquivados após mudança de status do bot");
        Ok(archived)
    }
}
