// src/services/pipeline_service.rs

use std::sync::Arc;

use serde_json::{json, Map, Value};
use uuid::Uuid;

use crate::{
    common::error::AppError,
    db::{ApplicationStore, OutboxStore, ParticipantStore},
    models::{
        application::{
            Application, ApplicationEventKind, ApplicationOutcome, AutoApproveConditions, AutoDecision,
            NewApplication, PipelineSettings, PipelineStage, StageAutoActions, TerminalType, PIPELINE_JOIN_REQUEST,
            STAGE_APPROVED, STAGE_SPAM,
        },
        event::JoinRequestEvent,
        outbox::PlatformAction,
        participant::ParticipantPatch,
    },
    services::{
        platform_client::{ActionResult, PlatformClient},
        spam::{JoinProfile, SpamScorer, SpamVerdict},
    },
};

/// Motor de candidaturas: cria a candidatura, aplica as regras automáticas
/// e executa as ações do estágio terminal.
#[derive(Clone)]
pub struct PipelineEngine {
    applications: Arc<dyn ApplicationStore>,
    participants: Arc<dyn ParticipantStore>,
    outbox: Arc<dyn OutboxStore>,
    platform: Arc<dyn PlatformClient>,
    scorer: Arc<dyn SpamScorer>,
}

impl PipelineEngine {
    pub fn new(
        applications: Arc<dyn ApplicationStore>,
        participants: Arc<dyn ParticipantStore>,
        outbox: Arc<dyn OutboxStore>,
        platform: Arc<dyn PlatformClient>,
        scorer: Arc<dyn SpamScorer>,
    ) -> Self {
        Self { applications, participants, outbox, platform, scorer }
    }

    // =========================================================================
    //  PEDIDO DE ENTRADA
    // =========================================================================

    pub async fn on_join_request(
        &self,
        tenant_id: Uuid,
        participant_id: Option<Uuid>,
        event: &JoinRequestEvent,
    ) -> Result<ApplicationOutcome, AppError> {
        let chat_id = event.chat.id;
        let user_id = event.actor.tg_user_id;

        let Some(pipeline) = self
            .applications
            .find_pipeline_for_chat(tenant_id, chat_id, PIPELINE_JOIN_REQUEST)
            .await?
        else {
            tracing::debug!(%tenant_id, chat_id, "Nenhum pipeline de entrada configurado");
            return Ok(ApplicationOutcome::pending_without_application());
        };

        let Some(form) = self.applications.find_active_form(pipeline.id).await? else {
            tracing::debug!(%tenant_id, pipeline_id = %pipeline.id, "Pipeline sem formulário ativo");
            return Ok(ApplicationOutcome::pending_without_application());
        };
        let settings = form.pipeline_settings();

        let stages = self.applications.list_stages(pipeline.id).await?;
        let Some(initial) = stages.iter().find(|s| !s.is_terminal) else {
            tracing::warn!(pipeline_id = %pipeline.id, "Pipeline sem estágio inicial não terminal");
            return Ok(ApplicationOutcome::pending_without_application());
        };

        let has_photo = self.platform.has_profile_photo(user_id).await.unwrap_or_else(|e| {
            tracing::warn!(tg_user_id = user_id, error = %e, "Não foi possível verificar a foto de perfil");
            false
        });
        let profile = JoinProfile {
            first_name: event.actor.first_name.clone(),
            last_name: event.actor.last_name.clone(),
            username: event.actor.username.clone(),
            bio: event.bio.clone(),
            has_photo,
        };
        let verdict = self.scorer.score(&profile);

        let new = NewApplication {
            tenant_id,
            pipeline_id: pipeline.id,
            form_id: Some(form.id),
            stage_id: initial.id,
            participant_id,
            tg_user_id: user_id,
            tg_chat_id: chat_id,
            request_key: format!("join_request:{}:{}", chat_id, event.at.timestamp()),
            spam_score: verdict.score,
            spam_reasons: verdict.reasons.clone(),
            tg_user_data: json!({
                "user_id": user_id,
                "username": profile.username,
                "first_name": profile.first_name,
                "last_name": profile.last_name,
                "bio": profile.bio,
                "has_photo": has_photo,
                "invite_link": event.invite_link,
            }),
        };
        let (application, created) = self.applications.create_application(&new).await?;

        if !created {
            // Reentrega do mesmo pedido: nada é reavaliado
            tracing::debug!(application_id = %application.id, "Candidatura já existente, sem reavaliação");
            let decision = decision_for(stages.iter().find(|s| s.id == application.stage_id));
            return Ok(ApplicationOutcome { application_id: Some(application.id), decision });
        }

        tracing::info!(
            %tenant_id,
            application_id = %application.id,
            tg_user_id = user_id,
            spam_score = verdict.score,
            "✅ Candidatura criada a partir do pedido de entrada"
        );

        let decision = self.evaluate(&application, &stages, &settings, &verdict, &profile).await?;
        Ok(ApplicationOutcome { application_id: Some(application.id), decision })
    }

    async fn evaluate(
        &self,
        application: &Application,
        stages: &[PipelineStage],
        settings: &PipelineSettings,
        verdict: &SpamVerdict,
        profile: &JoinProfile,
    ) -> Result<AutoDecision, AppError> {
        // Rejeição automática tem precedência sobre a aprovação
        if let Some(threshold) = settings.spam_detection.auto_reject_score.filter(|t| *t > 0.0) {
            if f64::from(verdict.score) >= threshold {
                let Some(spam) = find_stage(stages, STAGE_SPAM) else {
                    tracing::warn!(application_id = %application.id, "Limite de spam atingido, mas o pipeline não tem estágio 'spam'");
                    return Ok(AutoDecision::Pending);
                };
                let implied = StageAutoActions { reject_telegram: true, ..StageAutoActions::default() };
                let notes = format!("Rejeitada automaticamente: spam score {}", verdict.score);
                self.transition(application, spam, &notes, implied, settings).await?;
                tracing::info!(application_id = %application.id, spam_score = verdict.score, reasons = ?verdict.reasons, "🚫 Rejeitada como spam");
                return Ok(AutoDecision::Rejected);
            }
        }

        let auto_approve = &settings.auto_approve;
        if settings.require_form || !auto_approve.enabled {
            return Ok(AutoDecision::Pending);
        }
        if !conditions_hold(&auto_approve.conditions, verdict.score, profile) {
            return Ok(AutoDecision::Pending);
        }

        let Some(approved) = find_stage(stages, STAGE_APPROVED) else {
            tracing::warn!(application_id = %application.id, "Aprovação automática sem estágio 'approved'");
            return Ok(AutoDecision::Pending);
        };
        let implied = StageAutoActions { approve_telegram: true, ..StageAutoActions::default() };
        self.transition(application, approved, "Aprovada automaticamente", implied, settings).await?;
        tracing::info!(application_id = %application.id, "✅ Aprovada automaticamente");
        Ok(AutoDecision::Approved)
    }

    // =========================================================================
    //  TRANSIÇÕES
    // =========================================================================

    /// Transição explícita de estágio (operador ou automação externa).
    pub async fn move_application(&self, application_id: Uuid, stage_id: Uuid, notes: &str) -> Result<AutoDecision, AppError> {
        let application = self
            .applications
            .find_application(application_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("candidatura {application_id}")))?;
        let stages = self.applications.list_stages(application.pipeline_id).await?;
        let target = stages
            .iter()
            .find(|s| s.id == stage_id)
            .ok_or_else(|| AppError::NotFound(format!("estágio {stage_id}")))?;

        let settings = match application.form_id {
            Some(form_id) => self
                .applications
                .find_active_form(application.pipeline_id)
                .await?
                .filter(|f| f.id == form_id)
                .map(|f| f.pipeline_settings())
                .unwrap_or_default(),
            None => PipelineSettings::default(),
        };

        // A checagem de estágio terminal acontece no store, sob o lock da linha
        self.transition(&application, target, notes, StageAutoActions::default(), &settings).await?;
        Ok(decision_for(Some(target)))
    }

    /// Move de estágio e executa as ações automáticas depois do commit; elas nunca desfazem a transição.
    /// A ação implícita da regra sempre roda; as do estágio só quando ele é terminal.
    async fn transition(
        &self,
        application: &Application,
        target: &PipelineStage,
        notes: &str,
        implied: StageAutoActions,
        settings: &PipelineSettings,
    ) -> Result<(), AppError> {
        self.applications.move_to_stage(application.id, target.id, notes).await?;

        let actions = if target.is_terminal { union(&target.auto_actions.0, &implied) } else { implied };
        self.run_auto_actions(application, &actions, settings).await;
        Ok(())
    }

    // =========================================================================
    //  AÇÕES AUTOMÁTICAS (cada uma isolada)
    // =========================================================================

    async fn run_auto_actions(&self, application: &Application, actions: &StageAutoActions, settings: &PipelineSettings) {
        let chat_id = application.tg_chat_id;
        let user_id = application.tg_user_id;

        if actions.approve_telegram {
            let action = PlatformAction::ApproveJoinRequest { chat_id, user_id };
            let result = self.platform.execute(&action).await;
            self.record(application, ApplicationEventKind::TgApproved, &action, &result).await;
            if result.ok {
                self.copy_form_data(application).await;
            }
        }

        if actions.reject_telegram {
            let action = PlatformAction::RejectJoinRequest { chat_id, user_id };
            let result = self.platform.execute(&action).await;
            self.record(application, ApplicationEventKind::TgRejected, &action, &result).await;
        }

        if actions.ban_telegram {
            let action = PlatformAction::BanMember { chat_id, user_id };
            let result = self.platform.execute(&action).await;
            self.record(application, ApplicationEventKind::TgBanned, &action, &result).await;
        }

        if let Some(template_id) = &actions.send_message_template_id {
            match settings.welcome_message.as_deref().filter(|t| !t.trim().is_empty()) {
                // Mensagem privada: o chat com o usuário tem o id dele
                Some(text) => {
                    let action = PlatformAction::SendMessage { chat_id: user_id, text: text.to_string() };
                    self.queue(application, ApplicationEventKind::WelcomeQueued, &action, json!({ "template_id": template_id }))
                        .await;
                }
                None => {
                    tracing::debug!(application_id = %application.id, template_id = %template_id, "Modelo de boas-vindas sem texto configurado");
                }
            }
        }

        if actions.notify_admins {
            match settings.notify_chat_id {
                Some(admin_chat) => {
                    let text = format!(
                        "Candidatura {} de {} no chat {}: {}",
                        application.id,
                        application_display_name(application),
                        chat_id,
                        application.spam_score
                    );
                    let action = PlatformAction::SendMessage { chat_id: admin_chat, text };
                    self.queue(application, ApplicationEventKind::AdminsNotified, &action, json!({ "chat_id": admin_chat }))
                        .await;
                }
                None => tracing::debug!(application_id = %application.id, "notify_admins sem chat de operadores"),
            }
        }
    }

    async fn record(&self, application: &Application, kind: ApplicationEventKind, action: &PlatformAction, result: &ActionResult) {
        let data = json!({
            "chat_id": application.tg_chat_id,
            "success": result.ok,
            "error_code": result.error_code,
            "description": result.description,
        });
        if let Err(e) = self.applications.log_event(application.id, kind, data).await {
            tracing::warn!(application_id = %application.id, event = kind.as_str(), error = %e, "Falha ao registrar evento da candidatura");
        }

        if result.ok {
            return;
        }
        if result.is_expected_failure() {
            tracing::info!(
                application_id = %application.id,
                error_code = ?result.error_code,
                description = ?result.description,
                "Ação na plataforma sem efeito (alvo indisponível)"
            );
            return;
        }

        tracing::error!(
            application_id = %application.id,
            error_code = ?result.error_code,
            error = %result.error_summary(),
            "❌ Falha inesperada em ação na plataforma, enfileirando nova tentativa"
        );
        self.queue(application, ApplicationEventKind::RetryQueued, action, json!({ "event": kind.as_str() }))
            .await;
    }

    async fn queue(&self, application: &Application, kind: ApplicationEventKind, action: &PlatformAction, data: Value) {
        match self.outbox.enqueue(Some(application.id), action).await {
            Ok(outbox_id) => {
                let mut data = data;
                if let Value::Object(map) = &mut data {
                    map.insert("outbox_id".into(), json!(outbox_id));
                }
                if let Err(e) = self.applications.log_event(application.id, kind, data).await {
                    tracing::warn!(application_id = %application.id, error = %e, "Falha ao registrar evento da candidatura");
                }
            }
            Err(e) => {
                tracing::error!(application_id = %application.id, error = %e, "Falha ao enfileirar ação na plataforma");
            }
        }
    }

    /// Respostas do formulário vão para os atributos do participante como `application_<campo>`.
    async fn copy_form_data(&self, application: &Application) {
        let Some(participant_id) = application.participant_id else { return };

        // Relê: o formulário pode ter sido preenchido depois da criação
        let form_data = match self.applications.find_application(application.id).await {
            Ok(Some(fresh)) => fresh.form_data.0,
            Ok(None) => return,
            Err(e) => {
                tracing::warn!(application_id = %application.id, error = %e, "Falha ao reler a candidatura");
                return;
            }
        };

        let attributes = form_attributes(&form_data);
        if attributes.is_empty() {
            return;
        }
        let fields = attributes.len();
        let patch = ParticipantPatch { attributes: Some(attributes), ..ParticipantPatch::default() };
        match self.participants.apply_patch(participant_id, &patch).await {
            Ok(()) => tracing::info!(%participant_id, fields, "✅ Respostas do formulário salvas no participante"),
            Err(e) => tracing::warn!(%participant_id, error = %e, "Falha ao salvar respostas no participante"),
        }
    }
}

// --- Regras puras ---

fn find_stage<'a>(stages: &'a [PipelineStage], slug: &str) -> Option<&'a PipelineStage> {
    stages.iter().find(|s| s.slug == slug)
}

fn decision_for(stage: Option<&PipelineStage>) -> AutoDecision {
    match stage.and_then(|s| s.terminal_type) {
        Some(TerminalType::Success) => AutoDecision::Approved,
        Some(TerminalType::Failure) => AutoDecision::Rejected,
        None => AutoDecision::Pending,
    }
}

/// Todas as condições configuradas precisam valer.
pub fn conditions_hold(conditions: &AutoApproveConditions, spam_score: i32, profile: &JoinProfile) -> bool {
    if let Some(bound) = conditions.spam_score_below {
        if f64::from(spam_score) >= bound {
            return false;
        }
    }
    if conditions.has_photo && !profile.has_photo {
        return false;
    }
    if conditions.has_username && profile.username.as_deref().is_none_or(|u| u.trim().is_empty()) {
        return false;
    }
    true
}

/// A ação implícita da regra entra junto com as do estágio; cada chamada externa acontece uma vez.
fn union(stage: &StageAutoActions, implied: &StageAutoActions) -> StageAutoActions {
    StageAutoActions {
        approve_telegram: stage.approve_telegram || implied.approve_telegram,
        reject_telegram: stage.reject_telegram || implied.reject_telegram,
        ban_telegram: stage.ban_telegram || implied.ban_telegram,
        send_message_template_id: stage
            .send_message_template_id
            .clone()
            .or_else(|| implied.send_message_template_id.clone()),
        notify_admins: stage.notify_admins || implied.notify_admins,
    }
}

fn form_attributes(form_data: &Map<String, Value>) -> Map<String, Value> {
    form_data
        .iter()
        .filter(|(_, value)| match value {
            Value::Null => false,
            Value::String(s) => !s.trim().is_empty(),
            _ => true,
        })
        .map(|(field, value)| (format!("application_{field}"), value.clone()))
        .collect()
}

fn application_display_name(application: &Application) -> String {
    let data = &application.tg_user_data.0;
    data.get("username")
        .and_then(Value::as_str)
        .map(|u| format!("@{u}"))
        .or_else(|| data.get("first_name").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(|| application.tg_user_id.to_string())
}
