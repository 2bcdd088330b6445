// src/db/memory.rs

// Implementação em memória de todos os stores, para os testes dos serviços.
// Reproduz as garantias que o Postgres dá via chaves únicas e UPDATEs condicionais.

use std::{
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde_json::{json, Map, Value};
use sqlx::types::Json;
use uuid::Uuid;

use crate::{
    common::error::AppError,
    config::Stores,
    db::store::{
        ActivityStore, ApplicationStore, MembershipStore, MetricsStore, OrgStore, OutboxStore, ParticipantStore,
    },
    models::{
        activity::{ActivityEventType, NaturalKey, NewActivityEvent},
        application::{
            Application, ApplicationEventKind, ApplicationForm, NewApplication, Pipeline, PipelineStage,
            StageAutoActions, TerminalType, PIPELINE_JOIN_REQUEST, STAGE_APPROVED, STAGE_SPAM,
        },
        membership::GroupMembership,
        metrics::{DayWindow, GroupMetricsDay},
        org::{BindingStatus, BotStatus, OrgChatBinding, TelegramGroup},
        outbox::{OutboxEntry, PlatformAction, OUTBOX_MAX_ATTEMPTS},
        participant::{NewParticipant, Participant, ParticipantPatch},
    },
};

#[derive(Default)]
struct State {
    groups: HashMap<i64, TelegramGroup>,
    bindings: Vec<OrgChatBinding>,
    participants: Vec<Participant>,
    memberships: Vec<GroupMembership>,
    events: Vec<(i64, NewActivityEvent)>,
    texts: HashMap<i64, String>,
    processed: HashSet<i64>,
    metrics: HashMap<(Uuid, i64, NaiveDate), GroupMetricsDay>,
    pipelines: Vec<Pipeline>,
    forms: Vec<ApplicationForm>,
    stages: Vec<PipelineStage>,
    applications: Vec<Application>,
    application_events: Vec<(Uuid, String, Value)>,
    outbox: Vec<OutboxEntry>,
    next_event_id: i64,
    next_outbox_id: i64,
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
    // Simula outro worker criando o mesmo participante entre a busca e o INSERT
    race_next_participant_create: AtomicBool,
    // Simula a busca pela chave natural perdendo uma inserção concorrente
    hide_next_key_lookup: AtomicBool,
    failing_counter: Mutex<Option<ActivityEventType>>,
    failing_tenant: Mutex<Option<Uuid>>,
    failing_outbox_writes: AtomicBool,
}

/// Ids dos estágios criados por `seed_join_pipeline`.
#[derive(Debug, Clone, Copy)]
pub struct SeededPipeline {
    pub pipeline_id: Uuid,
    pub form_id: Uuid,
    pub new_stage: Uuid,
    pub approved_stage: Uuid,
    pub spam_stage: Uuid,
}

pub fn blank_participant(tenant_id: Uuid, tg_user_id: Option<i64>) -> Participant {
    let now = Utc::now();
    Participant {
        id: Uuid::new_v4(),
        tenant_id,
        tg_user_id,
        first_name: None,
        last_name: None,
        full_name: None,
        username: None,
        email: None,
        phone: None,
        source: "telegram".to_string(),
        merged_into: None,
        status: "active".to_string(),
        attributes: Json(Map::new()),
        activity_score: 0,
        engagement_category: None,
        last_activity_at: None,
        created_at: now,
        updated_at: now,
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    // --- Preparação dos cenários ---

    pub fn with_binding(self, tenant_id: Uuid, tg_chat_id: i64) -> Self {
        self.state.lock().unwrap().bindings.push(OrgChatBinding {
            tenant_id,
            tg_chat_id,
            status: BindingStatus::Active,
            archived_reason: None,
            archived_at: None,
            created_at: Utc::now(),
        });
        self
    }

    pub fn insert_participant(&self, participant: Participant) {
        self.state.lock().unwrap().participants.push(participant);
    }

    pub fn race_next_participant_create(&self) {
        self.race_next_participant_create.store(true, Ordering::SeqCst);
    }

    pub fn hide_next_key_lookup(&self) {
        self.hide_next_key_lookup.store(true, Ordering::SeqCst);
    }

    /// Toda busca de participante desse tenant falha.
    pub fn fail_tenant(&self, tenant_id: Uuid) {
        *self.failing_tenant.lock().unwrap() = Some(tenant_id);
    }

    /// `mark_done`/`mark_failed` passam a falhar.
    pub fn fail_outbox_writes(&self) {
        self.failing_outbox_writes.store(true, Ordering::SeqCst);
    }

    pub fn fail_counter(&self, event_type: ActivityEventType) {
        *self.failing_counter.lock().unwrap() = Some(event_type);
    }

    /// Pipeline de pedidos de entrada com os estágios new → approved | spam.
    pub fn seed_join_pipeline(&self, tenant_id: Uuid, tg_chat_id: Option<i64>, settings: Value) -> SeededPipeline {
        let pipeline_id = Uuid::new_v4();
        let form_id = Uuid::new_v4();
        let stage = |slug: &str, position: i32, terminal: Option<TerminalType>, actions: StageAutoActions| PipelineStage {
            id: Uuid::new_v4(),
            pipeline_id,
            name: slug.to_string(),
            slug: slug.to_string(),
            position,
            is_terminal: terminal.is_some(),
            terminal_type: terminal,
            auto_actions: Json(actions),
        };

        let new_stage = stage("new", 0, None, StageAutoActions::default());
        let approved = stage(STAGE_APPROVED, 1, Some(TerminalType::Success), StageAutoActions::default());
        let spam = stage(
            STAGE_SPAM,
            2,
            Some(TerminalType::Failure),
            StageAutoActions { reject_telegram: true, ..StageAutoActions::default() },
        );
        let seeded = SeededPipeline {
            pipeline_id,
            form_id,
            new_stage: new_stage.id,
            approved_stage: approved.id,
            spam_stage: spam.id,
        };

        let mut state = self.state.lock().unwrap();
        state.pipelines.push(Pipeline {
            id: pipeline_id,
            tenant_id,
            name: "Entrada".to_string(),
            pipeline_type: PIPELINE_JOIN_REQUEST.to_string(),
            tg_chat_id,
            is_default: tg_chat_id.is_none(),
            is_active: true,
            created_at: Utc::now(),
        });
        state.forms.push(ApplicationForm {
            id: form_id,
            pipeline_id,
            settings: Json(settings),
            is_active: true,
            created_at: Utc::now(),
        });
        state.stages.extend([new_stage, approved, spam]);
        seeded
    }

    pub fn set_stage_actions(&self, stage_id: Uuid, actions: StageAutoActions) {
        let mut state = self.state.lock().unwrap();
        if let Some(stage) = state.stages.iter_mut().find(|s| s.id == stage_id) {
            stage.auto_actions = Json(actions);
        }
    }

    pub fn set_stage_terminal(&self, stage_id: Uuid, terminal: Option<TerminalType>) {
        let mut state = self.state.lock().unwrap();
        if let Some(stage) = state.stages.iter_mut().find(|s| s.id == stage_id) {
            stage.is_terminal = terminal.is_some();
            stage.terminal_type = terminal;
        }
    }

    pub fn remove_stage(&self, stage_id: Uuid) {
        self.state.lock().unwrap().stages.retain(|s| s.id != stage_id);
    }

    pub fn set_form_data(&self, application_id: Uuid, form_data: Map<String, Value>) {
        let mut state = self.state.lock().unwrap();
        if let Some(app) = state.applications.iter_mut().find(|a| a.id == application_id) {
            app.form_data = Json(form_data);
        }
    }

    // --- Inspeção ---

    pub fn participants(&self, tenant_id: Uuid) -> Vec<Participant> {
        let state = self.state.lock().unwrap();
        state.participants.iter().filter(|p| p.tenant_id == tenant_id).cloned().collect()
    }

    pub fn participant(&self, id: Uuid) -> Option<Participant> {
        self.state.lock().unwrap().participants.iter().find(|p| p.id == id).cloned()
    }

    pub fn memberships(&self) -> Vec<GroupMembership> {
        self.state.lock().unwrap().memberships.clone()
    }

    pub fn events(&self) -> Vec<(i64, NewActivityEvent)> {
        self.state.lock().unwrap().events.clone()
    }

    pub fn text(&self, event_id: i64) -> Option<String> {
        self.state.lock().unwrap().texts.get(&event_id).cloned()
    }

    pub fn group(&self, tg_chat_id: i64) -> Option<TelegramGroup> {
        self.state.lock().unwrap().groups.get(&tg_chat_id).cloned()
    }

    pub fn bindings(&self) -> Vec<OrgChatBinding> {
        self.state.lock().unwrap().bindings.clone()
    }

    pub fn metrics_row(&self, tenant_id: Uuid, tg_chat_id: i64, day: NaiveDate) -> Option<GroupMetricsDay> {
        self.state.lock().unwrap().metrics.get(&(tenant_id, tg_chat_id, day)).cloned()
    }

    pub fn metrics_rows(&self) -> usize {
        self.state.lock().unwrap().metrics.len()
    }

    pub fn applications(&self) -> Vec<Application> {
        self.state.lock().unwrap().applications.clone()
    }

    pub fn application_events(&self, application_id: Uuid) -> Vec<String> {
        let state = self.state.lock().unwrap();
        state
            .application_events
            .iter()
            .filter(|(id, _, _)| *id == application_id)
            .map(|(_, kind, _)| kind.clone())
            .collect()
    }

    pub fn outbox(&self) -> Vec<OutboxEntry> {
        self.state.lock().unwrap().outbox.clone()
    }

    fn check_outbox_write(&self) -> Result<(), AppError> {
        if self.failing_outbox_writes.load(Ordering::SeqCst) {
            return Err(AppError::InternalServerError(anyhow::anyhow!("fila indisponível")));
        }
        Ok(())
    }

    fn check_counter(&self, event_type: ActivityEventType) -> Result<(), AppError> {
        if *self.failing_counter.lock().unwrap() == Some(event_type) {
            return Err(AppError::InternalServerError(anyhow::anyhow!("contador indisponível")));
        }
        Ok(())
    }
}

impl Stores {
    /// Todos os stores apontando para o mesmo `MemoryStore`.
    pub fn memory(store: &Arc<MemoryStore>) -> Self {
        Self {
            orgs: store.clone(),
            participants: store.clone(),
            memberships: store.clone(),
            activity: store.clone(),
            metrics: store.clone(),
            applications: store.clone(),
            outbox: store.clone(),
        }
    }
}

fn in_window(state: &State, tenant_id: Uuid, tg_chat_id: i64, window: DayWindow) -> impl Iterator<Item = &NewActivityEvent> {
    state
        .events
        .iter()
        .map(|(_, e)| e)
        .filter(move |e| e.tenant_id == tenant_id && e.tg_chat_id == tg_chat_id && window.contains(e.occurred_at))
}

#[async_trait]
impl OrgStore for MemoryStore {
    async fn active_tenants_for_chat(&self, tg_chat_id: i64) -> Result<Vec<Uuid>, AppError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .bindings
            .iter()
            .filter(|b| b.tg_chat_id == tg_chat_id && b.status == BindingStatus::Active)
            .map(|b| b.tenant_id)
            .collect())
    }

    async fn ensure_pending_group(&self, tg_chat_id: i64, title: Option<&str>) -> Result<(), AppError> {
        let mut state = self.state.lock().unwrap();
        let group = state.groups.entry(tg_chat_id).or_insert_with(|| TelegramGroup {
            tg_chat_id,
            title: None,
            bot_status: BotStatus::Pending,
            last_activity_at: None,
            last_sync_at: None,
            created_at: Utc::now(),
        });
        if let Some(title) = title {
            group.title = Some(title.to_string());
        }
        Ok(())
    }

    async fn set_bot_status(&self, tg_chat_id: i64, title: Option<&str>, status: BotStatus) -> Result<(), AppError> {
        self.ensure_pending_group(tg_chat_id, title).await?;
        let mut state = self.state.lock().unwrap();
        if let Some(group) = state.groups.get_mut(&tg_chat_id) {
            group.bot_status = status;
            group.last_sync_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn archive_bindings(&self, tg_chat_id: i64, reason: &str) -> Result<u64, AppError> {
        let mut state = self.state.lock().unwrap();
        let mut archived = 0;
        for binding in state
            .bindings
            .iter_mut()
            .filter(|b| b.tg_chat_id == tg_chat_id && b.status == BindingStatus::Active)
        {
            binding.status = BindingStatus::Archived;
            binding.archived_reason = Some(reason.to_string());
            binding.archived_at = Some(Utc::now());
            archived += 1;
        }
        Ok(archived)
    }

    async fn bind_chat(&self, tenant_id: Uuid, tg_chat_id: i64) -> Result<OrgChatBinding, AppError> {
        let mut state = self.state.lock().unwrap();
        if let Some(binding) = state
            .bindings
            .iter_mut()
            .find(|b| b.tenant_id == tenant_id && b.tg_chat_id == tg_chat_id)
        {
            binding.status = BindingStatus::Active;
            binding.archived_reason = None;
            binding.archived_at = None;
            return Ok(binding.clone());
        }
        let binding = OrgChatBinding {
            tenant_id,
            tg_chat_id,
            status: BindingStatus::Active,
            archived_reason: None,
            archived_at: None,
            created_at: Utc::now(),
        };
        state.bindings.push(binding.clone());
        Ok(binding)
    }

    async fn list_active_bindings(&self) -> Result<Vec<OrgChatBinding>, AppError> {
        let state = self.state.lock().unwrap();
        Ok(state.bindings.iter().filter(|b| b.status == BindingStatus::Active).cloned().collect())
    }

    async fn touch_group_activity(&self, tg_chat_id: i64, at: DateTime<Utc>) -> Result<(), AppError> {
        let mut state = self.state.lock().unwrap();
        if let Some(group) = state.groups.get_mut(&tg_chat_id) {
            group.last_activity_at = Some(group.last_activity_at.map_or(at, |prev| prev.max(at)));
        }
        Ok(())
    }
}

#[async_trait]
impl ParticipantStore for MemoryStore {
    async fn find_by_external_id(&self, tenant_id: Uuid, tg_user_id: i64) -> Result<Option<Participant>, AppError> {
        if *self.failing_tenant.lock().unwrap() == Some(tenant_id) {
            return Err(AppError::InternalServerError(anyhow::anyhow!("banco indisponível para o tenant")));
        }
        let state = self.state.lock().unwrap();
        Ok(state
            .participants
            .iter()
            .find(|p| p.tenant_id == tenant_id && p.tg_user_id == Some(tg_user_id) && p.merged_into.is_none())
            .cloned())
    }

    async fn find_merged_by_external_id(&self, tenant_id: Uuid, tg_user_id: i64) -> Result<Option<Participant>, AppError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .participants
            .iter()
            .filter(|p| p.tenant_id == tenant_id && p.tg_user_id == Some(tg_user_id) && p.merged_into.is_some())
            .max_by_key(|p| p.updated_at)
            .cloned())
    }

    async fn find_by_id(&self, tenant_id: Uuid, id: Uuid) -> Result<Option<Participant>, AppError> {
        let state = self.state.lock().unwrap();
        Ok(state.participants.iter().find(|p| p.tenant_id == tenant_id && p.id == id).cloned())
    }

    async fn create(&self, new: &NewParticipant) -> Result<(Participant, bool), AppError> {
        let mut state = self.state.lock().unwrap();
        let build = || {
            let mut p = blank_participant(new.tenant_id, Some(new.tg_user_id));
            p.first_name = new.fields.first_name.clone();
            p.last_name = new.fields.last_name.clone();
            p.full_name = new.fields.full_name.clone();
            p.username = new.fields.username.clone();
            p.email = new.fields.email.clone();
            p.phone = new.fields.phone.clone();
            p.source = new.fields.source.as_str().to_string();
            p.attributes = Json(new.fields.attributes.clone());
            p
        };

        if self.race_next_participant_create.swap(false, Ordering::SeqCst) {
            state.participants.push(build());
            return Err(AppError::UniqueConstraintViolation(format!("participante tg_user_id={}", new.tg_user_id)));
        }

        if let Some(existing) = state
            .participants
            .iter()
            .find(|p| p.tenant_id == new.tenant_id && p.tg_user_id == Some(new.tg_user_id) && p.merged_into.is_none())
        {
            return Ok((existing.clone(), false));
        }

        let participant = build();
        state.participants.push(participant.clone());
        Ok((participant, true))
    }

    async fn apply_patch(&self, id: Uuid, patch: &ParticipantPatch) -> Result<(), AppError> {
        let mut state = self.state.lock().unwrap();
        let participant = state
            .participants
            .iter_mut()
            .find(|p| p.id == id)
            .ok_or_else(|| AppError::NotFound(format!("participante {id}")))?;

        let set = |slot: &mut Option<String>, value: &Option<String>| {
            if let Some(v) = value {
                *slot = Some(v.clone());
            }
        };
        set(&mut participant.first_name, &patch.first_name);
        set(&mut participant.last_name, &patch.last_name);
        set(&mut participant.full_name, &patch.full_name);
        set(&mut participant.username, &patch.username);
        set(&mut participant.email, &patch.email);
        set(&mut participant.phone, &patch.phone);
        if let Some(source) = patch.source {
            participant.source = source.as_str().to_string();
        }
        if let Some(attributes) = &patch.attributes {
            participant.attributes.0.extend(attributes.clone());
        }
        participant.updated_at = Utc::now();
        Ok(())
    }

    async fn mark_merged(&self, tenant_id: Uuid, duplicate_id: Uuid, target_id: Uuid) -> Result<(), AppError> {
        let mut state = self.state.lock().unwrap();
        if !state.participants.iter().any(|p| p.tenant_id == tenant_id && p.id == duplicate_id) {
            return Err(AppError::NotFound(format!("participante {duplicate_id}")));
        }
        for p in state.participants.iter_mut().filter(|p| p.tenant_id == tenant_id) {
            if p.merged_into == Some(duplicate_id) {
                p.merged_into = Some(target_id);
            }
            if p.id == duplicate_id {
                p.merged_into = Some(target_id);
                p.status = "merged".to_string();
                p.updated_at = Utc::now();
            }
        }

        let now = Utc::now();
        let moved: Vec<GroupMembership> =
            state.memberships.iter().filter(|m| m.participant_id == duplicate_id).cloned().collect();
        for dup in moved {
            match state
                .memberships
                .iter_mut()
                .find(|m| m.participant_id == target_id && m.tg_chat_id == dup.tg_chat_id)
            {
                Some(existing) => {
                    if dup.is_active && !existing.is_active {
                        existing.is_active = true;
                        existing.left_at = None;
                    }
                    existing.joined_at = existing.joined_at.min(dup.joined_at);
                }
                None => state.memberships.push(GroupMembership { participant_id: target_id, ..dup }),
            }
        }
        for m in state.memberships.iter_mut().filter(|m| m.participant_id == duplicate_id && m.is_active) {
            m.is_active = false;
            m.left_at = Some(now);
        }
        Ok(())
    }

    async fn touch_activity(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), AppError> {
        let mut state = self.state.lock().unwrap();
        if let Some(p) = state.participants.iter_mut().find(|p| p.id == id) {
            p.last_activity_at = Some(p.last_activity_at.map_or(at, |prev| prev.max(at)));
        }
        Ok(())
    }

    async fn list_canonical(&self, tenant_id: Uuid) -> Result<Vec<Participant>, AppError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .participants
            .iter()
            .filter(|p| p.tenant_id == tenant_id && p.merged_into.is_none())
            .cloned()
            .collect())
    }

    async fn update_engagement(&self, id: Uuid, score: i32, category: &str) -> Result<(), AppError> {
        let mut state = self.state.lock().unwrap();
        if let Some(p) = state.participants.iter_mut().find(|p| p.id == id) {
            p.activity_score = score;
            p.engagement_category = Some(category.to_string());
        }
        Ok(())
    }
}

#[async_trait]
impl MembershipStore for MemoryStore {
    async fn find(&self, participant_id: Uuid, tg_chat_id: i64) -> Result<Option<GroupMembership>, AppError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .memberships
            .iter()
            .find(|m| m.participant_id == participant_id && m.tg_chat_id == tg_chat_id)
            .cloned())
    }

    async fn insert(&self, participant_id: Uuid, tg_chat_id: i64, active: bool, at: DateTime<Utc>) -> Result<bool, AppError> {
        let mut state = self.state.lock().unwrap();
        if state
            .memberships
            .iter()
            .any(|m| m.participant_id == participant_id && m.tg_chat_id == tg_chat_id)
        {
            return Ok(false);
        }
        state.memberships.push(GroupMembership {
            participant_id,
            tg_chat_id,
            joined_at: at,
            left_at: if active { None } else { Some(at) },
            is_active: active,
        });
        Ok(true)
    }

    async fn reactivate(&self, participant_id: Uuid, tg_chat_id: i64, at: DateTime<Utc>) -> Result<bool, AppError> {
        let mut state = self.state.lock().unwrap();
        match state
            .memberships
            .iter_mut()
            .find(|m| m.participant_id == participant_id && m.tg_chat_id == tg_chat_id && !m.is_active)
        {
            Some(m) => {
                m.is_active = true;
                m.joined_at = at;
                m.left_at = None;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn deactivate(&self, participant_id: Uuid, tg_chat_id: i64, at: DateTime<Utc>) -> Result<bool, AppError> {
        let mut state = self.state.lock().unwrap();
        match state
            .memberships
            .iter_mut()
            .find(|m| m.participant_id == participant_id && m.tg_chat_id == tg_chat_id && m.is_active)
        {
            Some(m) => {
                m.is_active = false;
                m.left_at = Some(at);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[async_trait]
impl ActivityStore for MemoryStore {
    async fn find_by_key(&self, key: &NaturalKey) -> Result<Option<i64>, AppError> {
        if self.hide_next_key_lookup.swap(false, Ordering::SeqCst) {
            return Ok(None);
        }
        let state = self.state.lock().unwrap();
        Ok(state
            .events
            .iter()
            .find(|(_, e)| e.natural_key().as_ref() == Some(key))
            .map(|(id, _)| *id))
    }

    async fn insert(&self, event: &NewActivityEvent) -> Result<i64, AppError> {
        let mut state = self.state.lock().unwrap();
        if let Some(key) = event.natural_key() {
            if state.events.iter().any(|(_, e)| e.natural_key() == Some(key)) {
                return Err(AppError::UniqueConstraintViolation("evento de atividade".to_string()));
            }
        }
        state.next_event_id += 1;
        let id = state.next_event_id;
        if let Some(text) = event.text.as_ref().filter(|t| !t.is_empty()) {
            state.texts.insert(id, text.clone());
        }
        state.events.push((id, event.clone()));
        Ok(id)
    }

    async fn is_update_processed(&self, update_id: i64) -> Result<bool, AppError> {
        Ok(self.state.lock().unwrap().processed.contains(&update_id))
    }

    async fn record_update(&self, update_id: i64, _tg_chat_id: Option<i64>) -> Result<(), AppError> {
        self.state.lock().unwrap().processed.insert(update_id);
        Ok(())
    }
}

#[async_trait]
impl MetricsStore for MemoryStore {
    async fn count_events(
        &self,
        tenant_id: Uuid,
        tg_chat_id: i64,
        event_type: ActivityEventType,
        window: DayWindow,
    ) -> Result<i64, AppError> {
        self.check_counter(event_type)?;
        let state = self.state.lock().unwrap();
        Ok(in_window(&state, tenant_id, tg_chat_id, window)
            .filter(|e| e.event_type == event_type)
            .count() as i64)
    }

    async fn count_replies(&self, tenant_id: Uuid, tg_chat_id: i64, window: DayWindow) -> Result<i64, AppError> {
        let state = self.state.lock().unwrap();
        Ok(in_window(&state, tenant_id, tg_chat_id, window)
            .filter(|e| e.event_type == ActivityEventType::Message && e.reply_to_message_id.is_some())
            .count() as i64)
    }

    async fn count_active_users(&self, tenant_id: Uuid, tg_chat_id: i64, window: DayWindow) -> Result<i64, AppError> {
        let state = self.state.lock().unwrap();
        let mut people: HashSet<Uuid> = HashSet::new();
        let mut unattributed: HashSet<i64> = HashSet::new();
        for e in in_window(&state, tenant_id, tg_chat_id, window).filter(|e| e.event_type.counts_as_active()) {
            match e.participant_id {
                Some(pid) => {
                    let canonical = state
                        .participants
                        .iter()
                        .find(|p| p.id == pid)
                        .map(|p| p.canonical_id())
                        .unwrap_or(pid);
                    people.insert(canonical);
                }
                None => {
                    unattributed.insert(e.tg_user_id);
                }
            }
        }
        Ok((people.len() + unattributed.len()) as i64)
    }

    async fn upsert_day(&self, row: &GroupMetricsDay) -> Result<(), AppError> {
        let mut state = self.state.lock().unwrap();
        state.metrics.insert((row.tenant_id, row.tg_chat_id, row.day), row.clone());
        Ok(())
    }

    async fn message_counts_since(&self, tenant_id: Uuid, since: DateTime<Utc>) -> Result<Vec<(Uuid, i64)>, AppError> {
        let state = self.state.lock().unwrap();
        let mut counts: HashMap<Uuid, i64> = HashMap::new();
        for (_, e) in &state.events {
            if e.tenant_id != tenant_id || e.event_type != ActivityEventType::Message || e.occurred_at < since {
                continue;
            }
            let Some(pid) = e.participant_id else { continue };
            let canonical = state
                .participants
                .iter()
                .find(|p| p.id == pid)
                .map(|p| p.canonical_id())
                .unwrap_or(pid);
            *counts.entry(canonical).or_default() += 1;
        }
        Ok(counts.into_iter().collect())
    }
}

#[async_trait]
impl ApplicationStore for MemoryStore {
    async fn find_pipeline_for_chat(
        &self,
        tenant_id: Uuid,
        tg_chat_id: i64,
        pipeline_type: &str,
    ) -> Result<Option<Pipeline>, AppError> {
        let state = self.state.lock().unwrap();
        let candidates = state
            .pipelines
            .iter()
            .filter(|p| p.tenant_id == tenant_id && p.pipeline_type == pipeline_type && p.is_active);
        let specific = candidates.clone().find(|p| p.tg_chat_id == Some(tg_chat_id));
        Ok(specific.or_else(|| candidates.clone().find(|p| p.is_default)).cloned())
    }

    async fn find_active_form(&self, pipeline_id: Uuid) -> Result<Option<ApplicationForm>, AppError> {
        let state = self.state.lock().unwrap();
        Ok(state.forms.iter().find(|f| f.pipeline_id == pipeline_id && f.is_active).cloned())
    }

    async fn list_stages(&self, pipeline_id: Uuid) -> Result<Vec<PipelineStage>, AppError> {
        let state = self.state.lock().unwrap();
        let mut stages: Vec<PipelineStage> =
            state.stages.iter().filter(|s| s.pipeline_id == pipeline_id).cloned().collect();
        stages.sort_by_key(|s| s.position);
        Ok(stages)
    }

    async fn create_application(&self, new: &NewApplication) -> Result<(Application, bool), AppError> {
        let mut state = self.state.lock().unwrap();
        if let Some(existing) = state.applications.iter().find(|a| {
            a.tenant_id == new.tenant_id
                && a.pipeline_id == new.pipeline_id
                && a.tg_user_id == new.tg_user_id
                && a.request_key == new.request_key
        }) {
            return Ok((existing.clone(), false));
        }

        let now = Utc::now();
        let application = Application {
            id: Uuid::new_v4(),
            tenant_id: new.tenant_id,
            pipeline_id: new.pipeline_id,
            form_id: new.form_id,
            stage_id: new.stage_id,
            participant_id: new.participant_id,
            tg_user_id: new.tg_user_id,
            tg_chat_id: new.tg_chat_id,
            request_key: new.request_key.clone(),
            spam_score: new.spam_score,
            spam_reasons: new.spam_reasons.clone(),
            tg_user_data: Json(new.tg_user_data.clone()),
            form_data: Json(Map::new()),
            notes: None,
            created_at: now,
            updated_at: now,
        };
        state.applications.push(application.clone());
        state.application_events.push((application.id, "created".to_string(), json!({})));
        Ok((application, true))
    }

    async fn move_to_stage(&self, application_id: Uuid, stage_id: Uuid, notes: &str) -> Result<(), AppError> {
        let mut state = self.state.lock().unwrap();
        let State { applications, stages, application_events, .. } = &mut *state;
        let app = applications
            .iter_mut()
            .find(|a| a.id == application_id)
            .ok_or_else(|| AppError::NotFound(format!("candidatura {application_id}")))?;
        if stages.iter().any(|s| s.id == app.stage_id && s.is_terminal) {
            return Err(AppError::ApplicationClosed(application_id));
        }
        let from = app.stage_id;
        app.stage_id = stage_id;
        app.notes = Some(notes.to_string());
        app.updated_at = Utc::now();
        application_events.push((
            application_id,
            ApplicationEventKind::StageChanged.as_str().to_string(),
            json!({ "from": from, "to": stage_id, "notes": notes }),
        ));
        Ok(())
    }

    async fn find_application(&self, application_id: Uuid) -> Result<Option<Application>, AppError> {
        let state = self.state.lock().unwrap();
        Ok(state.applications.iter().find(|a| a.id == application_id).cloned())
    }

    async fn log_event(&self, application_id: Uuid, kind: ApplicationEventKind, data: Value) -> Result<(), AppError> {
        self.state
            .lock()
            .unwrap()
            .application_events
            .push((application_id, kind.as_str().to_string(), data));
        Ok(())
    }
}

#[async_trait]
impl OutboxStore for MemoryStore {
    async fn enqueue(&self, application_id: Option<Uuid>, action: &PlatformAction) -> Result<i64, AppError> {
        let mut state = self.state.lock().unwrap();
        state.next_outbox_id += 1;
        let id = state.next_outbox_id;
        let now = Utc::now();
        state.outbox.push(OutboxEntry {
            id,
            application_id,
            action: Json(action.clone()),
            attempts: 0,
            last_error: None,
            next_attempt_at: now,
            done_at: None,
            created_at: now,
        });
        Ok(id)
    }

    async fn claim_due(&self, now: DateTime<Utc>, lease_until: DateTime<Utc>, limit: i64) -> Result<Vec<OutboxEntry>, AppError> {
        let mut state = self.state.lock().unwrap();
        let mut due: Vec<&mut OutboxEntry> = state
            .outbox
            .iter_mut()
            .filter(|e| e.done_at.is_none() && e.attempts < OUTBOX_MAX_ATTEMPTS && e.next_attempt_at <= now)
            .collect();
        due.sort_by_key(|e| e.next_attempt_at);
        due.truncate(limit.max(0) as usize);
        Ok(due
            .into_iter()
            .map(|e| {
                e.next_attempt_at = lease_until;
                e.clone()
            })
            .collect())
    }

    async fn mark_done(&self, id: i64, at: DateTime<Utc>) -> Result<(), AppError> {
        self.check_outbox_write()?;
        let mut state = self.state.lock().unwrap();
        if let Some(entry) = state.outbox.iter_mut().find(|e| e.id == id) {
            entry.done_at = Some(at);
            entry.attempts += 1;
        }
        Ok(())
    }

    async fn mark_failed(&self, id: i64, error: &str, next_attempt_at: DateTime<Utc>) -> Result<(), AppError> {
        self.check_outbox_write()?;
        let mut state = self.state.lock().unwrap();
        if let Some(entry) = state.outbox.iter_mut().find(|e| e.id == id) {
            entry.attempts += 1;
            entry.last_error = Some(error.to_string());
            entry.next_attempt_at = next_attempt_at;
        }
        Ok(())
    }
}
