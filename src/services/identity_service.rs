// src/services/identity_service.rs

use std::sync::Arc;

use uuid::Uuid;

use crate::{
    common::error::AppError,
    db::ParticipantStore,
    models::participant::{FieldSource, NewParticipant, ObservedFields, Participant, ParticipantPatch, ResolvedParticipant},
};

#[derive(Clone)]
pub struct IdentityService {
    store: Arc<dyn ParticipantStore>,
}

impl IdentityService {
    pub fn new(store: Arc<dyn ParticipantStore>) -> Self {
        Self { store }
    }

    // =========================================================================
    //  RESOLUÇÃO (caminho quente do webhook)
    // =========================================================================

    /// Encontra ou cria o participante de (tenant, tg_user_id) e devolve sempre o id canônico.
    /// Idempotente: a mesma entrada duas vezes devolve o mesmo id, sem duplicar.
    pub async fn resolve(
        &self,
        tenant_id: Uuid,
        tg_user_id: i64,
        observed: &ObservedFields,
    ) -> Result<ResolvedParticipant, AppError> {
        if let Some((record, redirected_from)) = self.locate(tenant_id, tg_user_id).await? {
            self.refresh(&record, observed).await?;
            return Ok(ResolvedParticipant { participant_id: record.id, created: false, redirected_from });
        }

        let new = NewParticipant { tenant_id, tg_user_id, fields: observed.clone() };
        let (record, created) = match self.store.create(&new).await {
            Ok(result) => result,
            // Perdemos a corrida: relê o vencedor em vez de propagar o erro
            Err(e) if e.is_conflict() => {
                tracing::debug!(%tenant_id, tg_user_id, "Corrida na criação do participante, relendo");
                match self.store.find_by_external_id(tenant_id, tg_user_id).await? {
                    Some(winner) => (winner, false),
                    None => return Err(e),
                }
            }
            Err(e) => return Err(e),
        };

        if created {
            tracing::info!(%tenant_id, tg_user_id, participant_id = %record.id, "✅ Novo participante");
        } else {
            self.refresh(&record, observed).await?;
        }

        Ok(ResolvedParticipant { participant_id: record.id, created, redirected_from: None })
    }

    /// Busca pela chave externa; se só existir um registro mesclado, segue o ponteiro (um salto).
    async fn locate(&self, tenant_id: Uuid, tg_user_id: i64) -> Result<Option<(Participant, Option<Uuid>)>, AppError> {
        if let Some(record) = self.store.find_by_external_id(tenant_id, tg_user_id).await? {
            return Ok(Some((record, None)));
        }

        let Some(merged) = self.store.find_merged_by_external_id(tenant_id, tg_user_id).await? else {
            return Ok(None);
        };

        match self.store.find_by_id(tenant_id, merged.canonical_id()).await? {
            Some(canonical) => Ok(Some((canonical, Some(merged.id)))),
            None => {
                tracing::error!(%tenant_id, merged_id = %merged.id, "Ponteiro de mesclagem aponta para registro inexistente");
                Ok(None)
            }
        }
    }

    async fn refresh(&self, record: &Participant, observed: &ObservedFields) -> Result<(), AppError> {
        let patch = merge_observed(record, observed);
        if !patch.is_empty() {
            self.store.apply_patch(record.id, &patch).await?;
        }
        Ok(())
    }

    // =========================================================================
    //  MESCLAGEM (operação do operador)
    // =========================================================================

    /// Une `duplicate` em `target`. Devolve o id canônico resultante.
    pub async fn merge(&self, tenant_id: Uuid, target_id: Uuid, duplicate_id: Uuid) -> Result<Uuid, AppError> {
        let target = self.canonical(tenant_id, target_id).await?;
        let duplicate = self.canonical(tenant_id, duplicate_id).await?;

        if target.id == duplicate.id {
            return Err(AppError::MergeRejected("os dois registros já são o mesmo participante".into()));
        }

        self.store.mark_merged(tenant_id, duplicate.id, target.id).await?;

        let patch = fill_from_duplicate(&target, &duplicate);
        if !patch.is_empty() {
            self.store.apply_patch(target.id, &patch).await?;
        }

        tracing::info!(%tenant_id, target = %target.id, duplicate = %duplicate.id, "✅ Participantes mesclados");
        Ok(target.id)
    }

    async fn canonical(&self, tenant_id: Uuid, id: Uuid) -> Result<Participant, AppError> {
        let record = self
            .store
            .find_by_id(tenant_id, id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("participante {id}")))?;

        if !record.is_merged() {
            return Ok(record);
        }
        self.store
            .find_by_id(tenant_id, record.canonical_id())
            .await?
            .ok_or_else(|| AppError::NotFound(format!("participante {}", record.canonical_id())))
    }
}

// --- Regras de atualização de campos ---

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

/// Campo de exibição: preenche se vazio; sobrescreve só com fonte de confiança ≥ à atual.
/// Valor observado vazio nunca apaga nada.
fn display_update(current: &Option<String>, observed: &Option<String>, may_overwrite: bool) -> Option<String> {
    let observed = non_empty(observed)?;
    match non_empty(current) {
        None => Some(observed.to_string()),
        Some(current) if may_overwrite && current != observed => Some(observed.to_string()),
        _ => None,
    }
}

fn fill_only(current: &Option<String>, observed: &Option<String>) -> Option<String> {
    match non_empty(current) {
        None => non_empty(observed).map(str::to_string),
        Some(_) => None,
    }
}

/// Calcula o patch aditivo a partir do que o evento observou.
pub fn merge_observed(current: &Participant, observed: &ObservedFields) -> ParticipantPatch {
    let current_source = FieldSource::parse(&current.source);
    let may_overwrite = observed.source >= current_source;

    let mut patch = ParticipantPatch {
        first_name: display_update(&current.first_name, &observed.first_name, may_overwrite),
        last_name: display_update(&current.last_name, &observed.last_name, may_overwrite),
        full_name: display_update(&current.full_name, &observed.full_name, may_overwrite),
        username: display_update(&current.username, &observed.username, may_overwrite),
        // Contato é editável pelo usuário: só preenche
        email: fill_only(&current.email, &observed.email),
        phone: fill_only(&current.phone, &observed.phone),
        source: None,
        attributes: None,
    };

    let missing: serde_json::Map<_, _> = observed
        .attributes
        .iter()
        .filter(|(key, _)| !current.attributes.0.contains_key(*key))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    if !missing.is_empty() {
        patch.attributes = Some(missing);
    }

    let display_changed = patch.first_name.is_some()
        || patch.last_name.is_some()
        || patch.full_name.is_some()
        || patch.username.is_some();
    if display_changed && observed.source > current_source {
        patch.source = Some(observed.source);
    }

    patch
}

fn fill_from_duplicate(target: &Participant, duplicate: &Participant) -> ParticipantPatch {
    let missing: serde_json::Map<_, _> = duplicate
        .attributes
        .0
        .iter()
        .filter(|(key, _)| !target.attributes.0.contains_key(*key))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    ParticipantPatch {
        first_name: fill_only(&target.first_name, &duplicate.first_name),
        last_name: fill_only(&target.last_name, &duplicate.last_name),
        full_name: fill_only(&target.full_name, &duplicate.full_name),
        username: fill_only(&target.username, &duplicate.username),
        email: fill_only(&target.email, &duplicate.email),
        phone: fill_only(&target.phone, &duplicate.phone),
        source: None,
        attributes: (!missing.is_empty()).then_some(missing),
    }
}
