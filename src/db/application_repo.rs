// src/db/application_repo.rs

use async_trait::async_trait;
use serde_json::{json, Value};
use sqlx::{types::Json, PgPool};
use uuid::Uuid;

use crate::{
    common::{db_utils::map_conflict, error::AppError},
    db::store::ApplicationStore,
    models::application::{
        Application, ApplicationEventKind, ApplicationForm, NewApplication, Pipeline, PipelineStage,
    },
};

const APPLICATION_COLUMNS: &str = r#"
    id, tenant_id, pipeline_id, form_id, stage_id, participant_id, tg_user_id, tg_chat_id,
    request_key, spam_score, spam_reasons, tg_user_data, form_data, notes, created_at, updated_at
"#;

#[derive(Clone)]
pub struct ApplicationRepository {
    pool: PgPool,
}

impl ApplicationRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ApplicationStore for ApplicationRepository {
    // =========================================================================
    //  CONFIGURAÇÃO (pipeline, formulário, estágios)
    // =========================================================================

    async fn find_pipeline_for_chat(
        &self,
        tenant_id: Uuid,
        tg_chat_id: i64,
        pipeline_type: &str,
    ) -> Result<Option<Pipeline>, AppError> {
        // Pipeline do próprio chat vence o padrão do tenant
        let pipeline = sqlx::query_as::<_, Pipeline>(
            r#"
            SELECT id, tenant_id, name, pipeline_type, tg_chat_id, is_default, is_active, created_at
            FROM application_pipelines
            WHERE tenant_id = $1 AND pipeline_type = $3 AND is_active = TRUE
              AND (tg_chat_id = $2 OR is_default = TRUE)
            ORDER BY (tg_chat_id = $2) DESC NULLS LAST, created_at ASC
            LIMIT 1
            "#,
        )
        .bind(tenant_id)
        .bind(tg_chat_id)
        .bind(pipeline_type)
        .fetch_optional(&self.pool)
        .await?;

        Ok(pipeline)
    }

    async fn find_active_form(&self, pipeline_id: Uuid) -> Result<Option<ApplicationForm>, AppError> {
        let form = sqlx::query_as::<_, ApplicationForm>(
            r#"
            SELECT id, pipeline_id, settings, is_active, created_at
            FROM application_forms
            WHERE pipeline_id = $1 AND is_active = TRUE
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(pipeline_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(form)
    }

    async fn list_stages(&self, pipeline_id: Uuid) -> Result<Vec<PipelineStage>, AppError> {
        let stages = sqlx::query_as::<_, PipelineStage>(
            r#"
            SELECT id, pipeline_id, name, slug, position, is_terminal, terminal_type, auto_actions
            FROM pipeline_stages
            WHERE pipeline_id = $1
            ORDER BY position ASC
            "#,
        )
        .bind(pipeline_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(stages)
    }

    // =========================================================================
    //  CANDIDATURAS
    // =========================================================================

    async fn create_application(&self, new: &NewApplication) -> Result<(Application, bool), AppError> {
        let mut tx = self.pool.begin().await?;

        let sql = format!(
            "INSERT INTO applications (
                tenant_id, pipeline_id, form_id, stage_id, participant_id, tg_user_id, tg_chat_id,
                request_key, spam_score, spam_reasons, tg_user_data
             )
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
             ON CONFLICT (tenant_id, pipeline_id, tg_user_id, request_key) DO NOTHING
             RETURNING {APPLICATION_COLUMNS}"
        );
        let inserted = sqlx::query_as::<_, Application>(&sql)
            .bind(new.tenant_id)
            .bind(new.pipeline_id)
            .bind(new.form_id)
            .bind(new.stage_id)
            .bind(new.participant_id)
            .bind(new.tg_user_id)
            .bind(new.tg_chat_id)
            .bind(&new.request_key)
            .bind(new.spam_score)
            .bind(&new.spam_reasons)
            .bind(Json(&new.tg_user_data))
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| map_conflict(e, format!("candidatura {}", new.request_key)))?;

        let Some(application) = inserted else {
            // Reentrega do mesmo pedido: devolve a candidatura existente
            let sql = format!(
                "SELECT {APPLICATION_COLUMNS} FROM applications
                 WHERE tenant_id = $1 AND pipeline_id = $2 AND tg_user_id = $3 AND request_key = $4"
            );
            let existing = sqlx::query_as::<_, Application>(&sql)
                .bind(new.tenant_id)
                .bind(new.pipeline_id)
                .bind(new.tg_user_id)
                .bind(&new.request_key)
                .fetch_one(&mut *tx)
                .await?;
            tx.commit().await?;
            return Ok((existing, false));
        };

        sqlx::query(
            r#"
            INSERT INTO application_events (application_id, event_type, actor_type, data)
            VALUES ($1, 'created', 'system', $2)
            "#,
        )
        .bind(application.id)
        .bind(Json(json!({
            "stage_id": new.stage_id,
            "spam_score": new.spam_score,
            "spam_reasons": new.spam_reasons,
        })))
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok((application, true))
    }

    async fn move_to_stage(&self, application_id: Uuid, stage_id: Uuid, notes: &str) -> Result<(), AppError> {
        let mut tx = self.pool.begin().await?;

        // Estágio atual relido sob o lock: duas movimentações concorrentes não reabrem uma candidatura encerrada
        let (from_stage, is_terminal) = sqlx::query_as::<_, (Uuid, bool)>(
            r#"
            SELECT a.stage_id, s.is_terminal
            FROM applications a
            JOIN pipeline_stages s ON s.id = a.stage_id
            WHERE a.id = $1
            FOR UPDATE OF a
            "#,
        )
        .bind(application_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("candidatura {application_id}")))?;

        if is_terminal {
            return Err(AppError::ApplicationClosed(application_id));
        }

        sqlx::query(
            r#"
            UPDATE applications
            SET stage_id = $2, notes = $3, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(application_id)
        .bind(stage_id)
        .bind(notes)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO application_events (application_id, event_type, actor_type, data)
            VALUES ($1, $2, 'system', $3)
            "#,
        )
        .bind(application_id)
        .bind(ApplicationEventKind::StageChanged.as_str())
        .bind(Json(json!({ "from": from_stage, "to": stage_id, "notes": notes })))
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn find_application(&self, application_id: Uuid) -> Result<Option<Application>, AppError> {
        let sql = format!("SELECT {APPLICATION_COLUMNS} FROM applications WHERE id = $1");
        let application = sqlx::query_as::<_, Application>(&sql)
            .bind(application_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(application)
    }

    async fn log_event(&self, application_id: Uuid, kind: ApplicationEventKind, data: Value) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO application_events (application_id, event_type, actor_type, data)
            VALUES ($1, $2, 'system', $3)
            "#,
        )
        .bind(application_id)
        .bind(kind.as_str())
        .bind(Json(data))
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
