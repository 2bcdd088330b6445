// src/db/participant_repo.rs

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{types::Json, PgPool};
use uuid::Uuid;

use crate::{
    common::{db_utils::map_conflict, error::AppError},
    db::store::ParticipantStore,
    models::participant::{NewParticipant, Participant, ParticipantPatch},
};

const PARTICIPANT_COLUMNS: &str = r#"
    id, tenant_id, tg_user_id, first_name, last_name, full_name, username,
    email, phone, source, merged_into, status, attributes,
    activity_score, engagement_category, last_activity_at, created_at, updated_at
"#;

#[derive(Clone)]
pub struct ParticipantRepository {
    pool: PgPool,
}

impl ParticipantRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ParticipantStore for ParticipantRepository {
    // =========================================================================
    //  LEITURA
    // =========================================================================

    async fn find_by_external_id(&self, tenant_id: Uuid, tg_user_id: i64) -> Result<Option<Participant>, AppError> {
        let sql = format!(
            "SELECT {PARTICIPANT_COLUMNS} FROM participants
             WHERE tenant_id = $1 AND tg_user_id = $2 AND merged_into IS NULL"
        );
        let participant = sqlx::query_as::<_, Participant>(&sql)
            .bind(tenant_id)
            .bind(tg_user_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(participant)
    }

    async fn find_merged_by_external_id(&self, tenant_id: Uuid, tg_user_id: i64) -> Result<Option<Participant>, AppError> {
        let sql = format!(
            "SELECT {PARTICIPANT_COLUMNS} FROM participants
             WHERE tenant_id = $1 AND tg_user_id = $2 AND merged_into IS NOT NULL
             ORDER BY updated_at DESC
             LIMIT 1"
        );
        let participant = sqlx::query_as::<_, Participant>(&sql)
            .bind(tenant_id)
            .bind(tg_user_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(participant)
    }

    async fn find_by_id(&self, tenant_id: Uuid, id: Uuid) -> Result<Option<Participant>, AppError> {
        let sql = format!("SELECT {PARTICIPANT_COLUMNS} FROM participants WHERE tenant_id = $1 AND id = $2");
        let participant = sqlx::query_as::<_, Participant>(&sql)
            .bind(tenant_id)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(participant)
    }

    async fn list_canonical(&self, tenant_id: Uuid) -> Result<Vec<Participant>, AppError> {
        let sql = format!(
            "SELECT {PARTICIPANT_COLUMNS} FROM participants
             WHERE tenant_id = $1 AND merged_into IS NULL
             ORDER BY created_at ASC"
        );
        let participants = sqlx::query_as::<_, Participant>(&sql)
            .bind(tenant_id)
            .fetch_all(&self.pool)
            .await?;

        Ok(participants)
    }

    // =========================================================================
    //  ESCRITA
    // =========================================================================

    async fn create(&self, new: &NewParticipant) -> Result<(Participant, bool), AppError> {
        let fields = &new.fields;

        // DO NOTHING + RETURNING: quem perde a corrida recebe zero linhas e relê o vencedor
        let sql = format!(
            "INSERT INTO participants (
                tenant_id, tg_user_id, first_name, last_name, full_name, username,
                email, phone, source, attributes
             )
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
             ON CONFLICT (tenant_id, tg_user_id) WHERE merged_into IS NULL AND tg_user_id IS NOT NULL
             DO NOTHING
             RETURNING {PARTICIPANT_COLUMNS}"
        );
        let inserted = sqlx::query_as::<_, Participant>(&sql)
            .bind(new.tenant_id)
            .bind(new.tg_user_id)
            .bind(fields.first_name.as_deref())
            .bind(fields.last_name.as_deref())
            .bind(fields.full_name.as_deref())
            .bind(fields.username.as_deref())
            .bind(fields.email.as_deref())
            .bind(fields.phone.as_deref())
            .bind(fields.source.as_str())
            .bind(Json(&fields.attributes))
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_conflict(e, format!("participante tg_user_id={}", new.tg_user_id)))?;

        if let Some(participant) = inserted {
            return Ok((participant, true));
        }

        match self.find_by_external_id(new.tenant_id, new.tg_user_id).await? {
            Some(existing) => Ok((existing, false)),
            None => Err(AppError::UniqueConstraintViolation(format!(
                "participante tg_user_id={}",
                new.tg_user_id
            ))),
        }
    }

    async fn apply_patch(&self, id: Uuid, patch: &ParticipantPatch) -> Result<(), AppError> {
        if patch.is_empty() {
            return Ok(());
        }

        // Atributos entram com `||` do JSONB: chaves novas sobrescrevem só as do patch
        sqlx::query(
            r#"
            UPDATE participants
            SET first_name = COALESCE($2, first_name),
                last_name = COALESCE($3, last_name),
                full_name = COALESCE($4, full_name),
                username = COALESCE($5, username),
                email = COALESCE($6, email),
                phone = COALESCE($7, phone),
                source = COALESCE($8, source),
                attributes = CASE WHEN $9::jsonb IS NULL THEN attributes ELSE attributes || $9::jsonb END,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(patch.first_name.as_deref())
        .bind(patch.last_name.as_deref())
        .bind(patch.full_name.as_deref())
        .bind(patch.username.as_deref())
        .bind(patch.email.as_deref())
        .bind(patch.phone.as_deref())
        .bind(patch.source.map(|s| s.as_str()))
        .bind(patch.attributes.as_ref().map(Json))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn mark_merged(&self, tenant_id: Uuid, duplicate_id: Uuid, target_id: Uuid) -> Result<(), AppError> {
        let mut tx = self.pool.begin().await?;

        // Quem já apontava para o duplicado passa a apontar para o alvo (profundidade ≤ 1)
        sqlx::query(
            r#"
            UPDATE participants
            SET merged_into = $3, updated_at = NOW()
            WHERE tenant_id = $1 AND merged_into = $2
            "#,
        )
        .bind(tenant_id)
        .bind(duplicate_id)
        .bind(target_id)
        .execute(&mut *tx)
        .await?;

        let result = sqlx::query(
            r#"
            UPDATE participants
            SET merged_into = $3, status = 'merged', updated_at = NOW()
            WHERE tenant_id = $1 AND id = $2
            "#,
        )
        .bind(tenant_id)
        .bind(duplicate_id)
        .bind(target_id)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("participante {duplicate_id}")));
        }

        // Participações do duplicado passam para o alvo; ativo vence inativo
        sqlx::query(
            r#"
            INSERT INTO group_memberships (participant_id, tg_chat_id, joined_at, left_at, is_active)
            SELECT $2, tg_chat_id, joined_at, left_at, is_active
            FROM group_memberships
            WHERE participant_id = $1
            ON CONFLICT (participant_id, tg_chat_id) DO UPDATE
            SET is_active = group_memberships.is_active OR EXCLUDED.is_active,
                left_at = CASE
                    WHEN group_memberships.is_active OR EXCLUDED.is_active THEN NULL
                    ELSE group_memberships.left_at
                END,
                joined_at = LEAST(group_memberships.joined_at, EXCLUDED.joined_at)
            "#,
        )
        .bind(duplicate_id)
        .bind(target_id)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            UPDATE group_memberships
            SET is_active = FALSE, left_at = NOW()
            WHERE participant_id = $1 AND is_active
            "#,
        )
        .bind(duplicate_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn touch_activity(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE participants
            SET last_activity_at = GREATEST(COALESCE(last_activity_at, $2), $2)
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn update_engagement(&self, id: Uuid, score: i32, category: &str) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE participants
            SET activity_score = $2, engagement_category = $3
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(score)
        .bind(category)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
