//! PostgreSQL-backed impersonation session repository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use clavis_application::{ImpersonationRepository, ImpersonationSessionRecord};
use clavis_core::{AppError, AppResult, TenantId};
use clavis_domain::UserId;

/// PostgreSQL implementation of the impersonation repository port.
#[derive(Clone)]
pub struct PostgresImpersonationRepository {
    pool: PgPool,
}

impl PostgresImpersonationRepository {
    /// Creates a repository with the provided connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct SessionRow {
    id: uuid::Uuid,
    impersonator_id: uuid::Uuid,
    target_user_id: uuid::Uuid,
    tenant_id: uuid::Uuid,
    token_jti: uuid::Uuid,
    started_at: DateTime<Utc>,
    ended_at: Option<DateTime<Utc>>,
    reason: String,
}

impl From<SessionRow> for ImpersonationSessionRecord {
    fn from(row: SessionRow) -> Self {
        Self {
            id: row.id,
            impersonator_id: UserId::from_uuid(row.impersonator_id),
            target_user_id: UserId::from_uuid(row.target_user_id),
            tenant_id: TenantId::from_uuid(row.tenant_id),
            token_jti: row.token_jti,
            started_at: row.started_at,
            ended_at: row.ended_at,
            reason: row.reason,
        }
    }
}

#[async_trait]
impl ImpersonationRepository for PostgresImpersonationRepository {
    async fn create(
        &self,
        impersonator_id: UserId,
        target_user_id: UserId,
        tenant_id: TenantId,
        token_jti: uuid::Uuid,
        reason: &str,
    ) -> AppResult<uuid::Uuid> {
        sqlx::query_scalar::<_, uuid::Uuid>(
            r#"
            INSERT INTO impersonation_sessions
                (impersonator_id, target_user_id, tenant_id, token_jti, reason)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id
            "#,
        )
        .bind(impersonator_id.as_uuid())
        .bind(target_user_id.as_uuid())
        .bind(tenant_id.as_uuid())
        .bind(token_jti)
        .bind(reason)
        .fetch_one(&self.pool)
        .await
        .map_err(|error| {
            AppError::Internal(format!("failed to create impersonation session: {error}"))
        })
    }

    async fn find_by_id(&self, id: uuid::Uuid) -> AppResult<Option<ImpersonationSessionRecord>> {
        let row = sqlx::query_as::<_, SessionRow>(
            r#"
            SELECT id, impersonator_id, target_user_id, tenant_id, token_jti,
                   started_at, ended_at, reason
            FROM impersonation_sessions
            WHERE id = $1
            LIMIT 1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|error| {
            AppError::Internal(format!("failed to find impersonation session: {error}"))
        })?;

        Ok(row.map(ImpersonationSessionRecord::from))
    }

    async fn end(&self, id: uuid::Uuid, ended_at: DateTime<Utc>) -> AppResult<()> {
        sqlx::query(
            r#"
            UPDATE impersonation_sessions
            SET ended_at = $2
            WHERE id = $1 AND ended_at IS NULL
            "#,
        )
        .bind(id)
        .bind(ended_at)
        .execute(&self.pool)
        .await
        .map_err(|error| {
            AppError::Internal(format!("failed to end impersonation session: {error}"))
        })?;

        Ok(())
    }
}
