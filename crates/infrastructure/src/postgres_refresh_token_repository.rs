//! PostgreSQL-backed refresh token repository.
//!
//! Rotation runs inside one transaction with a row-level lock on the old
//! record, so concurrent double-use of the same refresh token produces at
//! most one winning replacement.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use clavis_application::{NewRefreshToken, RefreshTokenRecord, RefreshTokenRepository};
use clavis_core::{AppError, AppResult, TenantId};
use clavis_domain::UserId;

/// PostgreSQL implementation of the refresh token repository port.
#[derive(Clone)]
pub struct PostgresRefreshTokenRepository {
    pool: PgPool,
}

impl PostgresRefreshTokenRepository {
    /// Creates a repository with the provided connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct RefreshTokenRow {
    id: uuid::Uuid,
    user_id: uuid::Uuid,
    tenant_id: Option<uuid::Uuid>,
    token_hash: String,
    expires_at: DateTime<Utc>,
    revoked_at: Option<DateTime<Utc>>,
    remember_me: bool,
    mfa_verified: bool,
    client_id: Option<String>,
    created_at: DateTime<Utc>,
}

impl From<RefreshTokenRow> for RefreshTokenRecord {
    fn from(row: RefreshTokenRow) -> Self {
        Self {
            id: row.id,
            user_id: UserId::from_uuid(row.user_id),
            tenant_id: row.tenant_id.map(TenantId::from_uuid),
            token_hash: row.token_hash,
            expires_at: row.expires_at,
            revoked_at: row.revoked_at,
            remember_me: row.remember_me,
            mfa_verified: row.mfa_verified,
            client_id: row.client_id,
            created_at: row.created_at,
        }
    }
}

#[async_trait]
impl RefreshTokenRepository for PostgresRefreshTokenRepository {
    async fn insert(&self, token: NewRefreshToken) -> AppResult<uuid::Uuid> {
        sqlx::query_scalar::<_, uuid::Uuid>(
            r#"
            INSERT INTO refresh_tokens
                (user_id, tenant_id, token_hash, expires_at, remember_me, mfa_verified, client_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id
            "#,
        )
        .bind(token.user_id.as_uuid())
        .bind(token.tenant_id.map(|tenant_id| tenant_id.as_uuid()))
        .bind(&token.token_hash)
        .bind(token.expires_at)
        .bind(token.remember_me)
        .bind(token.mfa_verified)
        .bind(token.client_id.as_deref())
        .fetch_one(&self.pool)
        .await
        .map_err(|error| AppError::Internal(format!("failed to insert refresh token: {error}")))
    }

    async fn find_by_hash(&self, token_hash: &str) -> AppResult<Option<RefreshTokenRecord>> {
        let row = sqlx::query_as::<_, RefreshTokenRow>(
            r#"
            SELECT id, user_id, tenant_id, token_hash, expires_at, revoked_at,
                   remember_me, mfa_verified, client_id, created_at
            FROM refresh_tokens
            WHERE token_hash = $1
            LIMIT 1
            "#,
        )
        .bind(token_hash)
        .fetch_optional(&self.pool)
        .await
        .map_err(|error| {
            AppError::Internal(format!("failed to find refresh token: {error}"))
        })?;

        Ok(row.map(RefreshTokenRecord::from))
    }

    async fn rotate(
        &self,
        old_id: uuid::Uuid,
        replacement: NewRefreshToken,
    ) -> AppResult<Option<uuid::Uuid>> {
        let mut transaction = self.pool.begin().await.map_err(|error| {
            AppError::Internal(format!("failed to begin rotation transaction: {error}"))
        })?;

        // Lock the old row; the loser of a concurrent rotation sees
        // revoked_at already set and gets no replacement.
        let revoked = sqlx::query_scalar::<_, uuid::Uuid>(
            r#"
            UPDATE refresh_tokens
            SET revoked_at = now()
            WHERE id IN (
                SELECT id FROM refresh_tokens
                WHERE id = $1 AND revoked_at IS NULL AND expires_at > now()
                FOR UPDATE
            )
            RETURNING id
            "#,
        )
        .bind(old_id)
        .fetch_optional(&mut *transaction)
        .await
        .map_err(|error| AppError::Internal(format!("failed to revoke old token: {error}")))?;

        if revoked.is_none() {
            transaction.rollback().await.map_err(|error| {
                AppError::Internal(format!("failed to roll back rotation: {error}"))
            })?;
            return Ok(None);
        }

        let replacement_id = sqlx::query_scalar::<_, uuid::Uuid>(
            r#"
            INSERT INTO refresh_tokens
                (user_id, tenant_id, token_hash, expires_at, remember_me, mfa_verified, client_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id
            "#,
        )
        .bind(replacement.user_id.as_uuid())
        .bind(replacement.tenant_id.map(|tenant_id| tenant_id.as_uuid()))
        .bind(&replacement.token_hash)
        .bind(replacement.expires_at)
        .bind(replacement.remember_me)
        .bind(replacement.mfa_verified)
        .bind(replacement.client_id.as_deref())
        .fetch_one(&mut *transaction)
        .await
        .map_err(|error| {
            AppError::Internal(format!("failed to insert replacement token: {error}"))
        })?;

        transaction.commit().await.map_err(|error| {
            AppError::Internal(format!("failed to commit rotation: {error}"))
        })?;

        Ok(Some(replacement_id))
    }

    async fn revoke(&self, id: uuid::Uuid) -> AppResult<()> {
        sqlx::query(
            r#"
            UPDATE refresh_tokens
            SET revoked_at = now()
            WHERE id = $1 AND revoked_at IS NULL
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|error| AppError::Internal(format!("failed to revoke refresh token: {error}")))?;

        Ok(())
    }

    async fn revoke_all_for_user(&self, user_id: UserId) -> AppResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE refresh_tokens
            SET revoked_at = now()
            WHERE user_id = $1 AND revoked_at IS NULL
            "#,
        )
        .bind(user_id.as_uuid())
        .execute(&self.pool)
        .await
        .map_err(|error| {
            AppError::Internal(format!("failed to revoke tokens for user: {error}"))
        })?;

        Ok(result.rows_affected())
    }

    async fn delete_expired(&self, before: DateTime<Utc>) -> AppResult<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM refresh_tokens
            WHERE expires_at < $1
            "#,
        )
        .bind(before)
        .execute(&self.pool)
        .await
        .map_err(|error| {
            AppError::Internal(format!("failed to delete expired tokens: {error}"))
        })?;

        Ok(result.rows_affected())
    }
}
