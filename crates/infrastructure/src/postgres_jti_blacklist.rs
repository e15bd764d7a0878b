//! PostgreSQL authority for the revoked-`jti` blacklist.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use clavis_application::JtiBlacklist;
use clavis_core::{AppError, AppResult};

/// Persistence-backed authority for access-token revocations.
///
/// Usually fronted by [`crate::RedisJtiBlacklist`]; also usable alone when
/// no cache is configured.
#[derive(Clone)]
pub struct PostgresJtiBlacklist {
    pool: PgPool,
}

impl PostgresJtiBlacklist {
    /// Creates a blacklist with the provided connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Deletes entries whose token expiry has passed. Returns the count.
    pub async fn delete_expired(&self, before: DateTime<Utc>) -> AppResult<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM revoked_jtis
            WHERE expires_at < $1
            "#,
        )
        .bind(before)
        .execute(&self.pool)
        .await
        .map_err(|error| {
            AppError::Internal(format!("failed to prune revoked jtis: {error}"))
        })?;

        Ok(result.rows_affected())
    }
}

#[async_trait]
impl JtiBlacklist for PostgresJtiBlacklist {
    async fn revoke(&self, jti: uuid::Uuid, expires_at: DateTime<Utc>) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO revoked_jtis (jti, expires_at)
            VALUES ($1, $2)
            ON CONFLICT (jti) DO NOTHING
            "#,
        )
        .bind(jti)
        .bind(expires_at)
        .execute(&self.pool)
        .await
        .map_err(|error| AppError::Internal(format!("failed to revoke jti: {error}")))?;

        Ok(())
    }

    async fn is_revoked(&self, jti: uuid::Uuid) -> AppResult<bool> {
        sqlx::query_scalar::<_, bool>(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM revoked_jtis
                WHERE jti = $1 AND expires_at > now()
            )
            "#,
        )
        .bind(jti)
        .fetch_one(&self.pool)
        .await
        .map_err(|error| AppError::Internal(format!("failed to check jti: {error}")))
    }
}
