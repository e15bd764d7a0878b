//! PostgreSQL-backed MFA challenge repository.
//!
//! Consumption marks `consumed_at` in the same statement that selects the
//! row, so a challenge can never be verified twice.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use clavis_application::{ChallengeRecord, ChallengeRepository};
use clavis_core::{AppError, AppResult};
use clavis_domain::UserId;

/// PostgreSQL implementation of the challenge repository port.
#[derive(Clone)]
pub struct PostgresChallengeRepository {
    pool: PgPool,
}

impl PostgresChallengeRepository {
    /// Creates a repository with the provided connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct ChallengeRow {
    id: uuid::Uuid,
    user_id: uuid::Uuid,
    remember_me: bool,
    expires_at: DateTime<Utc>,
    consumed_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl From<ChallengeRow> for ChallengeRecord {
    fn from(row: ChallengeRow) -> Self {
        Self {
            id: row.id,
            user_id: UserId::from_uuid(row.user_id),
            remember_me: row.remember_me,
            expires_at: row.expires_at,
            consumed_at: row.consumed_at,
            created_at: row.created_at,
        }
    }
}

#[async_trait]
impl ChallengeRepository for PostgresChallengeRepository {
    async fn create(
        &self,
        user_id: UserId,
        remember_me: bool,
        expires_at: DateTime<Utc>,
    ) -> AppResult<uuid::Uuid> {
        sqlx::query_scalar::<_, uuid::Uuid>(
            r#"
            INSERT INTO mfa_challenges (user_id, remember_me, expires_at)
            VALUES ($1, $2, $3)
            RETURNING id
            "#,
        )
        .bind(user_id.as_uuid())
        .bind(remember_me)
        .bind(expires_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|error| AppError::Internal(format!("failed to create MFA challenge: {error}")))
    }

    async fn consume_valid(&self, challenge_id: uuid::Uuid) -> AppResult<Option<ChallengeRecord>> {
        let row = sqlx::query_as::<_, ChallengeRow>(
            r#"
            UPDATE mfa_challenges
            SET consumed_at = now()
            WHERE id = $1 AND consumed_at IS NULL AND expires_at > now()
            RETURNING id, user_id, remember_me, expires_at, consumed_at, created_at
            "#,
        )
        .bind(challenge_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|error| AppError::Internal(format!("failed to consume MFA challenge: {error}")))?;

        Ok(row.map(ChallengeRecord::from))
    }

    async fn delete_expired(&self, before: DateTime<Utc>) -> AppResult<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM mfa_challenges
            WHERE expires_at < $1
            "#,
        )
        .bind(before)
        .execute(&self.pool)
        .await
        .map_err(|error| {
            AppError::Internal(format!("failed to delete expired challenges: {error}"))
        })?;

        Ok(result.rows_affected())
    }
}
