//! PostgreSQL-backed rate limit repository using the `rate_limits` table.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use clavis_application::{RateLimitAttempt, RateLimitRepository};
use clavis_core::{AppError, AppResult};

/// PostgreSQL implementation of the rate limit repository port.
#[derive(Clone)]
pub struct PostgresRateLimitRepository {
    pool: PgPool,
}

impl PostgresRateLimitRepository {
    /// Creates a repository with the provided connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RateLimitRepository for PostgresRateLimitRepository {
    async fn record_attempt(
        &self,
        key: &str,
        window_seconds: i64,
    ) -> AppResult<RateLimitAttempt> {
        // UPSERT: insert a new row or increment the counter. An expired
        // window resets the counter and window start in the same statement.
        let attempt_count = sqlx::query_scalar::<_, i32>(
            r#"
            INSERT INTO rate_limits (key, window_started_at, attempt_count)
            VALUES ($1, now(), 1)
            ON CONFLICT (key) DO UPDATE
            SET
                attempt_count = CASE
                    WHEN rate_limits.window_started_at + make_interval(secs => $2::float8) < now()
                    THEN 1
                    ELSE rate_limits.attempt_count + 1
                END,
                window_started_at = CASE
                    WHEN rate_limits.window_started_at + make_interval(secs => $2::float8) < now()
                    THEN now()
                    ELSE rate_limits.window_started_at
                END
            RETURNING attempt_count
            "#,
        )
        .bind(key)
        .bind(window_seconds as f64)
        .fetch_one(&self.pool)
        .await
        .map_err(|error| {
            AppError::Internal(format!("failed to record rate limit attempt: {error}"))
        })?;

        Ok(RateLimitAttempt { attempt_count })
    }

    async fn cleanup_expired(&self, cutoff: DateTime<Utc>) -> AppResult<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM rate_limits
            WHERE window_started_at < $1
            "#,
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await
        .map_err(|error| {
            AppError::Internal(format!("failed to cleanup expired rate limits: {error}"))
        })?;

        Ok(result.rows_affected())
    }
}
