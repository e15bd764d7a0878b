//! Redis-backed rate limit repository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::Script;

use clavis_application::{RateLimitAttempt, RateLimitRepository};
use clavis_core::{AppError, AppResult};

const RECORD_ATTEMPT_SCRIPT: &str = r#"
local key = KEYS[1]
local window = tonumber(ARGV[1])

local count = redis.call('INCR', key)
local ttl = redis.call('TTL', key)

if ttl < 0 then
  redis.call('EXPIRE', key, window)
end

return count
"#;

/// Redis implementation of the rate limit repository port.
#[derive(Clone)]
pub struct RedisRateLimitRepository {
    client: redis::Client,
    key_prefix: String,
}

impl RedisRateLimitRepository {
    /// Creates a repository with a configured Redis client and key prefix.
    #[must_use]
    pub fn new(client: redis::Client, key_prefix: impl Into<String>) -> Self {
        Self {
            client,
            key_prefix: key_prefix.into(),
        }
    }

    fn key_for(&self, key: &str) -> String {
        format!("{}:{key}", self.key_prefix)
    }
}

#[async_trait]
impl RateLimitRepository for RedisRateLimitRepository {
    async fn record_attempt(
        &self,
        key: &str,
        window_seconds: i64,
    ) -> AppResult<RateLimitAttempt> {
        if window_seconds <= 0 {
            return Err(AppError::Validation(
                "window_seconds must be greater than zero".to_owned(),
            ));
        }

        let redis_key = self.key_for(key);
        let window = i32::try_from(window_seconds).map_err(|error| {
            AppError::Validation(format!("invalid rate limit window duration: {error}"))
        })?;

        let mut connection = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|error| AppError::Internal(format!("failed to connect to redis: {error}")))?;

        let script = Script::new(RECORD_ATTEMPT_SCRIPT);
        let attempt_count: i64 = script
            .key(redis_key)
            .arg(window)
            .invoke_async(&mut connection)
            .await
            .map_err(|error| {
                AppError::Internal(format!(
                    "failed to record redis rate limit attempt: {error}"
                ))
            })?;

        let attempt_count = i32::try_from(attempt_count)
            .map_err(|error| AppError::Internal(format!("invalid redis attempt count: {error}")))?;

        Ok(RateLimitAttempt { attempt_count })
    }

    async fn cleanup_expired(&self, _cutoff: DateTime<Utc>) -> AppResult<u64> {
        // Redis rate limit keys expire automatically via TTL.
        Ok(0)
    }
}
