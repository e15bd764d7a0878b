//! Redis read-through cache over the Postgres revocation authority.
//!
//! Revocations are written to the authority first, then cached with a TTL
//! equal to the token's remaining life. A cache miss falls through to the
//! authority, so a flushed cache never un-revokes a token.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::AsyncCommands;

use clavis_application::JtiBlacklist;
use clavis_core::{AppError, AppResult};

/// Redis-fronted blacklist with persistence-backed authority.
#[derive(Clone)]
pub struct RedisJtiBlacklist {
    client: redis::Client,
    key_prefix: String,
    authority: Arc<dyn JtiBlacklist>,
}

impl RedisJtiBlacklist {
    /// Creates a cache over the authoritative blacklist.
    #[must_use]
    pub fn new(
        client: redis::Client,
        key_prefix: impl Into<String>,
        authority: Arc<dyn JtiBlacklist>,
    ) -> Self {
        Self {
            client,
            key_prefix: key_prefix.into(),
            authority,
        }
    }

    fn key_for(&self, jti: uuid::Uuid) -> String {
        format!("{}:{jti}", self.key_prefix)
    }

    async fn connection(&self) -> AppResult<redis::aio::MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|error| AppError::Internal(format!("failed to connect to redis: {error}")))
    }

    async fn cache_revocation(
        &self,
        jti: uuid::Uuid,
        expires_at: DateTime<Utc>,
    ) -> AppResult<()> {
        let remaining = (expires_at - Utc::now()).num_seconds();
        if remaining <= 0 {
            return Ok(());
        }

        let mut connection = self.connection().await?;
        let ttl = u64::try_from(remaining)
            .map_err(|error| AppError::Internal(format!("invalid blacklist ttl: {error}")))?;

        let _: () = connection
            .set_ex(self.key_for(jti), 1u8, ttl)
            .await
            .map_err(|error| {
                AppError::Internal(format!("failed to cache jti revocation: {error}"))
            })?;

        Ok(())
    }
}

#[async_trait]
impl JtiBlacklist for RedisJtiBlacklist {
    async fn revoke(&self, jti: uuid::Uuid, expires_at: DateTime<Utc>) -> AppResult<()> {
        // The authority commits first; the cache is an accelerator only.
        self.authority.revoke(jti, expires_at).await?;

        if let Err(error) = self.cache_revocation(jti, expires_at).await {
            tracing::warn!(%jti, error = %error, "failed to cache jti revocation");
        }

        Ok(())
    }

    async fn is_revoked(&self, jti: uuid::Uuid) -> AppResult<bool> {
        match self.connection().await {
            Ok(mut connection) => {
                let cached: Result<Option<u8>, _> = connection.get(self.key_for(jti)).await;
                if let Ok(Some(_)) = cached {
                    return Ok(true);
                }
            }
            Err(error) => {
                tracing::warn!(error = %error, "jti cache unavailable; using authority");
            }
        }

        self.authority.is_revoked(jti).await
    }
}
