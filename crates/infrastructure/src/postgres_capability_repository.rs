//! PostgreSQL-backed capability repository covering all four layers.

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use clavis_application::{
    CapabilityRepository, SystemCapabilityRecord, TenantCapabilityRecord, TenantFeatureRecord,
    UserCapabilityState,
};
use clavis_core::{AppError, AppResult, TenantId};
use clavis_domain::{CapabilityKey, UserId};

/// PostgreSQL implementation of the capability repository port.
#[derive(Clone)]
pub struct PostgresCapabilityRepository {
    pool: PgPool,
}

impl PostgresCapabilityRepository {
    /// Creates a repository with the provided connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct SystemCapabilityRow {
    key: String,
    enabled: bool,
    default_value: Option<serde_json::Value>,
    default_entitled: bool,
    description: String,
}

impl TryFrom<SystemCapabilityRow> for SystemCapabilityRecord {
    type Error = AppError;

    fn try_from(row: SystemCapabilityRow) -> Result<Self, Self::Error> {
        Ok(Self {
            key: CapabilityKey::from_str(&row.key)?,
            enabled: row.enabled,
            default_value: row.default_value,
            default_entitled: row.default_entitled,
            description: row.description,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct TenantCapabilityRow {
    tenant_id: uuid::Uuid,
    key: String,
    enabled: bool,
    value: Option<serde_json::Value>,
}

impl TryFrom<TenantCapabilityRow> for TenantCapabilityRecord {
    type Error = AppError;

    fn try_from(row: TenantCapabilityRow) -> Result<Self, Self::Error> {
        Ok(Self {
            tenant_id: TenantId::from_uuid(row.tenant_id),
            key: CapabilityKey::from_str(&row.key)?,
            enabled: row.enabled,
            value: row.value,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct TenantFeatureRow {
    tenant_id: uuid::Uuid,
    key: String,
    enabled: bool,
    configuration: Option<serde_json::Value>,
}

impl TryFrom<TenantFeatureRow> for TenantFeatureRecord {
    type Error = AppError;

    fn try_from(row: TenantFeatureRow) -> Result<Self, Self::Error> {
        Ok(Self {
            tenant_id: TenantId::from_uuid(row.tenant_id),
            key: CapabilityKey::from_str(&row.key)?,
            enabled: row.enabled,
            configuration: row.configuration,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct UserStateRow {
    user_id: uuid::Uuid,
    key: String,
    enrolled: bool,
    state_data: Option<serde_json::Value>,
    enrolled_at: Option<DateTime<Utc>>,
    last_used_at: Option<DateTime<Utc>>,
}

impl TryFrom<UserStateRow> for UserCapabilityState {
    type Error = AppError;

    fn try_from(row: UserStateRow) -> Result<Self, Self::Error> {
        Ok(Self {
            user_id: UserId::from_uuid(row.user_id),
            key: CapabilityKey::from_str(&row.key)?,
            enrolled: row.enrolled,
            state_data: row.state_data,
            enrolled_at: row.enrolled_at,
            last_used_at: row.last_used_at,
        })
    }
}

#[async_trait]
impl CapabilityRepository for PostgresCapabilityRepository {
    async fn system_capability(
        &self,
        key: CapabilityKey,
    ) -> AppResult<Option<SystemCapabilityRecord>> {
        let row = sqlx::query_as::<_, SystemCapabilityRow>(
            r#"
            SELECT key, enabled, default_value, default_entitled, description
            FROM system_capabilities
            WHERE key = $1
            LIMIT 1
            "#,
        )
        .bind(key.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|error| AppError::Internal(format!("failed to read system capability: {error}")))?;

        row.map(SystemCapabilityRecord::try_from).transpose()
    }

    async fn list_system_capabilities(&self) -> AppResult<Vec<SystemCapabilityRecord>> {
        let rows = sqlx::query_as::<_, SystemCapabilityRow>(
            r#"
            SELECT key, enabled, default_value, default_entitled, description
            FROM system_capabilities
            ORDER BY key
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|error| {
            AppError::Internal(format!("failed to list system capabilities: {error}"))
        })?;

        rows.into_iter()
            .map(SystemCapabilityRecord::try_from)
            .collect()
    }

    async fn tenant_capability(
        &self,
        tenant_id: TenantId,
        key: CapabilityKey,
    ) -> AppResult<Option<TenantCapabilityRecord>> {
        let row = sqlx::query_as::<_, TenantCapabilityRow>(
            r#"
            SELECT tenant_id, key, enabled, value
            FROM tenant_capabilities
            WHERE tenant_id = $1 AND key = $2
            LIMIT 1
            "#,
        )
        .bind(tenant_id.as_uuid())
        .bind(key.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|error| AppError::Internal(format!("failed to read tenant capability: {error}")))?;

        row.map(TenantCapabilityRecord::try_from).transpose()
    }

    async fn set_tenant_capability(&self, record: TenantCapabilityRecord) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO tenant_capabilities (tenant_id, key, enabled, value)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (tenant_id, key) DO UPDATE
            SET enabled = EXCLUDED.enabled, value = EXCLUDED.value, updated_at = now()
            "#,
        )
        .bind(record.tenant_id.as_uuid())
        .bind(record.key.as_str())
        .bind(record.enabled)
        .bind(record.value)
        .execute(&self.pool)
        .await
        .map_err(|error| {
            AppError::Internal(format!("failed to write tenant capability: {error}"))
        })?;

        Ok(())
    }

    async fn list_tenant_capabilities(
        &self,
        tenant_id: TenantId,
    ) -> AppResult<Vec<TenantCapabilityRecord>> {
        let rows = sqlx::query_as::<_, TenantCapabilityRow>(
            r#"
            SELECT tenant_id, key, enabled, value
            FROM tenant_capabilities
            WHERE tenant_id = $1
            ORDER BY key
            "#,
        )
        .bind(tenant_id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(|error| {
            AppError::Internal(format!("failed to list tenant capabilities: {error}"))
        })?;

        rows.into_iter()
            .map(TenantCapabilityRecord::try_from)
            .collect()
    }

    async fn tenant_feature(
        &self,
        tenant_id: TenantId,
        key: CapabilityKey,
    ) -> AppResult<Option<TenantFeatureRecord>> {
        let row = sqlx::query_as::<_, TenantFeatureRow>(
            r#"
            SELECT tenant_id, key, enabled, configuration
            FROM tenant_features
            WHERE tenant_id = $1 AND key = $2
            LIMIT 1
            "#,
        )
        .bind(tenant_id.as_uuid())
        .bind(key.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|error| AppError::Internal(format!("failed to read tenant feature: {error}")))?;

        row.map(TenantFeatureRecord::try_from).transpose()
    }

    async fn set_tenant_feature(&self, record: TenantFeatureRecord) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO tenant_features (tenant_id, key, enabled, configuration)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (tenant_id, key) DO UPDATE
            SET enabled = EXCLUDED.enabled, configuration = EXCLUDED.configuration,
                updated_at = now()
            "#,
        )
        .bind(record.tenant_id.as_uuid())
        .bind(record.key.as_str())
        .bind(record.enabled)
        .bind(record.configuration)
        .execute(&self.pool)
        .await
        .map_err(|error| AppError::Internal(format!("failed to write tenant feature: {error}")))?;

        Ok(())
    }

    async fn list_tenant_features(
        &self,
        tenant_id: TenantId,
    ) -> AppResult<Vec<TenantFeatureRecord>> {
        let rows = sqlx::query_as::<_, TenantFeatureRow>(
            r#"
            SELECT tenant_id, key, enabled, configuration
            FROM tenant_features
            WHERE tenant_id = $1
            ORDER BY key
            "#,
        )
        .bind(tenant_id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(|error| AppError::Internal(format!("failed to list tenant features: {error}")))?;

        rows.into_iter().map(TenantFeatureRecord::try_from).collect()
    }

    async fn user_state(
        &self,
        user_id: UserId,
        key: CapabilityKey,
    ) -> AppResult<Option<UserCapabilityState>> {
        let row = sqlx::query_as::<_, UserStateRow>(
            r#"
            SELECT user_id, key, enrolled, state_data, enrolled_at, last_used_at
            FROM user_capability_states
            WHERE user_id = $1 AND key = $2
            LIMIT 1
            "#,
        )
        .bind(user_id.as_uuid())
        .bind(key.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|error| AppError::Internal(format!("failed to read user state: {error}")))?;

        row.map(UserCapabilityState::try_from).transpose()
    }

    async fn set_user_state(&self, state: UserCapabilityState) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO user_capability_states
                (user_id, key, enrolled, state_data, enrolled_at, last_used_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (user_id, key) DO UPDATE
            SET enrolled = EXCLUDED.enrolled, state_data = EXCLUDED.state_data,
                enrolled_at = EXCLUDED.enrolled_at, last_used_at = EXCLUDED.last_used_at
            "#,
        )
        .bind(state.user_id.as_uuid())
        .bind(state.key.as_str())
        .bind(state.enrolled)
        .bind(state.state_data)
        .bind(state.enrolled_at)
        .bind(state.last_used_at)
        .execute(&self.pool)
        .await
        .map_err(|error| AppError::Internal(format!("failed to write user state: {error}")))?;

        Ok(())
    }
}
