//! PostgreSQL-backed tenant and tenant-settings repositories.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use clavis_application::{
    NewTenant, TenantRecord, TenantRepository, TenantSettingsRecord, TenantSettingsRepository,
};
use clavis_core::{AppError, AppResult, TenantId};
use clavis_domain::TenantStatus;

/// PostgreSQL implementation of the tenant repository port.
#[derive(Clone)]
pub struct PostgresTenantRepository {
    pool: PgPool,
}

impl PostgresTenantRepository {
    /// Creates a repository with the provided connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct TenantRow {
    id: uuid::Uuid,
    name: String,
    domain: String,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<TenantRow> for TenantRecord {
    type Error = AppError;

    fn try_from(row: TenantRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: TenantId::from_uuid(row.id),
            name: row.name,
            domain: row.domain,
            status: TenantStatus::parse(&row.status)?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[async_trait]
impl TenantRepository for PostgresTenantRepository {
    async fn create(&self, tenant: NewTenant) -> AppResult<TenantId> {
        let id = sqlx::query_scalar::<_, uuid::Uuid>(
            r#"
            INSERT INTO tenants (name, domain, status)
            VALUES ($1, $2, 'active')
            RETURNING id
            "#,
        )
        .bind(&tenant.name)
        .bind(&tenant.domain)
        .fetch_one(&self.pool)
        .await
        .map_err(|error| {
            if let sqlx::Error::Database(ref database_error) = error
                && database_error.code().as_deref() == Some("23505")
            {
                return AppError::Conflict("a tenant with this domain already exists".to_owned());
            }
            AppError::Internal(format!("failed to create tenant: {error}"))
        })?;

        Ok(TenantId::from_uuid(id))
    }

    async fn find_by_id(&self, tenant_id: TenantId) -> AppResult<Option<TenantRecord>> {
        let row = sqlx::query_as::<_, TenantRow>(
            r#"
            SELECT id, name, domain, status, created_at, updated_at
            FROM tenants
            WHERE id = $1
            LIMIT 1
            "#,
        )
        .bind(tenant_id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(|error| AppError::Internal(format!("failed to find tenant: {error}")))?;

        row.map(TenantRecord::try_from).transpose()
    }

    async fn find_by_domain(&self, domain: &str) -> AppResult<Option<TenantRecord>> {
        let row = sqlx::query_as::<_, TenantRow>(
            r#"
            SELECT id, name, domain, status, created_at, updated_at
            FROM tenants
            WHERE domain = LOWER($1)
            LIMIT 1
            "#,
        )
        .bind(domain)
        .fetch_optional(&self.pool)
        .await
        .map_err(|error| AppError::Internal(format!("failed to find tenant by domain: {error}")))?;

        row.map(TenantRecord::try_from).transpose()
    }

    async fn list(&self, page: u32, page_size: u32) -> AppResult<Vec<TenantRecord>> {
        let offset = i64::from(page.saturating_sub(1)) * i64::from(page_size);
        let rows = sqlx::query_as::<_, TenantRow>(
            r#"
            SELECT id, name, domain, status, created_at, updated_at
            FROM tenants
            ORDER BY created_at DESC
            LIMIT $1 OFFSET $2
            "#,
        )
        .bind(i64::from(page_size))
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(|error| AppError::Internal(format!("failed to list tenants: {error}")))?;

        rows.into_iter().map(TenantRecord::try_from).collect()
    }

    async fn update_name(&self, tenant_id: TenantId, name: &str) -> AppResult<()> {
        sqlx::query(
            r#"
            UPDATE tenants
            SET name = $2, updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(tenant_id.as_uuid())
        .bind(name)
        .execute(&self.pool)
        .await
        .map_err(|error| AppError::Internal(format!("failed to rename tenant: {error}")))?;

        Ok(())
    }

    async fn set_status(&self, tenant_id: TenantId, status: TenantStatus) -> AppResult<()> {
        sqlx::query(
            r#"
            UPDATE tenants
            SET status = $2, updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(tenant_id.as_uuid())
        .bind(status.as_str())
        .execute(&self.pool)
        .await
        .map_err(|error| AppError::Internal(format!("failed to update tenant status: {error}")))?;

        Ok(())
    }
}

/// PostgreSQL implementation of the tenant settings repository port.
#[derive(Clone)]
pub struct PostgresTenantSettingsRepository {
    pool: PgPool,
}

impl PostgresTenantSettingsRepository {
    /// Creates a repository with the provided connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct SettingsRow {
    tenant_id: uuid::Uuid,
    access_token_ttl_minutes: i32,
    refresh_token_ttl_days: i32,
    id_token_ttl_minutes: i32,
    remember_me_enabled: bool,
    remember_me_ttl_days: i32,
    token_rotation_enabled: bool,
    require_mfa_for_extended_sessions: bool,
    password_min_length: Option<i32>,
    rate_limit_per_minute: i32,
}

impl From<SettingsRow> for TenantSettingsRecord {
    fn from(row: SettingsRow) -> Self {
        Self {
            tenant_id: TenantId::from_uuid(row.tenant_id),
            access_token_ttl_minutes: row.access_token_ttl_minutes,
            refresh_token_ttl_days: row.refresh_token_ttl_days,
            id_token_ttl_minutes: row.id_token_ttl_minutes,
            remember_me_enabled: row.remember_me_enabled,
            remember_me_ttl_days: row.remember_me_ttl_days,
            token_rotation_enabled: row.token_rotation_enabled,
            require_mfa_for_extended_sessions: row.require_mfa_for_extended_sessions,
            password_min_length: row.password_min_length,
            rate_limit_per_minute: row.rate_limit_per_minute,
        }
    }
}

#[async_trait]
impl TenantSettingsRepository for PostgresTenantSettingsRepository {
    async fn get(&self, tenant_id: TenantId) -> AppResult<Option<TenantSettingsRecord>> {
        let row = sqlx::query_as::<_, SettingsRow>(
            r#"
            SELECT tenant_id, access_token_ttl_minutes, refresh_token_ttl_days,
                   id_token_ttl_minutes, remember_me_enabled, remember_me_ttl_days,
                   token_rotation_enabled, require_mfa_for_extended_sessions,
                   password_min_length, rate_limit_per_minute
            FROM tenant_settings
            WHERE tenant_id = $1
            LIMIT 1
            "#,
        )
        .bind(tenant_id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(|error| AppError::Internal(format!("failed to read tenant settings: {error}")))?;

        Ok(row.map(TenantSettingsRecord::from))
    }

    async fn upsert(&self, settings: TenantSettingsRecord) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO tenant_settings (
                tenant_id, access_token_ttl_minutes, refresh_token_ttl_days,
                id_token_ttl_minutes, remember_me_enabled, remember_me_ttl_days,
                token_rotation_enabled, require_mfa_for_extended_sessions,
                password_min_length, rate_limit_per_minute
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (tenant_id) DO UPDATE
            SET access_token_ttl_minutes = EXCLUDED.access_token_ttl_minutes,
                refresh_token_ttl_days = EXCLUDED.refresh_token_ttl_days,
                id_token_ttl_minutes = EXCLUDED.id_token_ttl_minutes,
                remember_me_enabled = EXCLUDED.remember_me_enabled,
                remember_me_ttl_days = EXCLUDED.remember_me_ttl_days,
                token_rotation_enabled = EXCLUDED.token_rotation_enabled,
                require_mfa_for_extended_sessions = EXCLUDED.require_mfa_for_extended_sessions,
                password_min_length = EXCLUDED.password_min_length,
                rate_limit_per_minute = EXCLUDED.rate_limit_per_minute,
                updated_at = now()
            "#,
        )
        .bind(settings.tenant_id.as_uuid())
        .bind(settings.access_token_ttl_minutes)
        .bind(settings.refresh_token_ttl_days)
        .bind(settings.id_token_ttl_minutes)
        .bind(settings.remember_me_enabled)
        .bind(settings.remember_me_ttl_days)
        .bind(settings.token_rotation_enabled)
        .bind(settings.require_mfa_for_extended_sessions)
        .bind(settings.password_min_length)
        .bind(settings.rate_limit_per_minute)
        .execute(&self.pool)
        .await
        .map_err(|error| AppError::Internal(format!("failed to write tenant settings: {error}")))?;

        Ok(())
    }
}
