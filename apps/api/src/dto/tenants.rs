use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use clavis_application::{TenantRecord, TenantSettingsRecord};
use clavis_core::TenantId;

/// POST /system/tenants request body.
///
/// The optional initial owner solves the first-user problem: tenant-plane
/// user creation needs a tenant principal, which a fresh tenant lacks.
#[derive(Debug, Deserialize)]
pub struct CreateTenantRequest {
    pub name: String,
    pub domain: String,
    pub owner: Option<TenantOwnerRequest>,
}

/// Initial `tenant_owner` user created with the tenant.
#[derive(Debug, Deserialize)]
pub struct TenantOwnerRequest {
    pub username: String,
    pub email: String,
    pub password: String,
}

/// PUT /system/tenants/{id} request body.
#[derive(Debug, Deserialize)]
pub struct UpdateTenantRequest {
    pub name: String,
}

/// Tenant representation.
#[derive(Debug, Serialize)]
pub struct TenantResponse {
    pub id: Uuid,
    pub name: String,
    pub domain: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<TenantRecord> for TenantResponse {
    fn from(tenant: TenantRecord) -> Self {
        Self {
            id: tenant.id.as_uuid(),
            name: tenant.name,
            domain: tenant.domain,
            status: tenant.status.as_str().to_owned(),
            created_at: tenant.created_at,
            updated_at: tenant.updated_at,
        }
    }
}

/// Tenant settings payload, used for both reads and writes.
#[derive(Debug, Serialize, Deserialize)]
pub struct TenantSettingsPayload {
    pub access_token_ttl_minutes: i32,
    pub refresh_token_ttl_days: i32,
    pub id_token_ttl_minutes: i32,
    pub remember_me_enabled: bool,
    pub remember_me_ttl_days: i32,
    pub token_rotation_enabled: bool,
    pub require_mfa_for_extended_sessions: bool,
    pub password_min_length: Option<i32>,
    pub rate_limit_per_minute: i32,
}

impl TenantSettingsPayload {
    pub fn into_record(self, tenant_id: TenantId) -> TenantSettingsRecord {
        TenantSettingsRecord {
            tenant_id,
            access_token_ttl_minutes: self.access_token_ttl_minutes,
            refresh_token_ttl_days: self.refresh_token_ttl_days,
            id_token_ttl_minutes: self.id_token_ttl_minutes,
            remember_me_enabled: self.remember_me_enabled,
            remember_me_ttl_days: self.remember_me_ttl_days,
            token_rotation_enabled: self.token_rotation_enabled,
            require_mfa_for_extended_sessions: self.require_mfa_for_extended_sessions,
            password_min_length: self.password_min_length,
            rate_limit_per_minute: self.rate_limit_per_minute,
        }
    }
}

impl From<TenantSettingsRecord> for TenantSettingsPayload {
    fn from(settings: TenantSettingsRecord) -> Self {
        Self {
            access_token_ttl_minutes: settings.access_token_ttl_minutes,
            refresh_token_ttl_days: settings.refresh_token_ttl_days,
            id_token_ttl_minutes: settings.id_token_ttl_minutes,
            remember_me_enabled: settings.remember_me_enabled,
            remember_me_ttl_days: settings.remember_me_ttl_days,
            token_rotation_enabled: settings.token_rotation_enabled,
            require_mfa_for_extended_sessions: settings.require_mfa_for_extended_sessions,
            password_min_length: settings.password_min_length,
            rate_limit_per_minute: settings.rate_limit_per_minute,
        }
    }
}
