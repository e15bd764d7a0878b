//! Tenant lifecycle and settings.
//!
//! Tenants are created by SYSTEM only. Suspension blocks all tenant-scoped
//! authentication; deletion is a soft status flip so audit events stay
//! resolvable forever. Settings TTLs are bounded by the system ceiling and
//! over-bound writes fail instead of clamping.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use clavis_core::{AppError, AppResult, NonEmptyString, TenantId};
use clavis_domain::{AuditEventType, AuditResult, TenantStatus, validate_tenant_domain};

use crate::audit_service::{AuditContext, AuditEvent, AuditService};
use crate::capability_service::CapabilityService;
use crate::rbac_service::RbacService;

// ---------------------------------------------------------------------------
// Ports
// ---------------------------------------------------------------------------

/// Tenant record returned by repository queries.
#[derive(Debug, Clone)]
pub struct TenantRecord {
    /// Tenant identifier.
    pub id: TenantId,
    /// Display name.
    pub name: String,
    /// Unique DNS-style domain.
    pub domain: String,
    /// Lifecycle status.
    pub status: TenantStatus,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last update timestamp.
    pub updated_at: DateTime<Utc>,
}

/// Parameters for creating a tenant.
#[derive(Debug, Clone)]
pub struct NewTenant {
    /// Display name.
    pub name: String,
    /// Validated domain; unique across the platform.
    pub domain: String,
}

/// Repository port for tenant persistence.
#[async_trait]
pub trait TenantRepository: Send + Sync {
    /// Creates a tenant. Returns the assigned id.
    async fn create(&self, tenant: NewTenant) -> AppResult<TenantId>;

    /// Finds a tenant by id.
    async fn find_by_id(&self, tenant_id: TenantId) -> AppResult<Option<TenantRecord>>;

    /// Finds a tenant by domain.
    async fn find_by_domain(&self, domain: &str) -> AppResult<Option<TenantRecord>>;

    /// Lists tenants, newest first.
    async fn list(&self, page: u32, page_size: u32) -> AppResult<Vec<TenantRecord>>;

    /// Updates the display name.
    async fn update_name(&self, tenant_id: TenantId, name: &str) -> AppResult<()>;

    /// Updates the lifecycle status.
    async fn set_status(&self, tenant_id: TenantId, status: TenantStatus) -> AppResult<()>;
}

/// Per-tenant token and policy settings. All TTLs are bounded by the system
/// `max_token_ttl` capability.
#[derive(Debug, Clone, PartialEq)]
pub struct TenantSettingsRecord {
    /// Owning tenant.
    pub tenant_id: TenantId,
    /// Access-token lifetime, minutes.
    pub access_token_ttl_minutes: i32,
    /// Refresh-token lifetime, days.
    pub refresh_token_ttl_days: i32,
    /// ID-token lifetime, minutes.
    pub id_token_ttl_minutes: i32,
    /// Whether extended "remember me" sessions are offered.
    pub remember_me_enabled: bool,
    /// Refresh-token lifetime for remembered sessions, days.
    pub remember_me_ttl_days: i32,
    /// Whether refresh tokens rotate on use.
    pub token_rotation_enabled: bool,
    /// Whether extended sessions require a verified-MFA chain.
    pub require_mfa_for_extended_sessions: bool,
    /// Tenant password-length floor, when stricter than the platform policy.
    pub password_min_length: Option<i32>,
    /// Per-principal request ceiling per minute.
    pub rate_limit_per_minute: i32,
}

impl TenantSettingsRecord {
    /// Returns the default settings for a tenant.
    #[must_use]
    pub fn defaults(tenant_id: TenantId) -> Self {
        Self {
            tenant_id,
            access_token_ttl_minutes: 15,
            refresh_token_ttl_days: 30,
            id_token_ttl_minutes: 15,
            remember_me_enabled: true,
            remember_me_ttl_days: 90,
            token_rotation_enabled: true,
            require_mfa_for_extended_sessions: false,
            password_min_length: None,
            rate_limit_per_minute: 120,
        }
    }
}

/// Repository port for tenant settings.
#[async_trait]
pub trait TenantSettingsRepository: Send + Sync {
    /// Returns the settings row for a tenant, if one exists.
    async fn get(&self, tenant_id: TenantId) -> AppResult<Option<TenantSettingsRecord>>;

    /// Inserts or replaces the settings row.
    async fn upsert(&self, settings: TenantSettingsRecord) -> AppResult<()>;
}

// ---------------------------------------------------------------------------
// Service
// ---------------------------------------------------------------------------

/// Application service for tenant lifecycle operations.
#[derive(Clone)]
pub struct TenantService {
    tenants: Arc<dyn TenantRepository>,
    settings: Arc<dyn TenantSettingsRepository>,
    rbac: RbacService,
    capabilities: CapabilityService,
    audit: AuditService,
}

impl TenantService {
    /// Creates a new tenant service.
    #[must_use]
    pub fn new(
        tenants: Arc<dyn TenantRepository>,
        settings: Arc<dyn TenantSettingsRepository>,
        rbac: RbacService,
        capabilities: CapabilityService,
        audit: AuditService,
    ) -> Self {
        Self {
            tenants,
            settings,
            rbac,
            capabilities,
            audit,
        }
    }

    /// Creates a tenant and seeds its built-in RBAC.
    pub async fn create_tenant(
        &self,
        context: &AuditContext,
        name: &str,
        domain: &str,
    ) -> AppResult<TenantRecord> {
        let name = NonEmptyString::new(name)?;
        let domain = validate_tenant_domain(domain)?;

        let tenant_id = self
            .tenants
            .create(NewTenant {
                name: name.as_str().to_owned(),
                domain,
            })
            .await?;

        self.rbac.seed_tenant(tenant_id).await?;

        self.audit
            .record(
                AuditEvent::new(AuditEventType::TenantCreated, AuditResult::Success, context)
                    .target("tenant", tenant_id),
            )
            .await?;

        self.tenants
            .find_by_id(tenant_id)
            .await?
            .ok_or_else(|| AppError::Internal("tenant vanished after creation".to_owned()))
    }

    /// Returns a tenant by id.
    pub async fn find_by_id(&self, tenant_id: TenantId) -> AppResult<Option<TenantRecord>> {
        self.tenants.find_by_id(tenant_id).await
    }

    /// Whether a tenant exists and is active.
    pub async fn is_active(&self, tenant_id: TenantId) -> AppResult<bool> {
        Ok(self
            .tenants
            .find_by_id(tenant_id)
            .await?
            .is_some_and(|tenant| tenant.status == TenantStatus::Active))
    }

    /// Lists tenants.
    pub async fn list(&self, page: u32, page_size: u32) -> AppResult<Vec<TenantRecord>> {
        self.tenants.list(page.max(1), page_size.clamp(1, 200)).await
    }

    /// Renames a tenant.
    pub async fn rename(
        &self,
        context: &AuditContext,
        tenant_id: TenantId,
        name: &str,
    ) -> AppResult<()> {
        let name = NonEmptyString::new(name)?;
        self.tenants.update_name(tenant_id, name.as_str()).await?;

        self.audit
            .record(
                AuditEvent::new(AuditEventType::TenantUpdated, AuditResult::Success, context)
                    .target("tenant", tenant_id),
            )
            .await?;

        Ok(())
    }

    /// Suspends a tenant, blocking all of its authentication.
    pub async fn suspend(&self, context: &AuditContext, tenant_id: TenantId) -> AppResult<()> {
        self.transition(context, tenant_id, TenantStatus::Suspended, AuditEventType::TenantSuspended)
            .await
    }

    /// Resumes a suspended tenant.
    pub async fn resume(&self, context: &AuditContext, tenant_id: TenantId) -> AppResult<()> {
        let tenant = self
            .tenants
            .find_by_id(tenant_id)
            .await?
            .ok_or_else(|| AppError::NotFound("tenant not found".to_owned()))?;

        if tenant.status == TenantStatus::Deleted {
            return Err(AppError::Conflict(
                "a deleted tenant cannot be resumed".to_owned(),
            ));
        }

        self.transition(context, tenant_id, TenantStatus::Active, AuditEventType::TenantResumed)
            .await
    }

    /// Soft-deletes a tenant. The row is kept forever so audit events remain
    /// resolvable.
    pub async fn delete(&self, context: &AuditContext, tenant_id: TenantId) -> AppResult<()> {
        self.transition(context, tenant_id, TenantStatus::Deleted, AuditEventType::TenantDeleted)
            .await
    }

    /// Returns a tenant's settings, falling back to defaults.
    pub async fn settings(&self, tenant_id: TenantId) -> AppResult<TenantSettingsRecord> {
        Ok(self
            .settings
            .get(tenant_id)
            .await?
            .unwrap_or_else(|| TenantSettingsRecord::defaults(tenant_id)))
    }

    /// Writes a tenant's settings after bound checks.
    ///
    /// Every TTL must stay within the system `max_token_ttl` ceiling; an
    /// over-bound value fails with `capability_bound_violation` rather than
    /// being silently clamped.
    pub async fn update_settings(
        &self,
        context: &AuditContext,
        settings: TenantSettingsRecord,
    ) -> AppResult<()> {
        let ceiling_minutes = self
            .capabilities
            .max_token_ttl_minutes(settings.tenant_id)
            .await?;

        let minutes_per_day: i64 = 24 * 60;
        let checks: [(&str, i64); 4] = [
            (
                "access_token_ttl_minutes",
                i64::from(settings.access_token_ttl_minutes),
            ),
            (
                "id_token_ttl_minutes",
                i64::from(settings.id_token_ttl_minutes),
            ),
            (
                "refresh_token_ttl_days",
                i64::from(settings.refresh_token_ttl_days) * minutes_per_day,
            ),
            (
                "remember_me_ttl_days",
                i64::from(settings.remember_me_ttl_days) * minutes_per_day,
            ),
        ];

        for (field, minutes) in checks {
            if minutes <= 0 {
                return Err(AppError::Validation(format!(
                    "{field} must be greater than zero"
                )));
            }
            if minutes > ceiling_minutes {
                return Err(AppError::CapabilityBoundViolation(format!(
                    "{field} exceeds the system token TTL ceiling"
                )));
            }
        }

        let tenant_id = settings.tenant_id;
        self.settings.upsert(settings).await?;

        self.audit
            .record(
                AuditEvent::new(
                    AuditEventType::TenantSettingsUpdated,
                    AuditResult::Success,
                    context,
                )
                .target("tenant", tenant_id),
            )
            .await?;

        Ok(())
    }

    async fn transition(
        &self,
        context: &AuditContext,
        tenant_id: TenantId,
        status: TenantStatus,
        event_type: AuditEventType,
    ) -> AppResult<()> {
        self.tenants
            .find_by_id(tenant_id)
            .await?
            .ok_or_else(|| AppError::NotFound("tenant not found".to_owned()))?;

        self.tenants.set_status(tenant_id, status).await?;

        self.audit
            .record(
                AuditEvent::new(event_type, AuditResult::Success, context)
                    .target("tenant", tenant_id),
            )
            .await?;

        Ok(())
    }
}
