//! Four-gate capability resolution.
//!
//! A capability is usable for `(tenant, user, key)` only when every layer
//! agrees: the platform supports it, SYSTEM has entitled the tenant, the
//! tenant has turned it on, and (where required) the user has enrolled.
//! Values narrow monotonically downward; a tenant layer can restrict below
//! the system bound, never above it.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use clavis_core::{AppError, AppResult, TenantId};
use clavis_domain::{
    AuditEventType, AuditResult, CapabilityKey, UserId, narrow_value, value_within_bounds,
};

use crate::audit_service::{AuditContext, AuditEvent, AuditService};

/// Ceiling applied when the `max_token_ttl` capability row is absent, minutes.
pub const FALLBACK_MAX_TOKEN_TTL_MINUTES: i64 = 259_200;

// ---------------------------------------------------------------------------
// Ports
// ---------------------------------------------------------------------------

/// Platform-level capability definition.
#[derive(Debug, Clone)]
pub struct SystemCapabilityRecord {
    /// Capability key.
    pub key: CapabilityKey,
    /// Whether the platform supports the capability at all.
    pub enabled: bool,
    /// Default value bound (TTL, grant list, flag).
    pub default_value: Option<Value>,
    /// Whether tenants without an explicit entitlement row are entitled.
    pub default_entitled: bool,
    /// Operator-facing description.
    pub description: String,
}

/// Per-tenant entitlement set by SYSTEM.
#[derive(Debug, Clone)]
pub struct TenantCapabilityRecord {
    /// Entitled tenant.
    pub tenant_id: TenantId,
    /// Capability key.
    pub key: CapabilityKey,
    /// Whether the tenant is permitted to use the capability.
    pub enabled: bool,
    /// Tenant-level value bound, narrowed from the system default.
    pub value: Option<Value>,
}

/// Tenant-side feature switch, bounded by the entitlement.
#[derive(Debug, Clone)]
pub struct TenantFeatureRecord {
    /// Owning tenant.
    pub tenant_id: TenantId,
    /// Capability key.
    pub key: CapabilityKey,
    /// Whether the tenant has turned the feature on.
    pub enabled: bool,
    /// Tenant configuration, narrowed from the entitlement value.
    pub configuration: Option<Value>,
}

/// Per-user enrollment state for capabilities that need it.
#[derive(Debug, Clone)]
pub struct UserCapabilityState {
    /// Enrolled user.
    pub user_id: UserId,
    /// Capability key.
    pub key: CapabilityKey,
    /// Whether the user has completed enrollment.
    pub enrolled: bool,
    /// Opaque enrollment data (for example a secret reference).
    pub state_data: Option<Value>,
    /// When enrollment completed.
    pub enrolled_at: Option<DateTime<Utc>>,
    /// When the capability was last exercised.
    pub last_used_at: Option<DateTime<Utc>>,
}

/// Repository port for the capability layers.
#[async_trait]
pub trait CapabilityRepository: Send + Sync {
    /// Returns the platform definition for a key.
    async fn system_capability(
        &self,
        key: CapabilityKey,
    ) -> AppResult<Option<SystemCapabilityRecord>>;

    /// Lists the platform capability catalog.
    async fn list_system_capabilities(&self) -> AppResult<Vec<SystemCapabilityRecord>>;

    /// Returns the entitlement row for a tenant and key.
    async fn tenant_capability(
        &self,
        tenant_id: TenantId,
        key: CapabilityKey,
    ) -> AppResult<Option<TenantCapabilityRecord>>;

    /// Writes the entitlement row for a tenant and key.
    async fn set_tenant_capability(&self, record: TenantCapabilityRecord) -> AppResult<()>;

    /// Lists the entitlement rows for a tenant.
    async fn list_tenant_capabilities(
        &self,
        tenant_id: TenantId,
    ) -> AppResult<Vec<TenantCapabilityRecord>>;

    /// Returns the feature row for a tenant and key.
    async fn tenant_feature(
        &self,
        tenant_id: TenantId,
        key: CapabilityKey,
    ) -> AppResult<Option<TenantFeatureRecord>>;

    /// Writes the feature row for a tenant and key.
    async fn set_tenant_feature(&self, record: TenantFeatureRecord) -> AppResult<()>;

    /// Lists the feature rows for a tenant.
    async fn list_tenant_features(
        &self,
        tenant_id: TenantId,
    ) -> AppResult<Vec<TenantFeatureRecord>>;

    /// Returns the enrollment state for a user and key.
    async fn user_state(
        &self,
        user_id: UserId,
        key: CapabilityKey,
    ) -> AppResult<Option<UserCapabilityState>>;

    /// Writes the enrollment state for a user and key.
    async fn set_user_state(&self, state: UserCapabilityState) -> AppResult<()>;
}

/// Outcome of a successful capability resolution.
#[derive(Debug, Clone)]
pub struct ResolvedCapability {
    /// Capability key.
    pub key: CapabilityKey,
    /// Effective value after narrowing through every layer.
    pub value: Option<Value>,
}

// ---------------------------------------------------------------------------
// Service
// ---------------------------------------------------------------------------

/// Application service for capability resolution and management.
#[derive(Clone)]
pub struct CapabilityService {
    repository: Arc<dyn CapabilityRepository>,
    audit: AuditService,
}

impl CapabilityService {
    /// Creates a new capability service.
    #[must_use]
    pub fn new(repository: Arc<dyn CapabilityRepository>, audit: AuditService) -> Self {
        Self { repository, audit }
    }

    /// Resolves the effective capability for `(tenant, user, key)`.
    ///
    /// The four gates run in order: system support, per-tenant entitlement,
    /// tenant enablement, and user enrollment for keys that need it.
    pub async fn resolve(
        &self,
        tenant_id: Option<TenantId>,
        user_id: Option<UserId>,
        key: CapabilityKey,
    ) -> AppResult<ResolvedCapability> {
        let system = self.supported(key).await?;
        let mut value = system.default_value.clone();

        if let Some(tenant_id) = tenant_id {
            let entitlement = self.entitlement(tenant_id, key, &system).await?;
            if let Some(system_value) = &system.default_value {
                value = Some(narrow_value(
                    system_value,
                    entitlement.as_ref().and_then(|row| row.value.as_ref()),
                )?);
            }

            let feature = self.repository.tenant_feature(tenant_id, key).await?;
            let feature_enabled = feature.as_ref().is_some_and(|row| row.enabled);
            if !feature_enabled {
                return Err(AppError::CapabilityNotSupported(format!(
                    "capability '{key}' is not enabled by tenant '{tenant_id}'"
                )));
            }

            if let Some(configuration) = feature.as_ref().and_then(|row| row.configuration.as_ref())
            {
                value = match value.take() {
                    Some(bound) => Some(narrow_value(&bound, Some(configuration))?),
                    // No bound from the upper layers: the configuration stands.
                    None => Some(configuration.clone()),
                };
            }
        }

        if key.requires_enrollment()
            && let Some(user_id) = user_id
        {
            let enrolled = self
                .repository
                .user_state(user_id, key)
                .await?
                .is_some_and(|state| state.enrolled);
            if !enrolled {
                return Err(AppError::EnrollmentRequired(format!(
                    "capability '{key}' requires enrollment"
                )));
            }
        }

        Ok(ResolvedCapability { key, value })
    }

    /// Whether gates 1–3 pass for a tenant, ignoring user enrollment.
    pub async fn is_available_for_tenant(
        &self,
        tenant_id: TenantId,
        key: CapabilityKey,
    ) -> AppResult<bool> {
        match self.resolve(Some(tenant_id), None, key).await {
            Ok(_) => Ok(true),
            Err(
                AppError::CapabilityNotSupported(_)
                | AppError::CapabilityBoundViolation(_)
                | AppError::EnrollmentRequired(_),
            ) => Ok(false),
            Err(error) => Err(error),
        }
    }

    /// Effective `max_token_ttl` ceiling for a tenant, minutes.
    ///
    /// Entitlement narrowing applies; an absent or disabled capability row
    /// falls back to the platform ceiling.
    pub async fn max_token_ttl_minutes(&self, tenant_id: TenantId) -> AppResult<i64> {
        let Some(system) = self
            .repository
            .system_capability(CapabilityKey::MaxTokenTtl)
            .await?
        else {
            return Ok(FALLBACK_MAX_TOKEN_TTL_MINUTES);
        };

        let mut value = system.default_value.clone();
        if let Some(row) = self
            .repository
            .tenant_capability(tenant_id, CapabilityKey::MaxTokenTtl)
            .await?
            && row.enabled
            && let (Some(bound), Some(tenant_value)) = (&system.default_value, &row.value)
        {
            value = Some(narrow_value(bound, Some(tenant_value))?);
        }

        Ok(value
            .as_ref()
            .and_then(Value::as_i64)
            .unwrap_or(FALLBACK_MAX_TOKEN_TTL_MINUTES))
    }

    /// Entitles a tenant to a capability. SYSTEM plane only.
    ///
    /// The tenant value must stay within the system bound; violations fail
    /// with `capability_bound_violation` rather than clamping.
    pub async fn entitle_tenant(
        &self,
        context: &AuditContext,
        tenant_id: TenantId,
        key: CapabilityKey,
        enabled: bool,
        value: Option<Value>,
    ) -> AppResult<()> {
        let system = self.supported(key).await?;

        if let (Some(bound), Some(candidate)) = (&system.default_value, &value)
            && !value_within_bounds(bound, candidate)
        {
            return Err(AppError::CapabilityBoundViolation(format!(
                "value for '{key}' exceeds the system bound"
            )));
        }

        self.repository
            .set_tenant_capability(TenantCapabilityRecord {
                tenant_id,
                key,
                enabled,
                value,
            })
            .await?;

        self.audit
            .record(
                AuditEvent::new(
                    AuditEventType::CapabilityEntitled,
                    AuditResult::Success,
                    context,
                )
                .target("tenant", tenant_id)
                .metadata(serde_json::json!({ "key": key.as_str(), "enabled": enabled })),
            )
            .await?;

        Ok(())
    }

    /// Turns a feature on or off for a tenant, bounded by its entitlement.
    pub async fn set_feature(
        &self,
        context: &AuditContext,
        tenant_id: TenantId,
        key: CapabilityKey,
        enabled: bool,
        configuration: Option<Value>,
    ) -> AppResult<()> {
        let system = self.supported(key).await?;
        let entitlement = self.entitlement(tenant_id, key, &system).await?;

        let bound = entitlement
            .as_ref()
            .and_then(|row| row.value.clone())
            .or_else(|| system.default_value.clone());
        if let (Some(bound), Some(candidate)) = (&bound, &configuration)
            && !value_within_bounds(bound, candidate)
        {
            return Err(AppError::CapabilityBoundViolation(format!(
                "configuration for '{key}' exceeds the tenant entitlement"
            )));
        }

        self.repository
            .set_tenant_feature(TenantFeatureRecord {
                tenant_id,
                key,
                enabled,
                configuration,
            })
            .await?;

        self.audit
            .record(
                AuditEvent::new(AuditEventType::FeatureToggled, AuditResult::Success, context)
                    .target("tenant", tenant_id)
                    .metadata(serde_json::json!({ "key": key.as_str(), "enabled": enabled })),
            )
            .await?;

        Ok(())
    }

    /// Lists the platform capability catalog.
    pub async fn list_system_capabilities(&self) -> AppResult<Vec<SystemCapabilityRecord>> {
        self.repository.list_system_capabilities().await
    }

    /// Lists a tenant's entitlement rows.
    pub async fn list_tenant_capabilities(
        &self,
        tenant_id: TenantId,
    ) -> AppResult<Vec<TenantCapabilityRecord>> {
        self.repository.list_tenant_capabilities(tenant_id).await
    }

    /// Lists a tenant's feature rows.
    pub async fn list_tenant_features(
        &self,
        tenant_id: TenantId,
    ) -> AppResult<Vec<TenantFeatureRecord>> {
        self.repository.list_tenant_features(tenant_id).await
    }

    /// Returns a reference to the repository for use by other services.
    #[must_use]
    pub fn repository(&self) -> &Arc<dyn CapabilityRepository> {
        &self.repository
    }

    async fn supported(&self, key: CapabilityKey) -> AppResult<SystemCapabilityRecord> {
        let record = self.repository.system_capability(key).await?;
        match record {
            Some(record) if record.enabled => Ok(record),
            _ => Err(AppError::CapabilityNotSupported(format!(
                "capability '{key}' is not supported by the platform"
            ))),
        }
    }

    async fn entitlement(
        &self,
        tenant_id: TenantId,
        key: CapabilityKey,
        system: &SystemCapabilityRecord,
    ) -> AppResult<Option<TenantCapabilityRecord>> {
        let row = self.repository.tenant_capability(tenant_id, key).await?;
        match row {
            Some(row) if row.enabled => Ok(Some(row)),
            Some(_) => Err(AppError::CapabilityNotSupported(format!(
                "tenant '{tenant_id}' is not entitled to capability '{key}'"
            ))),
            // A missing row defaults to the system default only when SYSTEM
            // explicitly permits by default.
            None if system.default_entitled => Ok(None),
            None => Err(AppError::CapabilityNotSupported(format!(
                "tenant '{tenant_id}' is not entitled to capability '{key}'"
            ))),
        }
    }
}

#[cfg(test)]
mod tests;
