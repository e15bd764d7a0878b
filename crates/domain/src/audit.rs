//! Audit event vocabulary.

use std::str::FromStr;

use clavis_core::{AppError, AppResult};
use serde::{Deserialize, Serialize};

/// Stable audit event types emitted by application use-cases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    /// Password verification succeeded.
    LoginPassword,
    /// Authentication attempt failed.
    LoginFailure,
    /// MFA challenge verified.
    MfaVerified,
    /// TOTP enrollment confirmed.
    MfaEnrolled,
    /// TOTP disabled for a user.
    MfaDisabled,
    /// Recovery codes regenerated.
    RecoveryCodesRegenerated,
    /// Access and refresh tokens issued.
    TokenIssued,
    /// Refresh token rotated.
    TokenRefreshed,
    /// Token revoked by its owner or an administrator.
    TokenRevoked,
    /// Password changed.
    PasswordChanged,
    /// User created.
    UserCreated,
    /// User updated.
    UserUpdated,
    /// User deleted.
    UserDeleted,
    /// User locked after repeated failures.
    UserLocked,
    /// Role created.
    RoleCreated,
    /// Role updated.
    RoleUpdated,
    /// Role deleted.
    RoleDeleted,
    /// Role assigned to a user.
    RoleAssigned,
    /// Role removed from a user.
    RoleUnassigned,
    /// Permission created.
    PermissionCreated,
    /// Permission deleted.
    PermissionDeleted,
    /// Tenant created.
    TenantCreated,
    /// Tenant updated.
    TenantUpdated,
    /// Tenant suspended.
    TenantSuspended,
    /// Tenant resumed.
    TenantResumed,
    /// Tenant soft-deleted.
    TenantDeleted,
    /// Tenant settings updated.
    TenantSettingsUpdated,
    /// Tenant entitled to (or stripped of) a capability.
    CapabilityEntitled,
    /// Tenant turned a feature on or off.
    FeatureToggled,
    /// Webhook subscription created.
    WebhookCreated,
    /// Webhook subscription deleted.
    WebhookDeleted,
    /// Webhook subscription disabled.
    WebhookDisabled,
    /// Webhook subscription re-enabled.
    WebhookEnabled,
    /// Impersonation session started.
    ImpersonationStarted,
    /// Impersonation session ended.
    ImpersonationEnded,
    /// First SYSTEM principal created.
    SystemBootstrapped,
}

impl AuditEventType {
    /// Returns a stable storage value for this event type.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LoginPassword => "login.password",
            Self::LoginFailure => "login.failure",
            Self::MfaVerified => "mfa.verified",
            Self::MfaEnrolled => "mfa.enrolled",
            Self::MfaDisabled => "mfa.disabled",
            Self::RecoveryCodesRegenerated => "mfa.recovery_codes.regenerated",
            Self::TokenIssued => "token.issued",
            Self::TokenRefreshed => "token.refreshed",
            Self::TokenRevoked => "token.revoked",
            Self::PasswordChanged => "password.changed",
            Self::UserCreated => "user.created",
            Self::UserUpdated => "user.updated",
            Self::UserDeleted => "user.deleted",
            Self::UserLocked => "user.locked",
            Self::RoleCreated => "role.created",
            Self::RoleUpdated => "role.updated",
            Self::RoleDeleted => "role.deleted",
            Self::RoleAssigned => "role.assigned",
            Self::RoleUnassigned => "role.unassigned",
            Self::PermissionCreated => "permission.created",
            Self::PermissionDeleted => "permission.deleted",
            Self::TenantCreated => "tenant.created",
            Self::TenantUpdated => "tenant.updated",
            Self::TenantSuspended => "tenant.suspended",
            Self::TenantResumed => "tenant.resumed",
            Self::TenantDeleted => "tenant.deleted",
            Self::TenantSettingsUpdated => "tenant.settings.updated",
            Self::CapabilityEntitled => "capability.entitled",
            Self::FeatureToggled => "feature.toggled",
            Self::WebhookCreated => "webhook.created",
            Self::WebhookDeleted => "webhook.deleted",
            Self::WebhookDisabled => "webhook.disabled",
            Self::WebhookEnabled => "webhook.enabled",
            Self::ImpersonationStarted => "impersonation.started",
            Self::ImpersonationEnded => "impersonation.ended",
            Self::SystemBootstrapped => "system.bootstrapped",
        }
    }

    /// Whether this event type records a destructive or sensitive action that
    /// must carry a caller-supplied audit reason.
    #[must_use]
    pub fn requires_reason(&self) -> bool {
        matches!(
            self,
            Self::UserDeleted
                | Self::TokenRevoked
                | Self::MfaDisabled
                | Self::WebhookDeleted
                | Self::ImpersonationStarted
                | Self::ImpersonationEnded
        )
    }
}

impl std::fmt::Display for AuditEventType {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.write_str(self.as_str())
    }
}

impl FromStr for AuditEventType {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        ALL_EVENT_TYPES
            .iter()
            .find(|event_type| event_type.as_str() == value)
            .copied()
            .ok_or_else(|| AppError::Validation(format!("unknown audit event type '{value}'")))
    }
}

const ALL_EVENT_TYPES: &[AuditEventType] = &[
    AuditEventType::LoginPassword,
    AuditEventType::LoginFailure,
    AuditEventType::MfaVerified,
    AuditEventType::MfaEnrolled,
    AuditEventType::MfaDisabled,
    AuditEventType::RecoveryCodesRegenerated,
    AuditEventType::TokenIssued,
    AuditEventType::TokenRefreshed,
    AuditEventType::TokenRevoked,
    AuditEventType::PasswordChanged,
    AuditEventType::UserCreated,
    AuditEventType::UserUpdated,
    AuditEventType::UserDeleted,
    AuditEventType::UserLocked,
    AuditEventType::RoleCreated,
    AuditEventType::RoleUpdated,
    AuditEventType::RoleDeleted,
    AuditEventType::RoleAssigned,
    AuditEventType::RoleUnassigned,
    AuditEventType::PermissionCreated,
    AuditEventType::PermissionDeleted,
    AuditEventType::TenantCreated,
    AuditEventType::TenantUpdated,
    AuditEventType::TenantSuspended,
    AuditEventType::TenantResumed,
    AuditEventType::TenantDeleted,
    AuditEventType::TenantSettingsUpdated,
    AuditEventType::CapabilityEntitled,
    AuditEventType::FeatureToggled,
    AuditEventType::WebhookCreated,
    AuditEventType::WebhookDeleted,
    AuditEventType::WebhookDisabled,
    AuditEventType::WebhookEnabled,
    AuditEventType::ImpersonationStarted,
    AuditEventType::ImpersonationEnded,
    AuditEventType::SystemBootstrapped,
];

/// Outcome recorded with every audit event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditResult {
    /// The guarded action committed.
    Success,
    /// The guarded action was denied or failed.
    Failure,
}

impl AuditResult {
    /// Returns the storage string.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
        }
    }

    /// Parses a storage string into a result.
    pub fn parse(value: &str) -> AppResult<Self> {
        match value {
            "success" => Ok(Self::Success),
            "failure" => Ok(Self::Failure),
            _ => Err(AppError::Validation(format!(
                "unknown audit result '{value}'"
            ))),
        }
    }
}
