//! Shared primitives for all Rust crates in Clavis.

#![forbid(unsafe_code)]

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Result type used across Clavis crates.
pub type AppResult<T> = Result<T, AppError>;

/// A validated non-empty UTF-8 string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NonEmptyString(String);

impl NonEmptyString {
    /// Creates a validated non-empty string.
    pub fn new(value: impl Into<String>) -> AppResult<Self> {
        let value = value.into();
        if value.trim().is_empty() {
            return Err(AppError::Validation(
                "value must not be empty or whitespace".to_owned(),
            ));
        }

        Ok(Self(value))
    }

    /// Returns the underlying string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl From<NonEmptyString> for String {
    fn from(value: NonEmptyString) -> Self {
        value.0
    }
}

/// Tenant identifier used as the partition key for every tenant-owned resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TenantId(Uuid);

impl TenantId {
    /// Creates a random tenant identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a tenant identifier from an existing UUID value.
    #[must_use]
    pub fn from_uuid(value: Uuid) -> Self {
        Self(value)
    }

    /// Returns the underlying UUID value.
    #[must_use]
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for TenantId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for TenantId {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        write!(formatter, "{}", self.0)
    }
}

/// Application error categories.
///
/// Each variant carries an operator-facing message; the stable wire code
/// returned to clients comes from [`AppError::code`] so that end-user
/// responses stay generic while audit logs keep the precise kind.
#[derive(Debug, Error)]
pub enum AppError {
    /// Invalid input or violated invariant.
    #[error("validation error: {0}")]
    Validation(String),

    /// Requested resource does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Write operation conflicts with existing state.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Wrong password or unknown principal. Never distinguishes which.
    #[error("authentication failed")]
    InvalidCredentials,

    /// Authentication or refresh cannot complete without MFA verification.
    #[error("multi-factor verification required")]
    MfaRequired,

    /// MFA code rejected: bad value, replay, or expired challenge.
    #[error("invalid verification code")]
    InvalidCode,

    /// Refresh record missing, revoked, or expired.
    #[error("token refresh failed")]
    TokenRefreshFailed,

    /// Presented access token is on the revocation blacklist.
    #[error("token has been revoked")]
    TokenRevoked,

    /// Principal's plane does not match the endpoint class.
    #[error("forbidden plane: {0}")]
    ForbiddenPlane(String),

    /// Target resource belongs to a different tenant.
    #[error("forbidden tenant: {0}")]
    ForbiddenTenant(String),

    /// Required permission is missing from the effective set.
    #[error("forbidden permission: {0}")]
    ForbiddenPermission(String),

    /// Permission resource falls outside the allowed namespaces.
    #[error("forbidden namespace: {0}")]
    ForbiddenNamespace(String),

    /// Capability is not supported by the platform.
    #[error("capability not supported: {0}")]
    CapabilityNotSupported(String),

    /// Tenant value exceeds the system bound for a capability.
    #[error("capability bound violation: {0}")]
    CapabilityBoundViolation(String),

    /// Capability requires per-user enrollment that has not happened.
    #[error("enrollment required: {0}")]
    EnrollmentRequired(String),

    /// Destructive action is missing its audit reason.
    #[error("audit reason is required for this action")]
    AuditReasonRequired,

    /// User is not authenticated.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Too many requests from this principal.
    #[error("rate limited: {message}")]
    RateLimited {
        /// Operator-facing detail.
        message: String,
        /// Seconds until the limiting window reopens.
        retry_after_seconds: i64,
    },

    /// Upstream dependency exceeded its deadline.
    #[error("upstream timeout: {0}")]
    UpstreamTimeout(String),

    /// Internal unexpected error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Returns the stable wire code for this error kind.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_error",
            Self::NotFound(_) => "not_found",
            Self::Conflict(_) => "conflict",
            Self::InvalidCredentials => "invalid_credentials",
            Self::MfaRequired => "mfa_required",
            Self::InvalidCode => "invalid_code",
            Self::TokenRefreshFailed => "token_refresh_failed",
            Self::TokenRevoked => "token_revoked",
            Self::ForbiddenPlane(_) => "forbidden_plane",
            Self::ForbiddenTenant(_) => "forbidden_tenant",
            Self::ForbiddenPermission(_) => "forbidden_permission",
            Self::ForbiddenNamespace(_) => "forbidden_namespace",
            Self::CapabilityNotSupported(_) => "capability_not_supported",
            Self::CapabilityBoundViolation(_) => "capability_bound_violation",
            Self::EnrollmentRequired(_) => "enrollment_required",
            Self::AuditReasonRequired => "audit_reason_required",
            Self::Unauthorized(_) => "unauthorized",
            Self::RateLimited { .. } => "rate_limited",
            Self::UpstreamTimeout(_) => "upstream_timeout",
            Self::Internal(_) => "upstream_error",
        }
    }

    /// Whether this kind is an authorization denial.
    #[must_use]
    pub fn is_forbidden(&self) -> bool {
        matches!(
            self,
            Self::ForbiddenPlane(_)
                | Self::ForbiddenTenant(_)
                | Self::ForbiddenPermission(_)
                | Self::ForbiddenNamespace(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::{AppError, NonEmptyString, TenantId};

    #[test]
    fn non_empty_string_rejects_whitespace() {
        let result = NonEmptyString::new("   ");
        assert!(result.is_err());
    }

    #[test]
    fn tenant_id_formats_as_uuid() {
        let tenant_id = TenantId::new();
        assert_eq!(tenant_id.to_string().len(), 36);
    }

    #[test]
    fn error_codes_are_stable() {
        assert_eq!(AppError::InvalidCredentials.code(), "invalid_credentials");
        assert_eq!(AppError::MfaRequired.code(), "mfa_required");
        assert_eq!(AppError::TokenRefreshFailed.code(), "token_refresh_failed");
        assert_eq!(
            AppError::ForbiddenPlane("system".to_owned()).code(),
            "forbidden_plane"
        );
        assert_eq!(AppError::AuditReasonRequired.code(), "audit_reason_required");
        assert_eq!(
            AppError::RateLimited {
                message: "slow down".to_owned(),
                retry_after_seconds: 300,
            }
            .code(),
            "rate_limited"
        );
    }

    #[test]
    fn forbidden_predicate_covers_all_authorization_kinds() {
        assert!(AppError::ForbiddenTenant("t".to_owned()).is_forbidden());
        assert!(AppError::ForbiddenNamespace("system.x".to_owned()).is_forbidden());
        assert!(!AppError::InvalidCredentials.is_forbidden());
    }
}
