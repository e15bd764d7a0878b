//! Domain entities and invariants.

#![forbid(unsafe_code)]

mod audit;
mod capability;
mod principal;
mod rbac;
mod tenant;
mod token;

pub use audit::{AuditEventType, AuditResult};
pub use capability::{CapabilityKey, narrow_value, value_within_bounds};
pub use principal::{
    EmailAddress, PASSWORD_MAX_LENGTH, PASSWORD_MIN_LENGTH_WITH_MFA,
    PASSWORD_MIN_LENGTH_WITHOUT_MFA, PrincipalType, UserId, UserStatus, Username,
    check_plane_invariant, validate_password,
};
pub use rbac::{
    ALLOWED_TENANT_NAMESPACES, DEFAULT_TENANT_PERMISSIONS, PermissionKey, RESERVED_NAMESPACES,
    SYSTEM_OWNER_ROLE, SystemPermission, TENANT_OWNER_ROLE, validate_tenant_namespace,
};
pub use tenant::{TenantStatus, validate_tenant_domain};
pub use token::{AMR_MFA, AMR_PASSWORD, AccessTokenClaims, acr_claim, amr_claim};
