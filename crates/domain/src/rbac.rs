//! Roles, permissions, and namespace rules.

use std::str::FromStr;

use clavis_core::{AppError, AppResult};
use serde::{Deserialize, Serialize};

/// Role that always owns every tenant permission; one assignment must exist
/// per tenant at all times.
pub const TENANT_OWNER_ROLE: &str = "tenant_owner";

/// Role assigned to the first SYSTEM principal at bootstrap.
pub const SYSTEM_OWNER_ROLE: &str = "system_owner";

/// Namespace prefixes a tenant may create permissions under.
pub const ALLOWED_TENANT_NAMESPACES: &[&str] = &["tenant.", "app.", "resource."];

/// Namespace prefixes reserved for the platform.
pub const RESERVED_NAMESPACES: &[&str] = &["system.", "platform."];

/// A permission expressed as `resource:action`.
///
/// No wildcard segment is ever honored; both segments are validated at
/// construction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PermissionKey {
    resource: String,
    action: String,
}

impl PermissionKey {
    /// Creates a validated permission key.
    pub fn new(resource: impl Into<String>, action: impl Into<String>) -> AppResult<Self> {
        let resource = resource.into().trim().to_lowercase();
        let action = action.into().trim().to_lowercase();

        validate_segment(&resource, "resource")?;
        validate_segment(&action, "action")?;

        Ok(Self { resource, action })
    }

    /// Returns the resource segment.
    #[must_use]
    pub fn resource(&self) -> &str {
        self.resource.as_str()
    }

    /// Returns the action segment.
    #[must_use]
    pub fn action(&self) -> &str {
        self.action.as_str()
    }

    /// Returns the stable storage value `resource:action`.
    #[must_use]
    pub fn as_string(&self) -> String {
        format!("{}:{}", self.resource, self.action)
    }
}

impl std::fmt::Display for PermissionKey {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(formatter, "{}:{}", self.resource, self.action)
    }
}

impl FromStr for PermissionKey {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let mut parts = value.splitn(2, ':');
        let resource = parts.next().unwrap_or_default();
        let action = parts.next().ok_or_else(|| {
            AppError::Validation(format!("permission '{value}' must be 'resource:action'"))
        })?;

        Self::new(resource, action)
    }
}

fn validate_segment(value: &str, label: &str) -> AppResult<()> {
    if value.is_empty() {
        return Err(AppError::Validation(format!(
            "permission {label} must not be empty"
        )));
    }

    if value.contains('*') {
        return Err(AppError::Validation(format!(
            "permission {label} must not contain wildcards"
        )));
    }

    let valid = value
        .chars()
        .all(|ch| ch.is_ascii_lowercase() || ch.is_ascii_digit() || matches!(ch, '.' | '_' | '-'));
    if !valid {
        return Err(AppError::Validation(format!(
            "permission {label} may only contain letters, digits, '.', '_' and '-'"
        )));
    }

    Ok(())
}

/// Checks that a tenant-created permission resource lives inside an allowed
/// namespace and outside the reserved ones.
pub fn validate_tenant_namespace(resource: &str) -> AppResult<()> {
    for reserved in RESERVED_NAMESPACES {
        if resource.starts_with(reserved) {
            return Err(AppError::ForbiddenNamespace(format!(
                "namespace '{reserved}' is reserved for the platform"
            )));
        }
    }

    let allowed = ALLOWED_TENANT_NAMESPACES
        .iter()
        .any(|prefix| resource.starts_with(prefix));
    if !allowed {
        return Err(AppError::ForbiddenNamespace(format!(
            "permission resource '{resource}' must start with one of: {}",
            ALLOWED_TENANT_NAMESPACES.join(", ")
        )));
    }

    Ok(())
}

/// Permissions enforced on the SYSTEM plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SystemPermission {
    /// Allows listing and reading tenants.
    TenantsRead,
    /// Allows creating, updating, suspending, and deleting tenants.
    TenantsManage,
    /// Allows reading and writing per-tenant settings.
    TenantSettingsManage,
    /// Allows entitling tenants to platform capabilities.
    CapabilitiesManage,
    /// Allows listing and reading SYSTEM users.
    SystemUsersRead,
    /// Allows creating and deleting SYSTEM users.
    SystemUsersManage,
    /// Allows starting tenant-scoped impersonation sessions.
    UsersImpersonate,
    /// Allows querying and exporting the platform audit log.
    AuditRead,
}

impl SystemPermission {
    /// Returns a stable storage value for this permission.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TenantsRead => "tenants:read",
            Self::TenantsManage => "tenants:manage",
            Self::TenantSettingsManage => "tenant_settings:manage",
            Self::CapabilitiesManage => "capabilities:manage",
            Self::SystemUsersRead => "system_users:read",
            Self::SystemUsersManage => "system_users:manage",
            Self::UsersImpersonate => "users:impersonate",
            Self::AuditRead => "audit:read",
        }
    }

    /// Returns all known system permissions.
    #[must_use]
    pub fn all() -> &'static [Self] {
        const ALL: &[SystemPermission] = &[
            SystemPermission::TenantsRead,
            SystemPermission::TenantsManage,
            SystemPermission::TenantSettingsManage,
            SystemPermission::CapabilitiesManage,
            SystemPermission::SystemUsersRead,
            SystemPermission::SystemUsersManage,
            SystemPermission::UsersImpersonate,
            SystemPermission::AuditRead,
        ];

        ALL
    }
}

impl FromStr for SystemPermission {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "tenants:read" => Ok(Self::TenantsRead),
            "tenants:manage" => Ok(Self::TenantsManage),
            "tenant_settings:manage" => Ok(Self::TenantSettingsManage),
            "capabilities:manage" => Ok(Self::CapabilitiesManage),
            "system_users:read" => Ok(Self::SystemUsersRead),
            "system_users:manage" => Ok(Self::SystemUsersManage),
            "users:impersonate" => Ok(Self::UsersImpersonate),
            "audit:read" => Ok(Self::AuditRead),
            _ => Err(AppError::Validation(format!(
                "unknown system permission '{value}'"
            ))),
        }
    }
}

/// Built-in tenant permissions seeded when a tenant is created.
///
/// Tuples are `(resource, action, description)`; every entry lives in the
/// `tenant.` namespace and is attached to `tenant_owner` at creation.
pub const DEFAULT_TENANT_PERMISSIONS: &[(&str, &str, &str)] = &[
    ("tenant.users", "read", "List and read tenant users"),
    ("tenant.users", "manage", "Create, update, and delete tenant users"),
    ("tenant.roles", "manage", "Manage tenant roles and assignments"),
    ("tenant.permissions", "manage", "Manage tenant permissions"),
    ("tenant.audit", "read", "Query and export the tenant audit log"),
    ("tenant.webhooks", "manage", "Manage webhook subscriptions"),
    ("tenant.features", "manage", "Enable and configure tenant features"),
    ("tenant.settings", "read", "Read tenant settings"),
];

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;

    #[test]
    fn permission_key_roundtrips_storage_value() {
        let key = PermissionKey::new("tenant.users", "manage");
        assert!(key.is_ok());
        let key = key.unwrap_or_else(|_| panic!("test"));
        let restored = PermissionKey::from_str(&key.as_string());
        assert_eq!(restored.ok(), Some(key));
    }

    #[test]
    fn wildcard_permission_is_rejected() {
        assert!(PermissionKey::new("tenant.*", "read").is_err());
        assert!(PermissionKey::new("tenant.users", "*").is_err());
    }

    #[test]
    fn reserved_namespace_is_rejected() {
        assert!(validate_tenant_namespace("system.foo").is_err());
        assert!(validate_tenant_namespace("platform.billing").is_err());
    }

    #[test]
    fn allowed_namespaces_are_accepted() {
        assert!(validate_tenant_namespace("tenant.users").is_ok());
        assert!(validate_tenant_namespace("app.billing").is_ok());
        assert!(validate_tenant_namespace("resource.invoice").is_ok());
    }

    #[test]
    fn out_of_namespace_resource_is_rejected() {
        let result = validate_tenant_namespace("billing.invoices");
        assert!(result.is_err());
    }

    #[test]
    fn system_permission_roundtrips_storage_value() {
        for permission in SystemPermission::all() {
            let restored = SystemPermission::from_str(permission.as_str());
            assert_eq!(restored.ok(), Some(*permission));
        }
    }

    #[test]
    fn default_tenant_permissions_live_in_allowed_namespaces() {
        for (resource, _, _) in DEFAULT_TENANT_PERMISSIONS {
            assert!(validate_tenant_namespace(resource).is_ok());
        }
    }
}
