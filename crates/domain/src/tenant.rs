//! Tenant domain types.

use clavis_core::{AppError, AppResult};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a tenant.
///
/// Suspension blocks all tenant-scoped authentication; deletion is soft and
/// keeps the row forever so audit events stay resolvable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TenantStatus {
    /// Tenant is operational.
    Active,
    /// Tenant is administratively suspended.
    Suspended,
    /// Tenant is soft-deleted.
    Deleted,
}

impl TenantStatus {
    /// Returns the storage string.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Suspended => "suspended",
            Self::Deleted => "deleted",
        }
    }

    /// Parses a storage string into a status.
    pub fn parse(value: &str) -> AppResult<Self> {
        match value {
            "active" => Ok(Self::Active),
            "suspended" => Ok(Self::Suspended),
            "deleted" => Ok(Self::Deleted),
            _ => Err(AppError::Validation(format!(
                "unknown tenant status '{value}'"
            ))),
        }
    }
}

/// Validates a tenant domain name.
///
/// Lowercased; must contain at least one dot, no whitespace, and stay within
/// the DNS length limit.
pub fn validate_tenant_domain(value: &str) -> AppResult<String> {
    let trimmed = value.trim().to_lowercase();

    if trimmed.is_empty() {
        return Err(AppError::Validation(
            "tenant domain must not be empty".to_owned(),
        ));
    }

    if trimmed.len() > 253 {
        return Err(AppError::Validation(
            "tenant domain must not exceed 253 characters".to_owned(),
        ));
    }

    if !trimmed.contains('.') {
        return Err(AppError::Validation(
            "tenant domain must contain at least one '.'".to_owned(),
        ));
    }

    let valid = trimmed
        .chars()
        .all(|ch| ch.is_ascii_lowercase() || ch.is_ascii_digit() || matches!(ch, '.' | '-'));
    if !valid {
        return Err(AppError::Validation(
            "tenant domain may only contain letters, digits, '.' and '-'".to_owned(),
        ));
    }

    Ok(trimmed)
}
