//! Platform capability catalog and value-narrowing rules.

use std::str::FromStr;

use clavis_core::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A platform feature resolved through the four-layer capability engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityKey {
    /// Multi-factor authentication as a whole.
    Mfa,
    /// TOTP authenticator enrollment.
    Totp,
    /// SAML federation.
    Saml,
    /// OIDC federation.
    Oidc,
    /// Ceiling on token lifetimes, in minutes.
    MaxTokenTtl,
    /// OAuth2 grant types a tenant may use.
    AllowedGrantTypes,
    /// Whether PKCE is mandatory for authorization-code flows.
    PkceMandatory,
}

impl CapabilityKey {
    /// Returns the storage string for this capability.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mfa => "mfa",
            Self::Totp => "totp",
            Self::Saml => "saml",
            Self::Oidc => "oidc",
            Self::MaxTokenTtl => "max_token_ttl",
            Self::AllowedGrantTypes => "allowed_grant_types",
            Self::PkceMandatory => "pkce_mandatory",
        }
    }

    /// Returns all known capabilities.
    #[must_use]
    pub fn all() -> &'static [Self] {
        const ALL: &[CapabilityKey] = &[
            CapabilityKey::Mfa,
            CapabilityKey::Totp,
            CapabilityKey::Saml,
            CapabilityKey::Oidc,
            CapabilityKey::MaxTokenTtl,
            CapabilityKey::AllowedGrantTypes,
            CapabilityKey::PkceMandatory,
        ];

        ALL
    }

    /// Whether the capability needs per-user enrollment state before use.
    #[must_use]
    pub fn requires_enrollment(&self) -> bool {
        matches!(self, Self::Totp)
    }
}

impl std::fmt::Display for CapabilityKey {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.write_str(self.as_str())
    }
}

impl FromStr for CapabilityKey {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "mfa" => Ok(Self::Mfa),
            "totp" => Ok(Self::Totp),
            "saml" => Ok(Self::Saml),
            "oidc" => Ok(Self::Oidc),
            "max_token_ttl" => Ok(Self::MaxTokenTtl),
            "allowed_grant_types" => Ok(Self::AllowedGrantTypes),
            "pkce_mandatory" => Ok(Self::PkceMandatory),
            _ => Err(AppError::Validation(format!(
                "unknown capability key '{value}'"
            ))),
        }
    }
}

/// Checks that a tenant-level value stays within the system bound.
///
/// Numbers must not exceed the system value, arrays must be subsets, and
/// booleans may only relax `true` system values down to `false`.
#[must_use]
pub fn value_within_bounds(system: &Value, tenant: &Value) -> bool {
    match (system, tenant) {
        (Value::Number(system_number), Value::Number(tenant_number)) => {
            match (system_number.as_f64(), tenant_number.as_f64()) {
                (Some(system_value), Some(tenant_value)) => tenant_value <= system_value,
                _ => false,
            }
        }
        (Value::Array(system_items), Value::Array(tenant_items)) => tenant_items
            .iter()
            .all(|item| system_items.contains(item)),
        (Value::Bool(system_flag), Value::Bool(tenant_flag)) => *system_flag || !*tenant_flag,
        (Value::Null, _) => true,
        _ => false,
    }
}

/// Computes the monotonic narrowing of a system value by a tenant value.
///
/// The result is never wider than the system layer; a tenant value that
/// exceeds the bound is an error, not a clamp.
pub fn narrow_value(system: &Value, tenant: Option<&Value>) -> AppResult<Value> {
    let Some(tenant) = tenant else {
        return Ok(system.clone());
    };

    if !value_within_bounds(system, tenant) {
        return Err(AppError::CapabilityBoundViolation(format!(
            "tenant value {tenant} exceeds system bound {system}"
        )));
    }

    Ok(tenant.clone())
}
