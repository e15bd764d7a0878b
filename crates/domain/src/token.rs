//! Access-token claim set.
//!
//! The claim payload is a fixed-shape record, not an open map; optional
//! fields stay absent from the wire when unset so the plane separation is
//! visible in the token itself.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::principal::PrincipalType;

/// Authentication method reference for password-only sessions.
pub const AMR_PASSWORD: &str = "pwd";

/// Authentication method reference appended after MFA verification.
pub const AMR_MFA: &str = "mfa";

/// Typed JWT claim set for access tokens.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessTokenClaims {
    /// Subject: the authenticated user id.
    pub sub: Uuid,
    /// Plane of the principal.
    pub principal_type: PrincipalType,
    /// Tenant of the principal; absent for SYSTEM.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<Uuid>,
    /// System role names; present only for SYSTEM principals.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_roles: Option<Vec<String>>,
    /// System permissions; present only for SYSTEM principals.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_permissions: Option<Vec<String>>,
    /// Tenant role names; present only for tenant-plane principals.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub roles: Option<Vec<String>>,
    /// Tenant permissions; present only for tenant-plane principals.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub permissions: Option<Vec<String>>,
    /// Authentication method references: `["pwd"]` or `["pwd", "mfa"]`.
    pub amr: Vec<String>,
    /// Authentication context class: `"pwd"` or `"mfa"`.
    pub acr: String,
    /// Issued-at, seconds since the epoch.
    pub iat: i64,
    /// Expiry, seconds since the epoch.
    pub exp: i64,
    /// Token identifier used by the revocation blacklist.
    pub jti: Uuid,
    /// Set when this token was minted by an impersonation session.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub impersonation: bool,
    /// The SYSTEM user driving the impersonation session, when applicable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub impersonator_id: Option<Uuid>,
}

/// Builds the `amr` claim for a session.
#[must_use]
pub fn amr_claim(mfa_verified: bool) -> Vec<String> {
    if mfa_verified {
        vec![AMR_PASSWORD.to_owned(), AMR_MFA.to_owned()]
    } else {
        vec![AMR_PASSWORD.to_owned()]
    }
}

/// Builds the `acr` claim for a session.
#[must_use]
pub fn acr_claim(mfa_verified: bool) -> String {
    if mfa_verified {
        AMR_MFA.to_owned()
    } else {
        AMR_PASSWORD.to_owned()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use uuid::Uuid;

    use super::*;

    fn sample_claims() -> AccessTokenClaims {
        AccessTokenClaims {
            sub: Uuid::new_v4(),
            principal_type: PrincipalType::Tenant,
            tenant_id: Some(Uuid::new_v4()),
            system_roles: None,
            system_permissions: None,
            roles: Some(vec!["tenant_owner".to_owned()]),
            permissions: Some(vec!["tenant.users:manage".to_owned()]),
            amr: amr_claim(true),
            acr: acr_claim(true),
            iat: 1_700_000_000,
            exp: 1_700_000_900,
            jti: Uuid::new_v4(),
            impersonation: false,
            impersonator_id: None,
        }
    }

    #[test]
    fn amr_reflects_mfa_presence() {
        assert_eq!(amr_claim(false), vec!["pwd".to_owned()]);
        assert_eq!(amr_claim(true), vec!["pwd".to_owned(), "mfa".to_owned()]);
        assert_eq!(acr_claim(false), "pwd");
        assert_eq!(acr_claim(true), "mfa");
    }

    #[test]
    fn absent_optionals_stay_off_the_wire() {
        let claims = sample_claims();
        let value = serde_json::to_value(&claims).unwrap_or_else(|_| json!({}));
        let object = value.as_object().unwrap_or_else(|| panic!("test"));

        assert!(!object.contains_key("system_roles"));
        assert!(!object.contains_key("system_permissions"));
        assert!(!object.contains_key("impersonation"));
        assert!(!object.contains_key("impersonator_id"));
        assert_eq!(object.get("principal_type"), Some(&json!("TENANT")));
    }

    #[test]
    fn claims_roundtrip_through_json() {
        let claims = sample_claims();
        let encoded = serde_json::to_string(&claims).unwrap_or_default();
        let decoded: Result<AccessTokenClaims, _> = serde_json::from_str(&encoded);
        assert_eq!(decoded.ok(), Some(claims));
    }
}
