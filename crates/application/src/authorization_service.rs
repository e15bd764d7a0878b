//! Authorization evaluator.
//!
//! Every protected operation passes through the same ordered checks: plane,
//! tenant isolation, then the specific required permission. Permissions come
//! from the claim set fixed at token issuance; no wildcard is ever honored.

use chrono::{DateTime, TimeZone, Utc};
use uuid::Uuid;

use clavis_core::{AppError, AppResult, TenantId};
use clavis_domain::{AMR_MFA, AccessTokenClaims, PermissionKey, PrincipalType, SystemPermission, UserId};

/// Identity of the SYSTEM user driving an impersonation session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImpersonationContext {
    /// The impersonating SYSTEM user.
    pub impersonator_id: UserId,
}

/// The authenticated subject of a request, decoded from a bearer token.
#[derive(Debug, Clone)]
pub struct Principal {
    /// Authenticated user.
    pub user_id: UserId,
    /// Plane of the principal.
    pub principal_type: PrincipalType,
    /// Tenant scope; `None` for SYSTEM sessions outside impersonation.
    pub tenant_id: Option<TenantId>,
    /// Tenant role names from the token.
    pub roles: Vec<String>,
    /// Effective tenant permissions from the token.
    pub permissions: Vec<String>,
    /// System role names from the token.
    pub system_roles: Vec<String>,
    /// Effective system permissions from the token.
    pub system_permissions: Vec<String>,
    /// Whether the session chain carries verified MFA.
    pub mfa_verified: bool,
    /// Token identifier, used for revocation.
    pub jti: Uuid,
    /// Token expiry.
    pub token_expires_at: DateTime<Utc>,
    /// Present when this is an impersonation session.
    pub impersonation: Option<ImpersonationContext>,
}

impl Principal {
    /// Builds a principal from a verified claim set.
    pub fn from_claims(claims: &AccessTokenClaims) -> AppResult<Self> {
        let impersonation = if claims.impersonation {
            let impersonator_id = claims.impersonator_id.ok_or_else(|| {
                AppError::Unauthorized("impersonation token without impersonator".to_owned())
            })?;
            Some(ImpersonationContext {
                impersonator_id: UserId::from_uuid(impersonator_id),
            })
        } else {
            None
        };

        let token_expires_at = Utc
            .timestamp_opt(claims.exp, 0)
            .single()
            .ok_or_else(|| AppError::Unauthorized("token carries an invalid expiry".to_owned()))?;

        Ok(Self {
            user_id: UserId::from_uuid(claims.sub),
            principal_type: claims.principal_type,
            tenant_id: claims.tenant_id.map(TenantId::from_uuid),
            roles: claims.roles.clone().unwrap_or_default(),
            permissions: claims.permissions.clone().unwrap_or_default(),
            system_roles: claims.system_roles.clone().unwrap_or_default(),
            system_permissions: claims.system_permissions.clone().unwrap_or_default(),
            mfa_verified: claims.amr.iter().any(|method| method == AMR_MFA),
            jti: claims.jti,
            token_expires_at,
            impersonation,
        })
    }
}

/// Stateless evaluator applying the ordered decision rules.
#[derive(Debug, Clone, Copy, Default)]
pub struct AuthorizationService;

impl AuthorizationService {
    /// Creates a new evaluator.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Admits a SYSTEM-plane operation.
    ///
    /// Impersonation sessions are tenant-scoped and never reach SYSTEM
    /// endpoints, even though the underlying user is a SYSTEM principal.
    pub fn require_system(
        &self,
        principal: &Principal,
        permission: SystemPermission,
    ) -> AppResult<()> {
        if principal.principal_type != PrincipalType::System || principal.impersonation.is_some() {
            return Err(AppError::ForbiddenPlane(
                "endpoint requires a SYSTEM principal".to_owned(),
            ));
        }

        if !principal
            .system_permissions
            .iter()
            .any(|granted| granted == permission.as_str())
        {
            return Err(AppError::ForbiddenPermission(format!(
                "missing system permission '{}'",
                permission.as_str()
            )));
        }

        Ok(())
    }

    /// Admits a tenant-plane operation against a target tenant.
    pub fn require_tenant(
        &self,
        principal: &Principal,
        tenant_id: TenantId,
        permission: &PermissionKey,
    ) -> AppResult<()> {
        self.require_tenant_context(principal, tenant_id)?;

        let key = permission.as_string();
        if !principal.permissions.iter().any(|granted| *granted == key) {
            return Err(AppError::ForbiddenPermission(format!(
                "missing permission '{key}'"
            )));
        }

        Ok(())
    }

    /// Applies the plane and tenant-isolation checks without a permission.
    ///
    /// Used for self-service endpoints where the resource is the principal's
    /// own account.
    pub fn require_tenant_context(
        &self,
        principal: &Principal,
        tenant_id: TenantId,
    ) -> AppResult<()> {
        match principal.principal_type {
            PrincipalType::Tenant | PrincipalType::Service => {}
            PrincipalType::System => {
                if principal.impersonation.is_none() {
                    return Err(AppError::ForbiddenTenant(
                        "SYSTEM principal has no tenant selected".to_owned(),
                    ));
                }
            }
        }

        if principal.tenant_id != Some(tenant_id) {
            return Err(AppError::ForbiddenTenant(format!(
                "request is scoped to tenant '{tenant_id}'"
            )));
        }

        Ok(())
    }

    /// Rejects tenant-plane principals on SYSTEM endpoints before any
    /// permission lookup.
    pub fn require_system_plane(&self, principal: &Principal) -> AppResult<()> {
        if principal.principal_type != PrincipalType::System || principal.impersonation.is_some() {
            return Err(AppError::ForbiddenPlane(
                "endpoint requires a SYSTEM principal".to_owned(),
            ));
        }

        Ok(())
    }
}
