use chrono::Duration;

use clavis_core::AppError;
use clavis_domain::{
    AccessTokenClaims, AuditEventType, AuditResult, PrincipalType, acr_claim, amr_claim,
};

use crate::audit_service::{AuditContext, AuditEvent};
use crate::tenant_service::TenantSettingsRecord;
use crate::user_service::UserRecord;

use super::token_crypto::generate_token;
use super::*;

impl TokenService {
    /// Issues an access/refresh token pair after authentication.
    ///
    /// Issuance is fail-closed: the refresh record is inserted first, the
    /// audit event is written second, and an audit failure revokes the fresh
    /// record so no usable token survives an unaudited issuance.
    pub async fn issue_for_user(
        &self,
        context: &AuditContext,
        user: &UserRecord,
        mfa_verified: bool,
        remember_me: bool,
        client_id: Option<String>,
    ) -> AppResult<TokenPair> {
        let (access_ttl_minutes, refresh_ttl_days) = self
            .session_lifetimes(user, remember_me, mfa_verified)
            .await?;

        let now = Utc::now();
        let claims = self
            .build_claims(user, mfa_verified, now, access_ttl_minutes)
            .await?;
        let access_token = self.signer.sign(&claims)?;

        let (raw_refresh, refresh_hash) = generate_token()?;
        let record_id = self
            .refresh_repository
            .insert(NewRefreshToken {
                user_id: user.id,
                tenant_id: user.tenant_id,
                token_hash: refresh_hash,
                expires_at: now + Duration::days(refresh_ttl_days),
                remember_me,
                mfa_verified,
                client_id,
            })
            .await?;

        let audited = self
            .audit
            .record(
                AuditEvent::new(AuditEventType::TokenIssued, AuditResult::Success, context)
                    .target("user", user.id)
                    .metadata(serde_json::json!({
                        "jti": claims.jti,
                        "mfa_verified": mfa_verified,
                        "remember_me": remember_me,
                    })),
            )
            .await;

        if let Err(error) = audited {
            self.refresh_repository.revoke(record_id).await?;
            return Err(error);
        }

        Ok(TokenPair {
            access_token,
            refresh_token: raw_refresh,
            expires_in: access_ttl_minutes * 60,
            mfa_verified,
        })
    }

    /// Issues a short-lived impersonation access token.
    ///
    /// The token acts as the target user inside the target tenant while
    /// carrying the impersonator's identity; no refresh token is issued.
    pub async fn issue_impersonation_token(
        &self,
        target: &UserRecord,
        tenant_id: TenantId,
        impersonator_id: UserId,
    ) -> AppResult<(String, Uuid, DateTime<Utc>)> {
        let now = Utc::now();
        let expires_at = now + Duration::minutes(IMPERSONATION_ACCESS_TTL_MINUTES);

        let mut claims = self
            .build_claims(target, true, now, IMPERSONATION_ACCESS_TTL_MINUTES)
            .await?;
        claims.principal_type = PrincipalType::System;
        claims.tenant_id = Some(tenant_id.as_uuid());
        claims.impersonation = true;
        claims.impersonator_id = Some(impersonator_id.as_uuid());

        let token = self.signer.sign(&claims)?;
        Ok((token, claims.jti, expires_at))
    }

    pub(super) async fn session_lifetimes(
        &self,
        user: &UserRecord,
        remember_me: bool,
        mfa_verified: bool,
    ) -> AppResult<(i64, i64)> {
        let Some(tenant_id) = user.tenant_id else {
            return Ok((DEFAULT_ACCESS_TTL_MINUTES, SYSTEM_REFRESH_TTL_DAYS));
        };

        let settings = self.tenant_settings(tenant_id).await?;

        // Extended sessions may be gated on a verified-MFA chain; a pwd-only
        // session then falls back to the standard lifetime.
        let extended_allowed = settings.remember_me_enabled
            && (!settings.require_mfa_for_extended_sessions || mfa_verified);
        let refresh_days = if remember_me && extended_allowed {
            settings.remember_me_ttl_days
        } else {
            settings.refresh_token_ttl_days
        };

        Ok((
            i64::from(settings.access_token_ttl_minutes),
            i64::from(refresh_days),
        ))
    }

    pub(super) async fn tenant_settings(
        &self,
        tenant_id: TenantId,
    ) -> AppResult<TenantSettingsRecord> {
        Ok(self
            .settings
            .get(tenant_id)
            .await?
            .unwrap_or_else(|| TenantSettingsRecord::defaults(tenant_id)))
    }

    pub(super) async fn build_claims(
        &self,
        user: &UserRecord,
        mfa_verified: bool,
        now: DateTime<Utc>,
        ttl_minutes: i64,
    ) -> AppResult<AccessTokenClaims> {
        let (system_roles, system_permissions, roles, permissions) = match user.principal_type {
            PrincipalType::System => {
                if user.tenant_id.is_some() {
                    return Err(AppError::Internal(
                        "SYSTEM principal with a tenant link".to_owned(),
                    ));
                }
                let role_names = self.rbac.system_role_names_for_user(user.id).await?;
                let permission_keys = self.rbac.system_permission_keys_for_user(user.id).await?;
                (Some(role_names), Some(permission_keys), None, None)
            }
            PrincipalType::Tenant | PrincipalType::Service => {
                let role_names = self.rbac.role_names_for_user(user.id).await?;
                let permission_keys = self.rbac.permission_keys_for_user(user.id).await?;
                (None, None, Some(role_names), Some(permission_keys))
            }
        };

        Ok(AccessTokenClaims {
            sub: user.id.as_uuid(),
            principal_type: user.principal_type,
            tenant_id: user.tenant_id.map(|tenant_id| tenant_id.as_uuid()),
            system_roles,
            system_permissions,
            roles,
            permissions,
            amr: amr_claim(mfa_verified),
            acr: acr_claim(mfa_verified),
            iat: now.timestamp(),
            exp: (now + Duration::minutes(ttl_minutes)).timestamp(),
            jti: Uuid::new_v4(),
            impersonation: false,
            impersonator_id: None,
        })
    }
}
