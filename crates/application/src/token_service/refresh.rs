use chrono::Duration;

use clavis_core::AppError;
use clavis_domain::{AuditEventType, AuditResult};

use crate::audit_service::{AuditContext, AuditEvent};

use super::token_crypto::{generate_token, hash_token};
use super::*;

impl TokenService {
    /// Rotates a refresh token: single use, MFA bit preserved.
    ///
    /// Concurrent double-use of the same token produces at most one winning
    /// replacement; the loser fails with `token_refresh_failed` because the
    /// row is revoked inside the rotation transaction.
    pub async fn refresh(&self, context: &AuditContext, raw_token: &str) -> AppResult<TokenPair> {
        let now = Utc::now();
        let record = self
            .refresh_repository
            .find_by_hash(&hash_token(raw_token))
            .await?;

        let Some(record) = record else {
            self.record_refresh_failure(context, None, AppError::TokenRefreshFailed.code())
                .await;
            return Err(AppError::TokenRefreshFailed);
        };

        if record.revoked_at.is_some() || record.expires_at <= now {
            self.record_refresh_failure(
                context,
                Some(record.user_id),
                AppError::TokenRefreshFailed.code(),
            )
            .await;
            return Err(AppError::TokenRefreshFailed);
        }

        let user = self
            .user_repository
            .find_by_id(record.user_id)
            .await?
            .ok_or(AppError::TokenRefreshFailed)?;

        // MFA enforcement gate: a pre-MFA chain dies the moment the user has
        // MFA enabled. The client must complete a full login with MFA.
        if user.mfa_enabled && !record.mfa_verified {
            self.record_refresh_failure(context, Some(user.id), AppError::MfaRequired.code())
                .await;
            return Err(AppError::MfaRequired);
        }

        let (access_ttl_minutes, refresh_ttl_days) = self
            .session_lifetimes(&user, record.remember_me, record.mfa_verified)
            .await?;

        // Rotation can be turned off per tenant; the presented token then
        // stays valid and only a fresh access token is minted.
        let rotation_enabled = match record.tenant_id {
            Some(tenant_id) => self.tenant_settings(tenant_id).await?.token_rotation_enabled,
            None => true,
        };

        let (raw_replacement, replacement_id) = if rotation_enabled {
            let (raw_replacement, replacement_hash) = generate_token()?;
            let replacement_id = self
                .refresh_repository
                .rotate(
                    record.id,
                    NewRefreshToken {
                        user_id: record.user_id,
                        tenant_id: record.tenant_id,
                        token_hash: replacement_hash,
                        expires_at: now + Duration::days(refresh_ttl_days),
                        remember_me: record.remember_me,
                        mfa_verified: record.mfa_verified,
                        client_id: record.client_id.clone(),
                    },
                )
                .await?;

            let Some(replacement_id) = replacement_id else {
                self.record_refresh_failure(
                    context,
                    Some(user.id),
                    AppError::TokenRefreshFailed.code(),
                )
                .await;
                return Err(AppError::TokenRefreshFailed);
            };

            (raw_replacement, Some(replacement_id))
        } else {
            (raw_token.to_owned(), None)
        };

        let claims = self
            .build_claims(&user, record.mfa_verified, now, access_ttl_minutes)
            .await?;
        let access_token = self.signer.sign(&claims)?;

        let audited = self
            .audit
            .record(
                AuditEvent::new(
                    AuditEventType::TokenRefreshed,
                    AuditResult::Success,
                    context,
                )
                .target("user", user.id)
                .metadata(serde_json::json!({
                    "jti": claims.jti,
                    "mfa_verified": record.mfa_verified,
                })),
            )
            .await;

        if let Err(error) = audited {
            if let Some(replacement_id) = replacement_id {
                self.refresh_repository.revoke(replacement_id).await?;
            }
            return Err(error);
        }

        Ok(TokenPair {
            access_token,
            refresh_token: raw_replacement,
            expires_in: access_ttl_minutes * 60,
            mfa_verified: record.mfa_verified,
        })
    }

    async fn record_refresh_failure(
        &self,
        context: &AuditContext,
        user_id: Option<clavis_domain::UserId>,
        error_code: &'static str,
    ) {
        let mut event = AuditEvent::new(
            AuditEventType::TokenRefreshed,
            AuditResult::Failure,
            context,
        )
        .error_code(error_code);

        if let Some(user_id) = user_id {
            event = event.target("user", user_id);
        }

        // Failure audit is best-effort; the refresh is already rejected.
        let _ = self.audit.record(event).await;
    }
}
