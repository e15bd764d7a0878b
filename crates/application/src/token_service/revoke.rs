use clavis_core::AppError;
use clavis_domain::{AuditEventType, AuditResult};

use crate::audit_service::{AuditContext, AuditEvent};

use super::token_crypto::hash_token;
use super::*;

impl TokenService {
    /// Revokes an access token by blacklisting its `jti` until expiry.
    ///
    /// Destructive: requires an audit reason.
    pub async fn revoke_access(
        &self,
        context: &AuditContext,
        jti: Uuid,
        expires_at: DateTime<Utc>,
        reason: Option<String>,
    ) -> AppResult<()> {
        if reason.as_deref().is_none_or(|value| value.trim().is_empty()) {
            return Err(AppError::AuditReasonRequired);
        }

        self.blacklist.revoke(jti, expires_at).await?;

        self.audit
            .record(
                AuditEvent::new(AuditEventType::TokenRevoked, AuditResult::Success, context)
                    .target("jti", jti)
                    .reason(reason),
            )
            .await?;

        Ok(())
    }

    /// Revokes the presenting session: the refresh token and, when supplied,
    /// the access token's `jti`.
    pub async fn logout(
        &self,
        context: &AuditContext,
        raw_refresh_token: &str,
        access_jti: Option<(Uuid, DateTime<Utc>)>,
    ) -> AppResult<()> {
        let record = self
            .refresh_repository
            .find_by_hash(&hash_token(raw_refresh_token))
            .await?;

        if let Some(record) = record {
            self.refresh_repository.revoke(record.id).await?;
        }

        if let Some((jti, expires_at)) = access_jti {
            self.blacklist.revoke(jti, expires_at).await?;
        }

        self.audit
            .record(
                AuditEvent::new(AuditEventType::TokenRevoked, AuditResult::Success, context)
                    .reason(Some("user logout".to_owned())),
            )
            .await?;

        Ok(())
    }

    /// Revokes every refresh token for a user. Administrator path; requires
    /// an audit reason.
    pub async fn revoke_all_for_user(
        &self,
        context: &AuditContext,
        user_id: clavis_domain::UserId,
        reason: Option<String>,
    ) -> AppResult<u64> {
        if reason.as_deref().is_none_or(|value| value.trim().is_empty()) {
            return Err(AppError::AuditReasonRequired);
        }

        let revoked = self.refresh_repository.revoke_all_for_user(user_id).await?;

        self.audit
            .record(
                AuditEvent::new(AuditEventType::TokenRevoked, AuditResult::Success, context)
                    .target("user", user_id)
                    .reason(reason)
                    .metadata(serde_json::json!({ "revoked_count": revoked })),
            )
            .await?;

        Ok(revoked)
    }
}
