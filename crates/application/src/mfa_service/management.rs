use clavis_core::AppError;
use clavis_domain::{AuditEventType, AuditResult, CapabilityKey, UserId};

use crate::audit_service::{AuditContext, AuditEvent};
use crate::capability_service::UserCapabilityState;

use super::recovery_codes::{generate_recovery_codes, hash_recovery_codes};
use super::*;

impl MfaService {
    /// Disables TOTP for a user. Requires password re-authentication.
    pub async fn disable_totp(
        &self,
        context: &AuditContext,
        user_id: UserId,
        password: &str,
    ) -> AppResult<()> {
        self.require_password(user_id, password).await?;

        self.user_repository.clear_totp(user_id).await?;
        self.capabilities
            .set_user_state(UserCapabilityState {
                user_id,
                key: CapabilityKey::Totp,
                enrolled: false,
                state_data: None,
                enrolled_at: None,
                last_used_at: None,
            })
            .await?;

        self.audit
            .record(
                AuditEvent::new(AuditEventType::MfaDisabled, AuditResult::Success, context)
                    .target("user", user_id)
                    .reason(Some("password re-authentication".to_owned())),
            )
            .await?;

        Ok(())
    }

    /// Resets a user's MFA enrollment on their behalf.
    ///
    /// Administrator path: destructive, requires an audit reason. The user
    /// falls back to password-only login until they re-enroll.
    pub async fn reset_totp(
        &self,
        context: &AuditContext,
        user_id: UserId,
        reason: Option<String>,
    ) -> AppResult<()> {
        if reason.as_deref().is_none_or(|value| value.trim().is_empty()) {
            return Err(AppError::AuditReasonRequired);
        }

        self.user_repository
            .find_by_id(user_id)
            .await?
            .ok_or_else(|| AppError::NotFound("user not found".to_owned()))?;

        self.user_repository.clear_totp(user_id).await?;
        self.capabilities
            .set_user_state(UserCapabilityState {
                user_id,
                key: CapabilityKey::Totp,
                enrolled: false,
                state_data: None,
                enrolled_at: None,
                last_used_at: None,
            })
            .await?;

        self.audit
            .record(
                AuditEvent::new(AuditEventType::MfaDisabled, AuditResult::Success, context)
                    .target("user", user_id)
                    .reason(reason)
                    .metadata(serde_json::json!({ "admin_reset": true })),
            )
            .await?;

        Ok(())
    }

    /// Replaces the user's recovery codes. Requires password
    /// re-authentication; the new codes are returned exactly once.
    pub async fn regenerate_recovery_codes(
        &self,
        context: &AuditContext,
        user_id: UserId,
        password: &str,
    ) -> AppResult<Vec<String>> {
        let user = self.require_password(user_id, password).await?;

        if !user.totp_confirmed {
            return Err(AppError::Validation(
                "no authenticator is enrolled for this account".to_owned(),
            ));
        }

        let codes = generate_recovery_codes();
        let hashed = hash_recovery_codes(&codes);
        self.user_repository
            .update_recovery_codes(user_id, &hashed)
            .await?;

        self.audit
            .record(
                AuditEvent::new(
                    AuditEventType::RecoveryCodesRegenerated,
                    AuditResult::Success,
                    context,
                )
                .target("user", user_id),
            )
            .await?;

        Ok(codes)
    }

    /// Returns the number of unused recovery codes.
    pub async fn remaining_recovery_codes(&self, user_id: UserId) -> AppResult<usize> {
        let user = self
            .user_repository
            .find_by_id(user_id)
            .await?
            .ok_or_else(|| AppError::NotFound("user not found".to_owned()))?;

        Ok(user.recovery_code_hashes.len())
    }

    async fn require_password(
        &self,
        user_id: UserId,
        password: &str,
    ) -> AppResult<crate::user_service::UserRecord> {
        let user = self
            .user_repository
            .find_by_id(user_id)
            .await?
            .ok_or_else(|| AppError::NotFound("user not found".to_owned()))?;

        let Some(ref stored_hash) = user.password_hash else {
            return Err(AppError::InvalidCredentials);
        };

        let valid = self.password_hasher.verify_password(password, stored_hash)?;
        if !valid {
            return Err(AppError::InvalidCredentials);
        }

        Ok(user)
    }
}
