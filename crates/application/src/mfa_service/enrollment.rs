use chrono::Utc;

use clavis_core::AppError;
use clavis_domain::{AuditEventType, AuditResult, CapabilityKey, UserId};

use crate::audit_service::{AuditContext, AuditEvent};
use crate::capability_service::UserCapabilityState;

use super::recovery_codes::{generate_recovery_codes, hash_recovery_codes};
use super::*;

impl MfaService {
    /// Starts TOTP enrollment for a user.
    ///
    /// The secret and recovery codes are returned exactly once. MFA stays off
    /// until `confirm_enrollment` validates a code from the authenticator.
    pub async fn start_enrollment(&self, user_id: UserId) -> AppResult<TotpEnrollment> {
        let user = self
            .user_repository
            .find_by_id(user_id)
            .await?
            .ok_or_else(|| AppError::NotFound("user not found".to_owned()))?;

        if user.totp_confirmed {
            return Err(AppError::Conflict(
                "an authenticator is already enrolled for this account".to_owned(),
            ));
        }

        let (secret_bytes, secret_base32, otpauth_uri) =
            self.totp_provider.generate_secret(&user.username)?;

        let encrypted_secret = self.secret_encryptor.encrypt(&secret_bytes)?;
        let recovery_codes = generate_recovery_codes();
        let hashed_codes = hash_recovery_codes(&recovery_codes);

        self.user_repository
            .store_totp_secret(user_id, &encrypted_secret, &hashed_codes)
            .await?;

        Ok(TotpEnrollment {
            secret_base32,
            otpauth_uri,
            recovery_codes,
        })
    }

    /// Confirms TOTP enrollment with a code from the user's authenticator.
    ///
    /// Flips `mfa_enabled` and the user's enrollment state only after the
    /// first successful verification.
    pub async fn confirm_enrollment(
        &self,
        context: &AuditContext,
        user_id: UserId,
        code: &str,
    ) -> AppResult<()> {
        let user = self
            .user_repository
            .find_by_id(user_id)
            .await?
            .ok_or_else(|| AppError::NotFound("user not found".to_owned()))?;

        let Some(ref encrypted_secret) = user.totp_secret_enc else {
            return Err(AppError::Validation(
                "no authenticator enrollment in progress".to_owned(),
            ));
        };

        let secret_bytes = self.secret_encryptor.decrypt(encrypted_secret)?;
        let valid = self.totp_provider.verify_code(&secret_bytes, code)?;
        if !valid {
            return Err(AppError::InvalidCode);
        }

        self.user_repository.confirm_totp(user_id).await?;
        self.user_repository
            .record_totp_step(user_id, Utc::now().timestamp() / 30)
            .await?;

        self.capabilities
            .set_user_state(UserCapabilityState {
                user_id,
                key: CapabilityKey::Totp,
                enrolled: true,
                state_data: None,
                enrolled_at: Some(Utc::now()),
                last_used_at: None,
            })
            .await?;

        self.audit
            .record(
                AuditEvent::new(AuditEventType::MfaEnrolled, AuditResult::Success, context)
                    .target("user", user_id),
            )
            .await?;

        Ok(())
    }
}
