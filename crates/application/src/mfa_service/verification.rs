use chrono::Utc;

use crate::user_service::UserRecord;

use super::recovery_codes::hash_single_code;
use super::*;

impl MfaService {
    /// Verifies a TOTP code or recovery code for an MFA challenge.
    ///
    /// A verified TOTP code consumes its time step: presenting the same code
    /// again inside the skew window is rejected as a replay. A verified
    /// recovery code is removed from the stored set.
    pub async fn verify_code(&self, user: &UserRecord, code: &str) -> AppResult<bool> {
        if self.verify_totp(user, code).await? {
            return Ok(true);
        }

        self.consume_recovery_code(user, code).await
    }

    async fn verify_totp(&self, user: &UserRecord, code: &str) -> AppResult<bool> {
        if !user.totp_confirmed {
            return Ok(false);
        }

        let Some(ref encrypted_secret) = user.totp_secret_enc else {
            return Ok(false);
        };

        let secret_bytes = self.secret_encryptor.decrypt(encrypted_secret)?;
        let valid = self.totp_provider.verify_code(&secret_bytes, code)?;
        if !valid {
            return Ok(false);
        }

        // Replay protection: one successful verification consumes the window,
        // including the +/-1 skew steps.
        let current_step = Utc::now().timestamp() / 30;
        if user
            .totp_last_step
            .is_some_and(|last_step| current_step <= last_step)
        {
            return Ok(false);
        }

        self.user_repository
            .record_totp_step(user.id, current_step)
            .await?;

        Ok(true)
    }

    async fn consume_recovery_code(&self, user: &UserRecord, code: &str) -> AppResult<bool> {
        if user.recovery_code_hashes.is_empty() {
            return Ok(false);
        }

        let code_hash = hash_single_code(code);

        let mut matched = false;
        let mut remaining: Vec<String> = Vec::with_capacity(user.recovery_code_hashes.len());
        for stored_hash in &user.recovery_code_hashes {
            if !matched && *stored_hash == code_hash {
                matched = true;
            } else {
                remaining.push(stored_hash.clone());
            }
        }

        if matched {
            self.user_repository
                .update_recovery_codes(user.id, &remaining)
                .await?;
        }

        Ok(matched)
    }
}
