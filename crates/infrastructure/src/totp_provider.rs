//! TOTP provider implementation using the `totp-rs` crate.

use async_trait::async_trait;
use clavis_application::TotpProvider;
use clavis_core::{AppError, AppResult};
use totp_rs::{Algorithm, Secret, TOTP};

/// RFC 6238 code length.
const DIGITS: usize = 6;

/// Accepted clock skew in 30-second steps.
const SKEW: u8 = 1;

/// Step length, seconds.
const STEP_SECONDS: u64 = 30;

/// TOTP provider with RFC 6238 compliance.
#[derive(Clone)]
pub struct TotpRsProvider {
    issuer: String,
}

impl TotpRsProvider {
    /// Creates a new TOTP provider with the issuer shown in authenticators.
    #[must_use]
    pub fn new(issuer: impl Into<String>) -> Self {
        Self {
            issuer: issuer.into(),
        }
    }

    fn instance(&self, secret_bytes: Vec<u8>, account_name: String) -> AppResult<TOTP> {
        TOTP::new(
            Algorithm::SHA1,
            DIGITS,
            SKEW,
            STEP_SECONDS,
            secret_bytes,
            Some(self.issuer.clone()),
            account_name,
        )
        .map_err(|error| AppError::Internal(format!("failed to create TOTP instance: {error}")))
    }
}

#[async_trait]
impl TotpProvider for TotpRsProvider {
    fn generate_secret(&self, account_name: &str) -> AppResult<(Vec<u8>, String, String)> {
        let secret = Secret::generate_secret();
        let secret_bytes = secret.to_bytes().map_err(|error| {
            AppError::Internal(format!("failed to generate TOTP secret: {error}"))
        })?;

        let totp = self.instance(secret_bytes.clone(), account_name.to_owned())?;

        let base32 = secret.to_encoded().to_string();
        let otpauth_uri = totp.get_url();

        Ok((secret_bytes, base32, otpauth_uri))
    }

    fn verify_code(&self, secret_bytes: &[u8], code: &str) -> AppResult<bool> {
        let totp = self.instance(secret_bytes.to_vec(), String::new())?;

        totp.check_current(code)
            .map_err(|error| AppError::Internal(format!("failed to verify TOTP code: {error}")))
    }
}
