//! HS256 access-token signer backed by `jsonwebtoken`.

use clavis_application::TokenSigner;
use clavis_core::{AppError, AppResult};
use clavis_domain::AccessTokenClaims;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};

/// Accepted clock skew when validating `exp`, seconds.
const VALIDATION_LEEWAY_SECONDS: u64 = 30;

/// Signs and verifies the typed claim set with a process-wide HMAC secret.
///
/// The secret is loaded once from configuration; rotating it invalidates
/// every outstanding access token.
#[derive(Clone)]
pub struct JwtTokenSigner {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtTokenSigner {
    /// Creates a signer from the raw signing secret.
    ///
    /// The secret must be at least 32 bytes.
    pub fn new(secret: &str) -> AppResult<Self> {
        if secret.len() < 32 {
            return Err(AppError::Validation(
                "JWT_SIGNING_SECRET must be at least 32 bytes".to_owned(),
            ));
        }

        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = VALIDATION_LEEWAY_SECONDS;

        Ok(Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        })
    }
}

impl TokenSigner for JwtTokenSigner {
    fn sign(&self, claims: &AccessTokenClaims) -> AppResult<String> {
        encode(&Header::new(Algorithm::HS256), claims, &self.encoding_key)
            .map_err(|error| AppError::Internal(format!("failed to sign access token: {error}")))
    }

    fn verify(&self, token: &str) -> AppResult<AccessTokenClaims> {
        decode::<AccessTokenClaims>(token, &self.decoding_key, &self.validation)
            .map(|data| data.claims)
            .map_err(|_| AppError::Unauthorized("invalid or expired access token".to_owned()))
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use uuid::Uuid;

    use clavis_domain::{PrincipalType, acr_claim, amr_claim};

    use super::*;

    const SECRET: &str = "test-signing-secret-of-sufficient-length";

    fn claims(expires_in_seconds: i64) -> AccessTokenClaims {
        let now = Utc::now().timestamp();
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
            iat: now,
            exp: now + expires_in_seconds,
            jti: Uuid::new_v4(),
            impersonation: false,
            impersonator_id: None,
        }
    }

    #[test]
    fn sign_and_verify_roundtrip() -> clavis_core::AppResult<()> {
        let signer = JwtTokenSigner::new(SECRET)?;
        let claims = claims(900);

        let token = signer.sign(&claims)?;
        let verified = signer.verify(&token)?;

        assert_eq!(verified, claims);
        Ok(())
    }

    #[test]
    fn expired_token_is_rejected() -> clavis_core::AppResult<()> {
        let signer = JwtTokenSigner::new(SECRET)?;
        let token = signer.sign(&claims(-3600))?;

        assert!(signer.verify(&token).is_err());
        Ok(())
    }

    #[test]
    fn token_signed_with_another_secret_is_rejected() -> clavis_core::AppResult<()> {
        let signer = JwtTokenSigner::new(SECRET)?;
        let other = JwtTokenSigner::new("a-completely-different-signing-secret")?;

        let token = other.sign(&claims(900))?;
        assert!(signer.verify(&token).is_err());
        Ok(())
    }

    #[test]
    fn short_secret_is_rejected() {
        assert!(JwtTokenSigner::new("short").is_err());
    }
}
