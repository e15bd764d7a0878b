//! Argon2id password hashing with deployment-tunable parameters.
//!
//! The OWASP Password Storage baseline (m=19456 KiB, t=2, p=1) is the floor;
//! deployments may raise the cost through configuration but never lower it.
//! `needs_rehash` reports stored hashes minted under weaker parameters so
//! the login path can upgrade them while the plaintext is available.

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, SaltString};
use argon2::{Algorithm, Argon2, Params, PasswordHasher as _, PasswordVerifier as _, Version};

use clavis_application::PasswordHasher as PasswordHasherPort;
use clavis_core::{AppError, AppResult};

/// OWASP memory floor, KiB.
const MIN_MEMORY_KIB: u32 = 19_456;

/// OWASP iteration floor.
const MIN_TIME_COST: u32 = 2;

/// Argon2id password hasher.
#[derive(Clone)]
pub struct Argon2PasswordHasher {
    argon2: Argon2<'static>,
    params: Params,
}

impl Argon2PasswordHasher {
    /// Creates a hasher at the OWASP baseline.
    #[must_use]
    pub fn new() -> Self {
        Self::with_params(MIN_MEMORY_KIB, MIN_TIME_COST, 1).unwrap_or_else(|_| Self {
            argon2: Argon2::default(),
            params: Params::default(),
        })
    }

    /// Creates a hasher with deployment-chosen parameters.
    ///
    /// Values below the OWASP floor are refused rather than weakened.
    pub fn with_params(memory_kib: u32, time_cost: u32, parallelism: u32) -> AppResult<Self> {
        if memory_kib < MIN_MEMORY_KIB {
            return Err(AppError::Validation(format!(
                "ARGON2_MEMORY_KIB must be at least {MIN_MEMORY_KIB}"
            )));
        }

        if time_cost < MIN_TIME_COST {
            return Err(AppError::Validation(format!(
                "ARGON2_TIME_COST must be at least {MIN_TIME_COST}"
            )));
        }

        if parallelism == 0 {
            return Err(AppError::Validation(
                "ARGON2_PARALLELISM must be at least 1".to_owned(),
            ));
        }

        let params = Params::new(memory_kib, time_cost, parallelism, None)
            .map_err(|error| AppError::Validation(format!("invalid Argon2 parameters: {error}")))?;

        Ok(Self {
            argon2: Argon2::new(Algorithm::Argon2id, Version::V0x13, params.clone()),
            params,
        })
    }
}

impl Default for Argon2PasswordHasher {
    fn default() -> Self {
        Self::new()
    }
}

impl PasswordHasherPort for Argon2PasswordHasher {
    fn hash_password(&self, password: &str) -> AppResult<String> {
        let salt = SaltString::generate(&mut OsRng);

        self.argon2
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|error| AppError::Internal(format!("argon2 hashing failed: {error}")))
    }

    fn verify_password(&self, password: &str, hash: &str) -> AppResult<bool> {
        let parsed = PasswordHash::new(hash).map_err(|error| {
            AppError::Internal(format!("stored password hash is malformed: {error}"))
        })?;

        match self.argon2.verify_password(password.as_bytes(), &parsed) {
            Ok(()) => Ok(true),
            Err(argon2::password_hash::Error::Password) => Ok(false),
            Err(error) => Err(AppError::Internal(format!(
                "argon2 verification failed: {error}"
            ))),
        }
    }

    fn needs_rehash(&self, hash: &str) -> bool {
        // Anything unreadable or non-Argon2id gets re-minted on the next
        // successful login.
        let Ok(parsed) = PasswordHash::new(hash) else {
            return true;
        };

        if parsed.algorithm != Algorithm::Argon2id.ident() {
            return true;
        }

        let Ok(stored) = Params::try_from(&parsed) else {
            return true;
        };

        stored.m_cost() < self.params.m_cost()
            || stored.t_cost() < self.params.t_cost()
            || stored.p_cost() < self.params.p_cost()
    }
}
