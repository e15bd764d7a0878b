//! Authentication state machine.
//!
//! `START → CREDENTIAL_VERIFIED → (MFA_REQUIRED → MFA_VERIFIED →)? TOKENS_ISSUED`.
//! Challenges are single-use and short-lived; no token exists before the
//! challenge is verified. All credential failures collapse to
//! `invalid_credentials` and the hasher runs even for unknown users.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use clavis_core::{AppError, AppResult, TenantId};
use clavis_domain::{AuditEventType, AuditResult, CapabilityKey, PrincipalType, UserId};

use crate::audit_service::{AuditContext, AuditEvent, AuditService};
use crate::capability_service::CapabilityService;
use crate::mfa_service::MfaService;
use crate::tenant_service::TenantService;
use crate::token_service::{TokenPair, TokenService};
use crate::user_service::{PasswordHasher, UserRecord, UserRepository};

/// Lifetime of an MFA challenge. Bounded well under the ten-minute ceiling.
pub const CHALLENGE_TTL_SECONDS: i64 = 300;

/// Consecutive failures (password or MFA) that lock the account.
pub const MFA_FAILURE_LOCK_THRESHOLD: i32 = 5;

/// Lock window applied when the failure threshold is crossed, minutes.
const LOCK_WINDOW_MINUTES: i64 = 15;

// ---------------------------------------------------------------------------
// Ports
// ---------------------------------------------------------------------------

/// Pending MFA challenge as persisted.
#[derive(Debug, Clone)]
pub struct ChallengeRecord {
    /// Challenge identifier returned to the client.
    pub id: Uuid,
    /// User awaiting MFA.
    pub user_id: UserId,
    /// Remember-me flag carried from the password step to issuance.
    pub remember_me: bool,
    /// Expiry timestamp.
    pub expires_at: DateTime<Utc>,
    /// Set when the challenge has been consumed.
    pub consumed_at: Option<DateTime<Utc>>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

/// Repository port for MFA challenges.
#[async_trait]
pub trait ChallengeRepository: Send + Sync {
    /// Creates a challenge. Returns its identifier.
    async fn create(
        &self,
        user_id: UserId,
        remember_me: bool,
        expires_at: DateTime<Utc>,
    ) -> AppResult<Uuid>;

    /// Atomically consumes a live challenge.
    ///
    /// Returns `None` when the challenge is missing, expired, or already
    /// consumed; consumption is marked in the same statement to prevent
    /// replay races.
    async fn consume_valid(&self, challenge_id: Uuid) -> AppResult<Option<ChallengeRecord>>;

    /// Deletes challenges that expired before the cutoff. Returns the count.
    async fn delete_expired(&self, before: DateTime<Utc>) -> AppResult<u64>;
}

/// Result of the password step.
#[derive(Debug)]
pub enum LoginOutcome {
    /// No MFA required; the session is established.
    TokensIssued(TokenPair),
    /// Password verified; MFA verification must complete first. No tokens
    /// exist yet.
    MfaRequired {
        /// Challenge to present to `verify_challenge`.
        challenge_id: Uuid,
    },
}

// ---------------------------------------------------------------------------
// Service
// ---------------------------------------------------------------------------

/// Application service driving the authentication state machine.
#[derive(Clone)]
pub struct AuthService {
    user_repository: Arc<dyn UserRepository>,
    password_hasher: Arc<dyn PasswordHasher>,
    challenges: Arc<dyn ChallengeRepository>,
    tenants: TenantService,
    capabilities: CapabilityService,
    mfa: MfaService,
    tokens: TokenService,
    audit: AuditService,
}

impl AuthService {
    /// Creates a new authentication service.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        user_repository: Arc<dyn UserRepository>,
        password_hasher: Arc<dyn PasswordHasher>,
        challenges: Arc<dyn ChallengeRepository>,
        tenants: TenantService,
        capabilities: CapabilityService,
        mfa: MfaService,
        tokens: TokenService,
        audit: AuditService,
    ) -> Self {
        Self {
            user_repository,
            password_hasher,
            challenges,
            tenants,
            capabilities,
            mfa,
            tokens,
            audit,
        }
    }

    /// Authenticates a principal with username and password.
    ///
    /// `tenant_id = None` authenticates on the SYSTEM plane. Any failure
    /// (unknown user, wrong password, locked account, suspended tenant)
    /// returns `invalid_credentials` without distinguishing which.
    pub async fn authenticate(
        &self,
        context: &AuditContext,
        tenant_id: Option<TenantId>,
        username: &str,
        password: &str,
        remember_me: bool,
    ) -> AppResult<LoginOutcome> {
        let now = Utc::now();

        if let Some(tenant_id) = tenant_id
            && !self.tenants.is_active(tenant_id).await?
        {
            return self.reject_login(context, password, None, "tenant_unavailable").await;
        }

        let user = self
            .user_repository
            .find_by_username(tenant_id, username)
            .await?;

        let Some(user) = user else {
            return self.reject_login(context, password, None, "unknown_user").await;
        };

        if !user.can_authenticate(now) {
            return self
                .reject_login(context, password, Some(user.id), "account_unavailable")
                .await;
        }

        let Some(ref stored_hash) = user.password_hash else {
            return self
                .reject_login(context, password, Some(user.id), "no_password")
                .await;
        };

        let password_valid = self.password_hasher.verify_password(password, stored_hash)?;
        if !password_valid {
            self.register_failure(context, &user).await?;
            return Err(AppError::InvalidCredentials);
        }

        // Transparent hash upgrade: hashes minted under weaker parameters
        // are re-minted while the plaintext is available.
        if self.password_hasher.needs_rehash(stored_hash) {
            let upgraded = self.password_hasher.hash_password(password)?;
            self.user_repository
                .update_password(user.id, &upgraded)
                .await?;
        }

        self.audit
            .record(
                AuditEvent::new(AuditEventType::LoginPassword, AuditResult::Success, context)
                    .target("user", user.id),
            )
            .await?;

        if self.challenge_required(&user).await? {
            let challenge_id = self
                .challenges
                .create(
                    user.id,
                    remember_me,
                    now + Duration::seconds(CHALLENGE_TTL_SECONDS),
                )
                .await?;

            return Ok(LoginOutcome::MfaRequired { challenge_id });
        }

        self.user_repository.record_login(user.id).await?;
        let pair = self
            .tokens
            .issue_for_user(context, &user, false, remember_me, None)
            .await?;

        Ok(LoginOutcome::TokensIssued(pair))
    }

    /// Completes the MFA step with a TOTP or recovery code.
    ///
    /// The challenge is consumed whether or not the code verifies; a wrong
    /// code sends the client back to a full login.
    pub async fn verify_challenge(
        &self,
        context: &AuditContext,
        challenge_id: Uuid,
        code: &str,
    ) -> AppResult<TokenPair> {
        let challenge = self
            .challenges
            .consume_valid(challenge_id)
            .await?
            .ok_or(AppError::InvalidCode)?;

        let user = self
            .user_repository
            .find_by_id(challenge.user_id)
            .await?
            .ok_or(AppError::InvalidCode)?;

        let valid = self.mfa.verify_code(&user, code).await?;
        if !valid {
            self.register_failure(context, &user).await?;
            self.audit
                .record(
                    AuditEvent::new(AuditEventType::MfaVerified, AuditResult::Failure, context)
                        .target("user", user.id)
                        .error_code(AppError::InvalidCode.code()),
                )
                .await?;
            return Err(AppError::InvalidCode);
        }

        self.audit
            .record(
                AuditEvent::new(AuditEventType::MfaVerified, AuditResult::Success, context)
                    .target("user", user.id),
            )
            .await?;

        self.user_repository.record_login(user.id).await?;
        self.tokens
            .issue_for_user(context, &user, true, challenge.remember_me, None)
            .await
    }

    /// Whether the password step must be followed by an MFA challenge.
    ///
    /// SYSTEM principals with a confirmed authenticator are always challenged
    /// regardless of per-tenant flags. Unenrolled users fall through to a
    /// password-only session so they can reach the enrollment surface.
    async fn challenge_required(&self, user: &UserRecord) -> AppResult<bool> {
        if !user.totp_confirmed {
            return Ok(false);
        }

        if user.mfa_enabled || user.principal_type == PrincipalType::System {
            return Ok(true);
        }

        if let Some(tenant_id) = user.tenant_id {
            return self.tenant_requires_mfa(tenant_id).await;
        }

        Ok(false)
    }

    async fn tenant_requires_mfa(&self, tenant_id: TenantId) -> AppResult<bool> {
        match self
            .capabilities
            .resolve(Some(tenant_id), None, CapabilityKey::Mfa)
            .await
        {
            Ok(resolved) => Ok(resolved
                .value
                .as_ref()
                .and_then(|value| value.get("required"))
                .and_then(serde_json::Value::as_bool)
                .unwrap_or(false)),
            Err(AppError::CapabilityNotSupported(_) | AppError::EnrollmentRequired(_)) => Ok(false),
            Err(error) => Err(error),
        }
    }

    /// Hashes the presented password to equalize timing, audits the failure,
    /// and returns the generic credential error.
    async fn reject_login(
        &self,
        context: &AuditContext,
        password: &str,
        user_id: Option<UserId>,
        detail: &'static str,
    ) -> AppResult<LoginOutcome> {
        let _ = self.password_hasher.hash_password(password);

        let mut event = AuditEvent::new(AuditEventType::LoginFailure, AuditResult::Failure, context)
            .error_code(AppError::InvalidCredentials.code())
            .metadata(serde_json::json!({ "detail": detail }));
        if let Some(user_id) = user_id {
            event = event.target("user", user_id);
        }
        self.audit.record(event).await?;

        Err(AppError::InvalidCredentials)
    }

    /// Records a failed attempt and locks the account past the threshold.
    async fn register_failure(&self, context: &AuditContext, user: &UserRecord) -> AppResult<()> {
        let failures = self.user_repository.record_failed_attempt(user.id).await?;

        if failures >= MFA_FAILURE_LOCK_THRESHOLD {
            self.user_repository
                .lock(user.id, Utc::now() + Duration::minutes(LOCK_WINDOW_MINUTES))
                .await?;

            self.audit
                .record(
                    AuditEvent::new(AuditEventType::UserLocked, AuditResult::Success, context)
                        .target("user", user.id)
                        .metadata(serde_json::json!({ "failed_attempts": failures })),
                )
                .await?;
        }

        self.audit
            .record(
                AuditEvent::new(AuditEventType::LoginFailure, AuditResult::Failure, context)
                    .target("user", user.id)
                    .error_code(AppError::InvalidCredentials.code()),
            )
            .await?;

        Ok(())
    }

    /// Removes expired challenges. Intended for the background sweeper.
    pub async fn cleanup_expired_challenges(&self) -> AppResult<u64> {
        self.challenges.delete_expired(Utc::now()).await
    }
}

#[cfg(test)]
mod tests;
