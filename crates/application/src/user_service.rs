//! User lifecycle ports and application service.
//!
//! Owns principal records across both planes: creation, status changes,
//! password changes, and deletion. Follows OWASP guidelines for generic
//! error messages and timing-safe failure paths.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use clavis_core::{AppError, AppResult, TenantId};
use clavis_domain::{
    AuditEventType, AuditResult, EmailAddress, PrincipalType, UserId, UserStatus, Username,
    check_plane_invariant, validate_password,
};

use crate::audit_service::{AuditContext, AuditEvent, AuditService};
use crate::tenant_service::TenantSettingsRepository;
use crate::token_service::RefreshTokenRepository;

// ---------------------------------------------------------------------------
// Ports
// ---------------------------------------------------------------------------

/// User record returned by repository queries.
#[derive(Debug, Clone)]
pub struct UserRecord {
    /// Unique user identifier.
    pub id: UserId,
    /// Owning tenant; `None` for SYSTEM principals.
    pub tenant_id: Option<TenantId>,
    /// Plane of the principal.
    pub principal_type: PrincipalType,
    /// Canonical login name, unique per tenant (globally for SYSTEM).
    pub username: String,
    /// Canonical email address, unique per tenant (globally for SYSTEM).
    pub email: String,
    /// Lifecycle status.
    pub status: UserStatus,
    /// Whether MFA is active for this account.
    pub mfa_enabled: bool,
    /// Argon2id password hash.
    pub password_hash: Option<String>,
    /// Encrypted TOTP secret, if enrollment has started.
    pub totp_secret_enc: Option<Vec<u8>>,
    /// Whether the TOTP enrollment has been confirmed with a valid code.
    pub totp_confirmed: bool,
    /// Last consumed TOTP step, for replay rejection.
    pub totp_last_step: Option<i64>,
    /// Hashed single-use recovery codes.
    pub recovery_code_hashes: Vec<String>,
    /// Consecutive failed password or MFA attempts.
    pub failed_attempt_count: i32,
    /// Account is locked until this time, if set.
    pub locked_until: Option<DateTime<Utc>>,
    /// Last successful authentication.
    pub last_login_at: Option<DateTime<Utc>>,
    /// Free-form metadata.
    pub metadata: serde_json::Value,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl UserRecord {
    /// Whether the account can authenticate right now.
    #[must_use]
    pub fn can_authenticate(&self, now: DateTime<Utc>) -> bool {
        match self.status {
            UserStatus::Active => true,
            UserStatus::Inactive => false,
            UserStatus::Locked => self.locked_until.is_some_and(|until| now >= until),
        }
    }
}

/// Parameters for creating a user.
#[derive(Debug, Clone)]
pub struct NewUser {
    /// Owning tenant; `None` for SYSTEM principals.
    pub tenant_id: Option<TenantId>,
    /// Plane of the principal.
    pub principal_type: PrincipalType,
    /// Validated login name.
    pub username: String,
    /// Validated email address.
    pub email: String,
    /// Argon2id password hash.
    pub password_hash: Option<String>,
    /// Initial status.
    pub status: UserStatus,
}

/// Repository port for user persistence.
#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Finds a user by their unique identifier.
    async fn find_by_id(&self, user_id: UserId) -> AppResult<Option<UserRecord>>;

    /// Finds a user by username within a tenant scope.
    ///
    /// `tenant_id = None` searches SYSTEM principals.
    async fn find_by_username(
        &self,
        tenant_id: Option<TenantId>,
        username: &str,
    ) -> AppResult<Option<UserRecord>>;

    /// Creates a new user record. Returns the assigned user ID.
    async fn create(&self, user: NewUser) -> AppResult<UserId>;

    /// Lists users within a tenant scope, newest first.
    async fn list(
        &self,
        tenant_id: Option<TenantId>,
        page: u32,
        page_size: u32,
    ) -> AppResult<Vec<UserRecord>>;

    /// Counts SYSTEM principals; used by the bootstrap guard.
    async fn count_system_users(&self) -> AppResult<i64>;

    /// Updates the lifecycle status.
    async fn update_status(&self, user_id: UserId, status: UserStatus) -> AppResult<()>;

    /// Deletes a user record.
    async fn delete(&self, user_id: UserId) -> AppResult<()>;

    /// Updates the password hash and stamps `password_changed_at`.
    async fn update_password(&self, user_id: UserId, password_hash: &str) -> AppResult<()>;

    /// Increments the failed attempt counter and returns the new count.
    async fn record_failed_attempt(&self, user_id: UserId) -> AppResult<i32>;

    /// Resets the failed attempt counter and removes any lock.
    async fn reset_failed_attempts(&self, user_id: UserId) -> AppResult<()>;

    /// Locks the account until the given time.
    async fn lock(&self, user_id: UserId, until: DateTime<Utc>) -> AppResult<()>;

    /// Stamps a successful login and resets failure counters.
    async fn record_login(&self, user_id: UserId) -> AppResult<()>;

    /// Stores an encrypted TOTP secret and hashed recovery codes, unconfirmed.
    async fn store_totp_secret(
        &self,
        user_id: UserId,
        totp_secret_enc: &[u8],
        recovery_code_hashes: &[String],
    ) -> AppResult<()>;

    /// Marks the TOTP enrollment confirmed and enables MFA.
    async fn confirm_totp(&self, user_id: UserId) -> AppResult<()>;

    /// Clears TOTP state and disables MFA.
    async fn clear_totp(&self, user_id: UserId) -> AppResult<()>;

    /// Records the last consumed TOTP step for replay rejection.
    async fn record_totp_step(&self, user_id: UserId, step: i64) -> AppResult<()>;

    /// Replaces the hashed recovery codes.
    async fn update_recovery_codes(
        &self,
        user_id: UserId,
        recovery_code_hashes: &[String],
    ) -> AppResult<()>;
}

/// Port for password hashing operations. Keeps domain/application free of
/// direct cryptographic library coupling.
#[async_trait]
pub trait PasswordHasher: Send + Sync {
    /// Hashes a plaintext password using Argon2id.
    fn hash_password(&self, password: &str) -> AppResult<String>;

    /// Verifies a plaintext password against a stored hash.
    /// Must run in constant time regardless of validity.
    fn verify_password(&self, password: &str, hash: &str) -> AppResult<bool>;

    /// Whether a stored hash was minted with weaker parameters than the
    /// deployment currently runs. Callers re-hash on the next successful
    /// verification.
    fn needs_rehash(&self, hash: &str) -> bool;
}

// ---------------------------------------------------------------------------
// Service
// ---------------------------------------------------------------------------

/// Application service for user lifecycle operations.
#[derive(Clone)]
pub struct UserService {
    user_repository: Arc<dyn UserRepository>,
    password_hasher: Arc<dyn PasswordHasher>,
    refresh_tokens: Arc<dyn RefreshTokenRepository>,
    settings: Arc<dyn TenantSettingsRepository>,
    audit: AuditService,
}

impl UserService {
    /// Creates a new user service.
    #[must_use]
    pub fn new(
        user_repository: Arc<dyn UserRepository>,
        password_hasher: Arc<dyn PasswordHasher>,
        refresh_tokens: Arc<dyn RefreshTokenRepository>,
        settings: Arc<dyn TenantSettingsRepository>,
        audit: AuditService,
    ) -> Self {
        Self {
            user_repository,
            password_hasher,
            refresh_tokens,
            settings,
            audit,
        }
    }

    /// Creates a user on either plane.
    ///
    /// Enforces the plane invariant, username/email validity, and password
    /// policy. Uniqueness violations surface as `conflict`.
    pub async fn create_user(
        &self,
        context: &AuditContext,
        tenant_id: Option<TenantId>,
        principal_type: PrincipalType,
        username: &str,
        email: &str,
        password: &str,
    ) -> AppResult<UserRecord> {
        check_plane_invariant(principal_type, tenant_id)?;

        let username = Username::new(username)?;
        let email = EmailAddress::new(email)?;
        validate_password(password, false)?;
        self.enforce_tenant_password_floor(tenant_id, password).await?;

        let password_hash = self.password_hasher.hash_password(password)?;
        let user_id = self
            .user_repository
            .create(NewUser {
                tenant_id,
                principal_type,
                username: username.as_str().to_owned(),
                email: email.as_str().to_owned(),
                password_hash: Some(password_hash),
                status: UserStatus::Active,
            })
            .await?;

        self.audit
            .record(
                AuditEvent::new(AuditEventType::UserCreated, AuditResult::Success, context)
                    .target("user", user_id),
            )
            .await?;

        self.user_repository
            .find_by_id(user_id)
            .await?
            .ok_or_else(|| AppError::Internal("user vanished after creation".to_owned()))
    }

    /// Returns a user by ID, if it exists.
    pub async fn find_by_id(&self, user_id: UserId) -> AppResult<Option<UserRecord>> {
        self.user_repository.find_by_id(user_id).await
    }

    /// Returns a user by ID, scoped to a tenant.
    ///
    /// A user from another tenant is reported as `forbidden_tenant`.
    pub async fn find_in_tenant(
        &self,
        tenant_id: TenantId,
        user_id: UserId,
    ) -> AppResult<UserRecord> {
        let user = self
            .user_repository
            .find_by_id(user_id)
            .await?
            .ok_or_else(|| AppError::NotFound("user not found".to_owned()))?;

        if user.tenant_id != Some(tenant_id) {
            return Err(AppError::ForbiddenTenant(format!(
                "user '{user_id}' does not belong to tenant '{tenant_id}'"
            )));
        }

        Ok(user)
    }

    /// Lists users within a tenant scope.
    pub async fn list_users(
        &self,
        tenant_id: Option<TenantId>,
        page: u32,
        page_size: u32,
    ) -> AppResult<Vec<UserRecord>> {
        self.user_repository
            .list(tenant_id, page.max(1), page_size.clamp(1, 200))
            .await
    }

    /// Updates a user's lifecycle status.
    pub async fn set_status(
        &self,
        context: &AuditContext,
        user_id: UserId,
        status: UserStatus,
    ) -> AppResult<()> {
        self.user_repository.update_status(user_id, status).await?;

        self.audit
            .record(
                AuditEvent::new(AuditEventType::UserUpdated, AuditResult::Success, context)
                    .target("user", user_id)
                    .metadata(serde_json::json!({ "status": status.as_str() })),
            )
            .await?;

        Ok(())
    }

    /// Deletes a user. Destructive: requires an audit reason and revokes all
    /// of the user's refresh tokens first.
    pub async fn delete_user(
        &self,
        context: &AuditContext,
        user_id: UserId,
        reason: Option<String>,
    ) -> AppResult<()> {
        let event = AuditEvent::new(AuditEventType::UserDeleted, AuditResult::Success, context)
            .target("user", user_id)
            .reason(reason.clone());

        if reason.as_deref().is_none_or(|value| value.trim().is_empty()) {
            return Err(AppError::AuditReasonRequired);
        }

        self.refresh_tokens.revoke_all_for_user(user_id).await?;
        self.user_repository.delete(user_id).await?;
        self.audit.record(event).await?;

        Ok(())
    }

    /// Changes the password for an authenticated user.
    ///
    /// Requires the current password. All refresh tokens are revoked before
    /// the new credential is written; a failed revocation fails the change.
    pub async fn change_password(
        &self,
        context: &AuditContext,
        user_id: UserId,
        current_password: &str,
        new_password: &str,
    ) -> AppResult<()> {
        let user = self
            .user_repository
            .find_by_id(user_id)
            .await?
            .ok_or_else(|| AppError::NotFound("user not found".to_owned()))?;

        let Some(ref stored_hash) = user.password_hash else {
            return Err(AppError::Validation(
                "no password is set on this account".to_owned(),
            ));
        };

        let current_valid = self
            .password_hasher
            .verify_password(current_password, stored_hash)?;

        if !current_valid {
            return Err(AppError::InvalidCredentials);
        }

        validate_password(new_password, user.mfa_enabled)?;
        self.enforce_tenant_password_floor(user.tenant_id, new_password)
            .await?;

        self.apply_password(context, user_id, new_password, false)
            .await
    }

    /// Sets a new password without the current one; administrator path.
    ///
    /// Password recovery is only ever done by setting a new password.
    pub async fn reset_password(
        &self,
        context: &AuditContext,
        user_id: UserId,
        new_password: &str,
    ) -> AppResult<()> {
        let user = self
            .user_repository
            .find_by_id(user_id)
            .await?
            .ok_or_else(|| AppError::NotFound("user not found".to_owned()))?;

        validate_password(new_password, user.mfa_enabled)?;
        self.enforce_tenant_password_floor(user.tenant_id, new_password)
            .await?;
        self.apply_password(context, user_id, new_password, true)
            .await
    }

    async fn apply_password(
        &self,
        context: &AuditContext,
        user_id: UserId,
        new_password: &str,
        admin_reset: bool,
    ) -> AppResult<()> {
        let new_hash = self.password_hasher.hash_password(new_password)?;

        // Revoke-then-write: a failed revocation must fail the change, and a
        // failed write after revocation leaves only the old credential with
        // no live sessions.
        self.refresh_tokens.revoke_all_for_user(user_id).await?;
        self.user_repository
            .update_password(user_id, &new_hash)
            .await?;
        self.user_repository.reset_failed_attempts(user_id).await?;

        self.audit
            .record(
                AuditEvent::new(
                    AuditEventType::PasswordChanged,
                    AuditResult::Success,
                    context,
                )
                .target("user", user_id)
                .metadata(serde_json::json!({ "admin_reset": admin_reset })),
            )
            .await?;

        Ok(())
    }

    /// Applies a tenant's stricter password-length floor, when configured.
    async fn enforce_tenant_password_floor(
        &self,
        tenant_id: Option<TenantId>,
        password: &str,
    ) -> AppResult<()> {
        let Some(tenant_id) = tenant_id else {
            return Ok(());
        };

        let Some(settings) = self.settings.get(tenant_id).await? else {
            return Ok(());
        };

        if let Some(min_length) = settings.password_min_length
            && (password.chars().count() as i32) < min_length
        {
            return Err(AppError::Validation(format!(
                "password must be at least {min_length} characters"
            )));
        }

        Ok(())
    }

    /// Returns a reference to the password hasher for use by other services.
    #[must_use]
    pub fn password_hasher(&self) -> &Arc<dyn PasswordHasher> {
        &self.password_hasher
    }

    /// Returns a reference to the user repository for use by other services.
    #[must_use]
    pub fn user_repository(&self) -> &Arc<dyn UserRepository> {
        &self.user_repository
    }
}
