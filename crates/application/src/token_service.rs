//! Token lifecycle: issuance, single-use rotation, and revocation.
//!
//! Refresh tokens are opaque 32-byte values stored only as SHA-256 hashes.
//! The `mfa_verified` bit is set at issuance and carried unchanged across
//! every rotation; a pre-MFA token can never acquire MFA-bearing claims.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use clavis_core::{AppResult, TenantId};
use clavis_domain::UserId;

use crate::audit_service::AuditService;
use crate::rbac_service::RbacReader;
use crate::tenant_service::TenantSettingsRepository;
use crate::user_service::UserRepository;

mod issue;
mod refresh;
mod revoke;
mod token_crypto;

/// Access-token lifetime for SYSTEM sessions and the tenant default, minutes.
pub const DEFAULT_ACCESS_TTL_MINUTES: i64 = 15;

/// Refresh-token lifetime for SYSTEM sessions, days.
pub const SYSTEM_REFRESH_TTL_DAYS: i64 = 7;

/// Access-token lifetime for impersonation sessions, minutes.
pub const IMPERSONATION_ACCESS_TTL_MINUTES: i64 = 15;

/// Refresh token record as persisted.
#[derive(Debug, Clone)]
pub struct RefreshTokenRecord {
    /// Record identifier.
    pub id: Uuid,
    /// Owning user.
    pub user_id: UserId,
    /// Tenant scope; `None` for SYSTEM sessions.
    pub tenant_id: Option<TenantId>,
    /// SHA-256 hash of the opaque token value.
    pub token_hash: String,
    /// Expiry timestamp.
    pub expires_at: DateTime<Utc>,
    /// Set when the record has been rotated or revoked.
    pub revoked_at: Option<DateTime<Utc>>,
    /// Whether the session asked for an extended lifetime.
    pub remember_me: bool,
    /// Whether MFA was verified when the chain was created. Preserved across
    /// rotation; never upgraded.
    pub mfa_verified: bool,
    /// OAuth2 client that requested the session, if any.
    pub client_id: Option<String>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

/// Parameters for inserting a refresh token record.
#[derive(Debug, Clone)]
pub struct NewRefreshToken {
    /// Owning user.
    pub user_id: UserId,
    /// Tenant scope; `None` for SYSTEM sessions.
    pub tenant_id: Option<TenantId>,
    /// SHA-256 hash of the opaque token value.
    pub token_hash: String,
    /// Expiry timestamp.
    pub expires_at: DateTime<Utc>,
    /// Whether the session asked for an extended lifetime.
    pub remember_me: bool,
    /// MFA bit for the session chain.
    pub mfa_verified: bool,
    /// OAuth2 client that requested the session, if any.
    pub client_id: Option<String>,
}

/// Repository port for refresh token persistence.
#[async_trait]
pub trait RefreshTokenRepository: Send + Sync {
    /// Inserts a record. Returns the assigned id.
    async fn insert(&self, token: NewRefreshToken) -> AppResult<Uuid>;

    /// Finds a record by token hash.
    async fn find_by_hash(&self, token_hash: &str) -> AppResult<Option<RefreshTokenRecord>>;

    /// Atomically revokes the old record and inserts its replacement.
    ///
    /// The implementation must lock the old row; when the old record is
    /// already revoked or gone, the rotation loses the race and `None` is
    /// returned with no replacement inserted.
    async fn rotate(&self, old_id: Uuid, replacement: NewRefreshToken)
    -> AppResult<Option<Uuid>>;

    /// Revokes a record by id.
    async fn revoke(&self, id: Uuid) -> AppResult<()>;

    /// Revokes every live record for a user. Returns the revoked count.
    async fn revoke_all_for_user(&self, user_id: UserId) -> AppResult<u64>;

    /// Deletes records that expired before the cutoff. Returns the count.
    async fn delete_expired(&self, before: DateTime<Utc>) -> AppResult<u64>;
}

/// Port for signing and verifying access tokens.
pub trait TokenSigner: Send + Sync {
    /// Signs the claim set into a compact token.
    fn sign(&self, claims: &clavis_domain::AccessTokenClaims) -> AppResult<String>;

    /// Verifies a compact token and returns its claims.
    fn verify(&self, token: &str) -> AppResult<clavis_domain::AccessTokenClaims>;
}

/// Port for the revoked-`jti` blacklist.
///
/// Backed by a low-latency cache with persistence-backed authority; a cache
/// miss falls through to the store.
#[async_trait]
pub trait JtiBlacklist: Send + Sync {
    /// Places a `jti` on the blacklist until the token's expiry.
    async fn revoke(&self, jti: Uuid, expires_at: DateTime<Utc>) -> AppResult<()>;

    /// Whether a `jti` has been revoked.
    async fn is_revoked(&self, jti: Uuid) -> AppResult<bool>;
}

/// Issued token pair returned to clients.
#[derive(Debug, Clone)]
pub struct TokenPair {
    /// Signed access token.
    pub access_token: String,
    /// Opaque refresh token; shown exactly once.
    pub refresh_token: String,
    /// Access-token lifetime in seconds.
    pub expires_in: i64,
    /// Whether the session chain carries verified MFA.
    pub mfa_verified: bool,
}

/// Application service for the token lifecycle.
#[derive(Clone)]
pub struct TokenService {
    refresh_repository: Arc<dyn RefreshTokenRepository>,
    signer: Arc<dyn TokenSigner>,
    blacklist: Arc<dyn JtiBlacklist>,
    user_repository: Arc<dyn UserRepository>,
    rbac: Arc<dyn RbacReader>,
    settings: Arc<dyn TenantSettingsRepository>,
    audit: AuditService,
}

impl TokenService {
    /// Creates a new token service.
    #[must_use]
    pub fn new(
        refresh_repository: Arc<dyn RefreshTokenRepository>,
        signer: Arc<dyn TokenSigner>,
        blacklist: Arc<dyn JtiBlacklist>,
        user_repository: Arc<dyn UserRepository>,
        rbac: Arc<dyn RbacReader>,
        settings: Arc<dyn TenantSettingsRepository>,
        audit: AuditService,
    ) -> Self {
        Self {
            refresh_repository,
            signer,
            blacklist,
            user_repository,
            rbac,
            settings,
            audit,
        }
    }

    /// Verifies an access token and consults the revocation blacklist.
    pub async fn authenticate_access_token(
        &self,
        token: &str,
    ) -> AppResult<clavis_domain::AccessTokenClaims> {
        let claims = self.signer.verify(token)?;

        if self.blacklist.is_revoked(claims.jti).await? {
            return Err(clavis_core::AppError::TokenRevoked);
        }

        Ok(claims)
    }

    /// Returns a reference to the refresh token repository.
    #[must_use]
    pub fn refresh_repository(&self) -> &Arc<dyn RefreshTokenRepository> {
        &self.refresh_repository
    }
}
