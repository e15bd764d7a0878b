//! Shared in-memory fakes for service tests.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use clavis_core::{AppError, AppResult, TenantId};
use clavis_domain::{AccessTokenClaims, CapabilityKey, PrincipalType, UserId, UserStatus};

use crate::audit_service::{AuditEvent, AuditEventRecord, AuditQuery, AuditRepository};
use crate::auth_service::{ChallengeRecord, ChallengeRepository};
use crate::capability_service::{
    CapabilityRepository, SystemCapabilityRecord, TenantCapabilityRecord, TenantFeatureRecord,
    UserCapabilityState,
};
use crate::rbac_service::{NewPermission, NewRole, PermissionRecord, RbacReader, RbacRepository, RoleRecord};
use crate::tenant_service::{
    NewTenant, TenantRecord, TenantRepository, TenantSettingsRecord, TenantSettingsRepository,
};
use crate::token_service::{
    JtiBlacklist, NewRefreshToken, RefreshTokenRecord, RefreshTokenRepository, TokenSigner,
};
use crate::user_service::{NewUser, PasswordHasher, UserRecord, UserRepository};

fn lock<T>(mutex: &Mutex<T>) -> AppResult<MutexGuard<'_, T>> {
    mutex
        .lock()
        .map_err(|_| AppError::Internal("lock poisoned".to_owned()))
}

// ---------------------------------------------------------------------------
// Audit
// ---------------------------------------------------------------------------

pub(crate) struct FakeAuditRepository {
    events: Mutex<Vec<AuditEventRecord>>,
    pub(crate) fail_appends: Mutex<bool>,
}

impl FakeAuditRepository {
    pub(crate) fn new() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            fail_appends: Mutex::new(false),
        }
    }

    pub(crate) fn records(&self) -> Vec<AuditEventRecord> {
        self.events.lock().map(|events| events.clone()).unwrap_or_default()
    }

    pub(crate) fn set_failing(&self, failing: bool) {
        if let Ok(mut flag) = self.fail_appends.lock() {
            *flag = failing;
        }
    }
}

#[async_trait]
impl AuditRepository for FakeAuditRepository {
    async fn append(&self, event: AuditEvent) -> AppResult<AuditEventRecord> {
        if *lock(&self.fail_appends)? {
            return Err(AppError::Internal("audit store unavailable".to_owned()));
        }

        let mut events = lock(&self.events)?;
        let record = AuditEventRecord {
            id: Uuid::new_v4(),
            sequence: events.len() as i64 + 1,
            timestamp: Utc::now(),
            event_type: event.event_type.as_str().to_owned(),
            result: event.result,
            actor_user_id: event.actor_user_id,
            actor_principal_type: event.actor_principal_type,
            actor_username: event.actor_username,
            target_type: event.target_type,
            target_id: event.target_id,
            tenant_id: event.tenant_id,
            error_code: event.error_code,
            reason: event.reason,
            source_ip: event.source_ip,
            user_agent: event.user_agent,
            impersonator_id: event.impersonator_id,
            metadata: event.metadata,
        };
        events.push(record.clone());
        Ok(record)
    }

    async fn query(&self, _query: AuditQuery) -> AppResult<Vec<AuditEventRecord>> {
        Ok(lock(&self.events)?.clone())
    }

    async fn count(&self, _query: AuditQuery) -> AppResult<i64> {
        Ok(lock(&self.events)?.len() as i64)
    }
}

// ---------------------------------------------------------------------------
// Users and credentials
// ---------------------------------------------------------------------------

pub(crate) struct FakePasswordHasher;

#[async_trait]
impl PasswordHasher for FakePasswordHasher {
    fn hash_password(&self, password: &str) -> AppResult<String> {
        Ok(format!("hashed:{password}"))
    }

    fn verify_password(&self, password: &str, hash: &str) -> AppResult<bool> {
        Ok(hash == format!("hashed:{password}"))
    }

    fn needs_rehash(&self, _hash: &str) -> bool {
        false
    }
}

pub(crate) struct FakeUserRepository {
    users: Mutex<HashMap<UserId, UserRecord>>,
}

impl FakeUserRepository {
    pub(crate) fn new() -> Self {
        Self {
            users: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn insert(&self, user: UserRecord) {
        if let Ok(mut users) = self.users.lock() {
            users.insert(user.id, user);
        }
    }

    pub(crate) fn get(&self, user_id: UserId) -> Option<UserRecord> {
        self.users
            .lock()
            .ok()
            .and_then(|users| users.get(&user_id).cloned())
    }
}

pub(crate) fn make_user(tenant_id: Option<TenantId>, username: &str) -> UserRecord {
    let principal_type = if tenant_id.is_some() {
        PrincipalType::Tenant
    } else {
        PrincipalType::System
    };

    UserRecord {
        id: UserId::new(),
        tenant_id,
        principal_type,
        username: username.to_owned(),
        email: format!("{username}@example.com"),
        status: UserStatus::Active,
        mfa_enabled: false,
        password_hash: Some("hashed:Correct-Horse-42".to_owned()),
        totp_secret_enc: None,
        totp_confirmed: false,
        totp_last_step: None,
        recovery_code_hashes: Vec::new(),
        failed_attempt_count: 0,
        locked_until: None,
        last_login_at: None,
        metadata: serde_json::json!({}),
        created_at: Utc::now(),
    }
}

#[async_trait]
impl UserRepository for FakeUserRepository {
    async fn find_by_id(&self, user_id: UserId) -> AppResult<Option<UserRecord>> {
        Ok(lock(&self.users)?.get(&user_id).cloned())
    }

    async fn find_by_username(
        &self,
        tenant_id: Option<TenantId>,
        username: &str,
    ) -> AppResult<Option<UserRecord>> {
        Ok(lock(&self.users)?
            .values()
            .find(|user| user.tenant_id == tenant_id && user.username == username)
            .cloned())
    }

    async fn create(&self, user: NewUser) -> AppResult<UserId> {
        let mut users = lock(&self.users)?;
        if users
            .values()
            .any(|existing| existing.tenant_id == user.tenant_id && existing.username == user.username)
        {
            return Err(AppError::Conflict("username already exists".to_owned()));
        }

        let id = UserId::new();
        users.insert(
            id,
            UserRecord {
                id,
                tenant_id: user.tenant_id,
                principal_type: user.principal_type,
                username: user.username,
                email: user.email,
                status: user.status,
                mfa_enabled: false,
                password_hash: user.password_hash,
                totp_secret_enc: None,
                totp_confirmed: false,
                totp_last_step: None,
                recovery_code_hashes: Vec::new(),
                failed_attempt_count: 0,
                locked_until: None,
                last_login_at: None,
                metadata: serde_json::json!({}),
                created_at: Utc::now(),
            },
        );
        Ok(id)
    }

    async fn list(
        &self,
        tenant_id: Option<TenantId>,
        _page: u32,
        _page_size: u32,
    ) -> AppResult<Vec<UserRecord>> {
        Ok(lock(&self.users)?
            .values()
            .filter(|user| user.tenant_id == tenant_id)
            .cloned()
            .collect())
    }

    async fn count_system_users(&self) -> AppResult<i64> {
        Ok(lock(&self.users)?
            .values()
            .filter(|user| user.principal_type == PrincipalType::System)
            .count() as i64)
    }

    async fn update_status(&self, user_id: UserId, status: UserStatus) -> AppResult<()> {
        if let Some(user) = lock(&self.users)?.get_mut(&user_id) {
            user.status = status;
        }
        Ok(())
    }

    async fn delete(&self, user_id: UserId) -> AppResult<()> {
        lock(&self.users)?.remove(&user_id);
        Ok(())
    }

    async fn update_password(&self, user_id: UserId, password_hash: &str) -> AppResult<()> {
        if let Some(user) = lock(&self.users)?.get_mut(&user_id) {
            user.password_hash = Some(password_hash.to_owned());
        }
        Ok(())
    }

    async fn record_failed_attempt(&self, user_id: UserId) -> AppResult<i32> {
        let mut users = lock(&self.users)?;
        let user = users
            .get_mut(&user_id)
            .ok_or_else(|| AppError::NotFound("user not found".to_owned()))?;
        user.failed_attempt_count += 1;
        Ok(user.failed_attempt_count)
    }

    async fn reset_failed_attempts(&self, user_id: UserId) -> AppResult<()> {
        if let Some(user) = lock(&self.users)?.get_mut(&user_id) {
            user.failed_attempt_count = 0;
            user.locked_until = None;
        }
        Ok(())
    }

    async fn lock(&self, user_id: UserId, until: DateTime<Utc>) -> AppResult<()> {
        if let Some(user) = lock(&self.users)?.get_mut(&user_id) {
            user.status = UserStatus::Locked;
            user.locked_until = Some(until);
        }
        Ok(())
    }

    async fn record_login(&self, user_id: UserId) -> AppResult<()> {
        if let Some(user) = lock(&self.users)?.get_mut(&user_id) {
            user.last_login_at = Some(Utc::now());
            user.failed_attempt_count = 0;
            if user.status == UserStatus::Locked {
                user.status = UserStatus::Active;
                user.locked_until = None;
            }
        }
        Ok(())
    }

    async fn store_totp_secret(
        &self,
        user_id: UserId,
        totp_secret_enc: &[u8],
        recovery_code_hashes: &[String],
    ) -> AppResult<()> {
        if let Some(user) = lock(&self.users)?.get_mut(&user_id) {
            user.totp_secret_enc = Some(totp_secret_enc.to_vec());
            user.recovery_code_hashes = recovery_code_hashes.to_vec();
            user.totp_confirmed = false;
        }
        Ok(())
    }

    async fn confirm_totp(&self, user_id: UserId) -> AppResult<()> {
        if let Some(user) = lock(&self.users)?.get_mut(&user_id) {
            user.totp_confirmed = true;
            user.mfa_enabled = true;
        }
        Ok(())
    }

    async fn clear_totp(&self, user_id: UserId) -> AppResult<()> {
        if let Some(user) = lock(&self.users)?.get_mut(&user_id) {
            user.totp_confirmed = false;
            user.mfa_enabled = false;
            user.totp_secret_enc = None;
            user.totp_last_step = None;
            user.recovery_code_hashes = Vec::new();
        }
        Ok(())
    }

    async fn record_totp_step(&self, user_id: UserId, step: i64) -> AppResult<()> {
        if let Some(user) = lock(&self.users)?.get_mut(&user_id) {
            user.totp_last_step = Some(step);
        }
        Ok(())
    }

    async fn update_recovery_codes(
        &self,
        user_id: UserId,
        recovery_code_hashes: &[String],
    ) -> AppResult<()> {
        if let Some(user) = lock(&self.users)?.get_mut(&user_id) {
            user.recovery_code_hashes = recovery_code_hashes.to_vec();
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Refresh tokens, signer, blacklist
// ---------------------------------------------------------------------------

pub(crate) struct FakeRefreshTokenRepository {
    records: Mutex<Vec<RefreshTokenRecord>>,
}

impl FakeRefreshTokenRepository {
    pub(crate) fn new() -> Self {
        Self {
            records: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn records(&self) -> Vec<RefreshTokenRecord> {
        self.records.lock().map(|records| records.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl RefreshTokenRepository for FakeRefreshTokenRepository {
    async fn insert(&self, token: NewRefreshToken) -> AppResult<Uuid> {
        let mut records = lock(&self.records)?;
        let id = Uuid::new_v4();
        records.push(RefreshTokenRecord {
            id,
            user_id: token.user_id,
            tenant_id: token.tenant_id,
            token_hash: token.token_hash,
            expires_at: token.expires_at,
            revoked_at: None,
            remember_me: token.remember_me,
            mfa_verified: token.mfa_verified,
            client_id: token.client_id,
            created_at: Utc::now(),
        });
        Ok(id)
    }

    async fn find_by_hash(&self, token_hash: &str) -> AppResult<Option<RefreshTokenRecord>> {
        Ok(lock(&self.records)?
            .iter()
            .find(|record| record.token_hash == token_hash)
            .cloned())
    }

    async fn rotate(
        &self,
        old_id: Uuid,
        replacement: NewRefreshToken,
    ) -> AppResult<Option<Uuid>> {
        let mut records = lock(&self.records)?;

        let Some(old) = records
            .iter_mut()
            .find(|record| record.id == old_id && record.revoked_at.is_none())
        else {
            return Ok(None);
        };
        old.revoked_at = Some(Utc::now());

        let id = Uuid::new_v4();
        records.push(RefreshTokenRecord {
            id,
            user_id: replacement.user_id,
            tenant_id: replacement.tenant_id,
            token_hash: replacement.token_hash,
            expires_at: replacement.expires_at,
            revoked_at: None,
            remember_me: replacement.remember_me,
            mfa_verified: replacement.mfa_verified,
            client_id: replacement.client_id,
            created_at: Utc::now(),
        });
        Ok(Some(id))
    }

    async fn revoke(&self, id: Uuid) -> AppResult<()> {
        if let Some(record) = lock(&self.records)?.iter_mut().find(|record| record.id == id) {
            record.revoked_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn revoke_all_for_user(&self, user_id: UserId) -> AppResult<u64> {
        let mut revoked = 0;
        for record in lock(&self.records)?.iter_mut() {
            if record.user_id == user_id && record.revoked_at.is_none() {
                record.revoked_at = Some(Utc::now());
                revoked += 1;
            }
        }
        Ok(revoked)
    }

    async fn delete_expired(&self, before: DateTime<Utc>) -> AppResult<u64> {
        let mut records = lock(&self.records)?;
        let initial = records.len();
        records.retain(|record| record.expires_at >= before);
        Ok((initial - records.len()) as u64)
    }
}

/// Signer that serializes claims as JSON; good enough to round-trip claims
/// through service tests without real cryptography.
pub(crate) struct FakeSigner;

impl TokenSigner for FakeSigner {
    fn sign(&self, claims: &AccessTokenClaims) -> AppResult<String> {
        serde_json::to_string(claims)
            .map_err(|error| AppError::Internal(format!("failed to sign: {error}")))
    }

    fn verify(&self, token: &str) -> AppResult<AccessTokenClaims> {
        serde_json::from_str(token)
            .map_err(|_| AppError::Unauthorized("invalid token".to_owned()))
    }
}

pub(crate) struct FakeBlacklist {
    revoked: Mutex<HashSet<Uuid>>,
}

impl FakeBlacklist {
    pub(crate) fn new() -> Self {
        Self {
            revoked: Mutex::new(HashSet::new()),
        }
    }
}

#[async_trait]
impl JtiBlacklist for FakeBlacklist {
    async fn revoke(&self, jti: Uuid, _expires_at: DateTime<Utc>) -> AppResult<()> {
        lock(&self.revoked)?.insert(jti);
        Ok(())
    }

    async fn is_revoked(&self, jti: Uuid) -> AppResult<bool> {
        Ok(lock(&self.revoked)?.contains(&jti))
    }
}

// ---------------------------------------------------------------------------
// Challenges
// ---------------------------------------------------------------------------

pub(crate) struct FakeChallengeRepository {
    challenges: Mutex<Vec<ChallengeRecord>>,
}

impl FakeChallengeRepository {
    pub(crate) fn new() -> Self {
        Self {
            challenges: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl ChallengeRepository for FakeChallengeRepository {
    async fn create(
        &self,
        user_id: UserId,
        remember_me: bool,
        expires_at: DateTime<Utc>,
    ) -> AppResult<Uuid> {
        let mut challenges = lock(&self.challenges)?;
        let id = Uuid::new_v4();
        challenges.push(ChallengeRecord {
            id,
            user_id,
            remember_me,
            expires_at,
            consumed_at: None,
            created_at: Utc::now(),
        });
        Ok(id)
    }

    async fn consume_valid(&self, challenge_id: Uuid) -> AppResult<Option<ChallengeRecord>> {
        let now = Utc::now();
        let mut challenges = lock(&self.challenges)?;
        let Some(challenge) = challenges.iter_mut().find(|challenge| {
            challenge.id == challenge_id
                && challenge.consumed_at.is_none()
                && challenge.expires_at > now
        }) else {
            return Ok(None);
        };

        challenge.consumed_at = Some(now);
        Ok(Some(challenge.clone()))
    }

    async fn delete_expired(&self, before: DateTime<Utc>) -> AppResult<u64> {
        let mut challenges = lock(&self.challenges)?;
        let initial = challenges.len();
        challenges.retain(|challenge| challenge.expires_at >= before);
        Ok((initial - challenges.len()) as u64)
    }
}

// ---------------------------------------------------------------------------
// Tenants and settings
// ---------------------------------------------------------------------------

pub(crate) struct FakeTenantRepository {
    tenants: Mutex<Vec<TenantRecord>>,
}

impl FakeTenantRepository {
    pub(crate) fn new() -> Self {
        Self {
            tenants: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn insert_active(&self, tenant_id: TenantId) {
        if let Ok(mut tenants) = self.tenants.lock() {
            tenants.push(TenantRecord {
                id: tenant_id,
                name: "Test Tenant".to_owned(),
                domain: format!("{tenant_id}.example.com"),
                status: clavis_domain::TenantStatus::Active,
                created_at: Utc::now(),
                updated_at: Utc::now(),
            });
        }
    }
}

#[async_trait]
impl TenantRepository for FakeTenantRepository {
    async fn create(&self, tenant: NewTenant) -> AppResult<TenantId> {
        let mut tenants = lock(&self.tenants)?;
        if tenants.iter().any(|existing| existing.domain == tenant.domain) {
            return Err(AppError::Conflict("domain already exists".to_owned()));
        }

        let id = TenantId::new();
        tenants.push(TenantRecord {
            id,
            name: tenant.name,
            domain: tenant.domain,
            status: clavis_domain::TenantStatus::Active,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        });
        Ok(id)
    }

    async fn find_by_id(&self, tenant_id: TenantId) -> AppResult<Option<TenantRecord>> {
        Ok(lock(&self.tenants)?
            .iter()
            .find(|tenant| tenant.id == tenant_id)
            .cloned())
    }

    async fn find_by_domain(&self, domain: &str) -> AppResult<Option<TenantRecord>> {
        Ok(lock(&self.tenants)?
            .iter()
            .find(|tenant| tenant.domain == domain)
            .cloned())
    }

    async fn list(&self, _page: u32, _page_size: u32) -> AppResult<Vec<TenantRecord>> {
        Ok(lock(&self.tenants)?.clone())
    }

    async fn update_name(&self, tenant_id: TenantId, name: &str) -> AppResult<()> {
        if let Some(tenant) = lock(&self.tenants)?
            .iter_mut()
            .find(|tenant| tenant.id == tenant_id)
        {
            tenant.name = name.to_owned();
        }
        Ok(())
    }

    async fn set_status(
        &self,
        tenant_id: TenantId,
        status: clavis_domain::TenantStatus,
    ) -> AppResult<()> {
        if let Some(tenant) = lock(&self.tenants)?
            .iter_mut()
            .find(|tenant| tenant.id == tenant_id)
        {
            tenant.status = status;
        }
        Ok(())
    }
}

pub(crate) struct FakeSettingsRepository {
    settings: Mutex<HashMap<TenantId, TenantSettingsRecord>>,
}

impl FakeSettingsRepository {
    pub(crate) fn new() -> Self {
        Self {
            settings: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl TenantSettingsRepository for FakeSettingsRepository {
    async fn get(&self, tenant_id: TenantId) -> AppResult<Option<TenantSettingsRecord>> {
        Ok(lock(&self.settings)?.get(&tenant_id).cloned())
    }

    async fn upsert(&self, settings: TenantSettingsRecord) -> AppResult<()> {
        lock(&self.settings)?.insert(settings.tenant_id, settings);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// RBAC reader and capabilities
// ---------------------------------------------------------------------------

pub(crate) struct FakeRbacReader {
    pub(crate) roles: Vec<String>,
    pub(crate) permissions: Vec<String>,
    pub(crate) system_roles: Vec<String>,
    pub(crate) system_permissions: Vec<String>,
}

impl FakeRbacReader {
    pub(crate) fn tenant_member() -> Self {
        Self {
            roles: vec!["member".to_owned()],
            permissions: vec!["tenant.users:read".to_owned()],
            system_roles: Vec::new(),
            system_permissions: Vec::new(),
        }
    }
}

#[async_trait]
impl RbacReader for FakeRbacReader {
    async fn role_names_for_user(&self, _user_id: UserId) -> AppResult<Vec<String>> {
        Ok(self.roles.clone())
    }

    async fn permission_keys_for_user(&self, _user_id: UserId) -> AppResult<Vec<String>> {
        Ok(self.permissions.clone())
    }

    async fn system_role_names_for_user(&self, _user_id: UserId) -> AppResult<Vec<String>> {
        Ok(self.system_roles.clone())
    }

    async fn system_permission_keys_for_user(&self, _user_id: UserId) -> AppResult<Vec<String>> {
        Ok(self.system_permissions.clone())
    }
}

#[derive(Default)]
struct CapabilityState {
    system: Vec<SystemCapabilityRecord>,
    tenant: Vec<TenantCapabilityRecord>,
    features: Vec<TenantFeatureRecord>,
    users: Vec<UserCapabilityState>,
}

pub(crate) struct FakeCapabilityRepository {
    state: Mutex<CapabilityState>,
}

impl FakeCapabilityRepository {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(CapabilityState::default()),
        }
    }

    pub(crate) fn with_system(self, record: SystemCapabilityRecord) -> Self {
        if let Ok(mut state) = self.state.lock() {
            state.system.push(record);
        }
        self
    }
}

#[async_trait]
impl CapabilityRepository for FakeCapabilityRepository {
    async fn system_capability(
        &self,
        key: CapabilityKey,
    ) -> AppResult<Option<SystemCapabilityRecord>> {
        Ok(lock(&self.state)?
            .system
            .iter()
            .find(|row| row.key == key)
            .cloned())
    }

    async fn list_system_capabilities(&self) -> AppResult<Vec<SystemCapabilityRecord>> {
        Ok(lock(&self.state)?.system.clone())
    }

    async fn tenant_capability(
        &self,
        tenant_id: TenantId,
        key: CapabilityKey,
    ) -> AppResult<Option<TenantCapabilityRecord>> {
        Ok(lock(&self.state)?
            .tenant
            .iter()
            .find(|row| row.tenant_id == tenant_id && row.key == key)
            .cloned())
    }

    async fn set_tenant_capability(&self, record: TenantCapabilityRecord) -> AppResult<()> {
        let mut state = lock(&self.state)?;
        state
            .tenant
            .retain(|row| !(row.tenant_id == record.tenant_id && row.key == record.key));
        state.tenant.push(record);
        Ok(())
    }

    async fn list_tenant_capabilities(
        &self,
        tenant_id: TenantId,
    ) -> AppResult<Vec<TenantCapabilityRecord>> {
        Ok(lock(&self.state)?
            .tenant
            .iter()
            .filter(|row| row.tenant_id == tenant_id)
            .cloned()
            .collect())
    }

    async fn tenant_feature(
        &self,
        tenant_id: TenantId,
        key: CapabilityKey,
    ) -> AppResult<Option<TenantFeatureRecord>> {
        Ok(lock(&self.state)?
            .features
            .iter()
            .find(|row| row.tenant_id == tenant_id && row.key == key)
            .cloned())
    }

    async fn set_tenant_feature(&self, record: TenantFeatureRecord) -> AppResult<()> {
        let mut state = lock(&self.state)?;
        state
            .features
            .retain(|row| !(row.tenant_id == record.tenant_id && row.key == record.key));
        state.features.push(record);
        Ok(())
    }

    async fn list_tenant_features(
        &self,
        tenant_id: TenantId,
    ) -> AppResult<Vec<TenantFeatureRecord>> {
        Ok(lock(&self.state)?
            .features
            .iter()
            .filter(|row| row.tenant_id == tenant_id)
            .cloned()
            .collect())
    }

    async fn user_state(
        &self,
        user_id: UserId,
        key: CapabilityKey,
    ) -> AppResult<Option<UserCapabilityState>> {
        Ok(lock(&self.state)?
            .users
            .iter()
            .find(|row| row.user_id == user_id && row.key == key)
            .cloned())
    }

    async fn set_user_state(&self, user_state: UserCapabilityState) -> AppResult<()> {
        let mut state = lock(&self.state)?;
        state
            .users
            .retain(|row| !(row.user_id == user_state.user_id && row.key == user_state.key));
        state.users.push(user_state);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// RBAC repository
// ---------------------------------------------------------------------------

#[derive(Default)]
struct RbacState {
    roles: Vec<RoleRecord>,
    permissions: Vec<PermissionRecord>,
    role_permissions: Vec<(Uuid, Uuid)>,
    assignments: Vec<(UserId, Uuid)>,
}

pub(crate) struct FakeRbacRepository {
    state: Mutex<RbacState>,
}

impl FakeRbacRepository {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(RbacState::default()),
        }
    }

    fn lock(&self) -> AppResult<MutexGuard<'_, RbacState>> {
        self.state
            .lock()
            .map_err(|_| AppError::Internal("lock poisoned".to_owned()))
    }
}

#[async_trait]
impl RbacReader for FakeRbacRepository {
    async fn role_names_for_user(&self, user_id: UserId) -> AppResult<Vec<String>> {
        let state = self.lock()?;
        Ok(state
            .assignments
            .iter()
            .filter(|(assignee, _)| *assignee == user_id)
            .filter_map(|(_, role_id)| {
                state
                    .roles
                    .iter()
                    .find(|role| role.id == *role_id && !role.is_system)
                    .map(|role| role.name.clone())
            })
            .collect())
    }

    async fn permission_keys_for_user(&self, user_id: UserId) -> AppResult<Vec<String>> {
        let state = self.lock()?;
        let mut keys: Vec<String> = state
            .assignments
            .iter()
            .filter(|(assignee, _)| *assignee == user_id)
            .flat_map(|(_, role_id)| {
                state
                    .role_permissions
                    .iter()
                    .filter(|(attached_role, _)| attached_role == role_id)
                    .filter_map(|(_, permission_id)| {
                        state
                            .permissions
                            .iter()
                            .find(|permission| permission.id == *permission_id)
                            .map(PermissionRecord::key)
                    })
                    .collect::<Vec<String>>()
            })
            .collect();
        keys.sort();
        keys.dedup();
        Ok(keys)
    }

    async fn system_role_names_for_user(&self, user_id: UserId) -> AppResult<Vec<String>> {
        let state = self.lock()?;
        Ok(state
            .assignments
            .iter()
            .filter(|(assignee, _)| *assignee == user_id)
            .filter_map(|(_, role_id)| {
                state
                    .roles
                    .iter()
                    .find(|role| role.id == *role_id && role.is_system)
                    .map(|role| role.name.clone())
            })
            .collect())
    }

    async fn system_permission_keys_for_user(&self, user_id: UserId) -> AppResult<Vec<String>> {
        // System roles in the fake carry their permission keys in the
        // description, comma separated.
        let state = self.lock()?;
        let mut keys: Vec<String> = state
            .assignments
            .iter()
            .filter(|(assignee, _)| *assignee == user_id)
            .filter_map(|(_, role_id)| {
                state
                    .roles
                    .iter()
                    .find(|role| role.id == *role_id && role.is_system)
                    .and_then(|role| role.description.clone())
            })
            .flat_map(|description| {
                description
                    .split(',')
                    .map(str::to_owned)
                    .collect::<Vec<String>>()
            })
            .collect();
        keys.sort();
        keys.dedup();
        Ok(keys)
    }
}

#[async_trait]
impl RbacRepository for FakeRbacRepository {
    async fn create_role(&self, role: NewRole) -> AppResult<Uuid> {
        let mut state = self.lock()?;
        if state
            .roles
            .iter()
            .any(|existing| existing.tenant_id == role.tenant_id && existing.name == role.name)
        {
            return Err(AppError::Conflict("role name already exists".to_owned()));
        }

        let id = Uuid::new_v4();
        state.roles.push(RoleRecord {
            id,
            tenant_id: role.tenant_id,
            name: role.name,
            description: role.description,
            is_system: role.is_system,
            created_at: Utc::now(),
        });
        Ok(id)
    }

    async fn find_role(&self, role_id: Uuid) -> AppResult<Option<RoleRecord>> {
        let state = self.lock()?;
        Ok(state.roles.iter().find(|role| role.id == role_id).cloned())
    }

    async fn find_role_by_name(
        &self,
        tenant_id: Option<TenantId>,
        name: &str,
    ) -> AppResult<Option<RoleRecord>> {
        let state = self.lock()?;
        Ok(state
            .roles
            .iter()
            .find(|role| role.tenant_id == tenant_id && role.name == name)
            .cloned())
    }

    async fn list_roles(&self, tenant_id: Option<TenantId>) -> AppResult<Vec<RoleRecord>> {
        let state = self.lock()?;
        Ok(state
            .roles
            .iter()
            .filter(|role| role.tenant_id == tenant_id)
            .cloned()
            .collect())
    }

    async fn update_role(&self, role_id: Uuid, description: Option<&str>) -> AppResult<()> {
        let mut state = self.lock()?;
        if let Some(role) = state.roles.iter_mut().find(|role| role.id == role_id) {
            role.description = description.map(str::to_owned);
        }
        Ok(())
    }

    async fn delete_role(&self, role_id: Uuid) -> AppResult<()> {
        let mut state = self.lock()?;
        state.roles.retain(|role| role.id != role_id);
        state.assignments.retain(|(_, assigned)| *assigned != role_id);
        state
            .role_permissions
            .retain(|(attached_role, _)| *attached_role != role_id);
        Ok(())
    }

    async fn create_permission(&self, permission: NewPermission) -> AppResult<Uuid> {
        let mut state = self.lock()?;
        let id = Uuid::new_v4();
        state.permissions.push(PermissionRecord {
            id,
            tenant_id: permission.tenant_id,
            resource: permission.resource,
            action: permission.action,
            description: permission.description,
        });
        Ok(id)
    }

    async fn find_permission(&self, permission_id: Uuid) -> AppResult<Option<PermissionRecord>> {
        let state = self.lock()?;
        Ok(state
            .permissions
            .iter()
            .find(|permission| permission.id == permission_id)
            .cloned())
    }

    async fn list_permissions(
        &self,
        tenant_id: Option<TenantId>,
    ) -> AppResult<Vec<PermissionRecord>> {
        let state = self.lock()?;
        Ok(state
            .permissions
            .iter()
            .filter(|permission| permission.tenant_id == tenant_id)
            .cloned()
            .collect())
    }

    async fn delete_permission(&self, permission_id: Uuid) -> AppResult<()> {
        let mut state = self.lock()?;
        state
            .permissions
            .retain(|permission| permission.id != permission_id);
        state
            .role_permissions
            .retain(|(_, attached)| *attached != permission_id);
        Ok(())
    }

    async fn attach_permission(&self, role_id: Uuid, permission_id: Uuid) -> AppResult<()> {
        let mut state = self.lock()?;
        state.role_permissions.push((role_id, permission_id));
        Ok(())
    }

    async fn assign_role(&self, user_id: UserId, role_id: Uuid) -> AppResult<()> {
        let mut state = self.lock()?;
        if !state
            .assignments
            .iter()
            .any(|(assignee, assigned)| *assignee == user_id && *assigned == role_id)
        {
            state.assignments.push((user_id, role_id));
        }
        Ok(())
    }

    async fn unassign_role(&self, user_id: UserId, role_id: Uuid) -> AppResult<()> {
        let mut state = self.lock()?;
        state
            .assignments
            .retain(|(assignee, assigned)| !(*assignee == user_id && *assigned == role_id));
        Ok(())
    }

    async fn count_assignments(&self, role_id: Uuid) -> AppResult<i64> {
        let state = self.lock()?;
        Ok(state
            .assignments
            .iter()
            .filter(|(_, assigned)| *assigned == role_id)
            .count() as i64)
    }

    async fn ensure_system_role(&self, name: &str, permissions: &[&str]) -> AppResult<Uuid> {
        {
            let state = self.lock()?;
            if let Some(role) = state
                .roles
                .iter()
                .find(|role| role.is_system && role.name == name)
            {
                return Ok(role.id);
            }
        }

        self.create_role(NewRole {
            tenant_id: None,
            name: name.to_owned(),
            description: Some(permissions.join(",")),
            is_system: true,
        })
        .await
    }
}


