use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;

use clavis_core::{AppError, TenantId};
use clavis_domain::{AccessTokenClaims, CapabilityKey, TenantStatus, UserStatus};

use crate::audit_service::{AuditContext, AuditService};
use crate::capability_service::{
    CapabilityRepository, CapabilityService, SystemCapabilityRecord, TenantFeatureRecord,
};
use crate::mfa_service::{MfaService, SecretEncryptor, TotpProvider};
use crate::rbac_service::RbacService;
use crate::tenant_service::{TenantRepository, TenantService};
use crate::test_support::{
    FakeAuditRepository, FakeBlacklist, FakeCapabilityRepository, FakeChallengeRepository,
    FakePasswordHasher, FakeRbacRepository, FakeRefreshTokenRepository, FakeSettingsRepository,
    FakeSigner, FakeTenantRepository, FakeUserRepository, make_user,
};
use crate::token_service::TokenService;
use crate::user_service::UserRecord;

use super::*;

const VALID_TOTP_CODE: &str = "123456";
const TOTP_SECRET: &[u8] = b"totp-secret";

struct FixedTotpProvider;

#[async_trait]
impl TotpProvider for FixedTotpProvider {
    fn generate_secret(&self, _account_name: &str) -> AppResult<(Vec<u8>, String, String)> {
        Ok((
            TOTP_SECRET.to_vec(),
            "BASE32SECRET".to_owned(),
            "otpauth://totp/clavis:test".to_owned(),
        ))
    }

    fn verify_code(&self, secret_bytes: &[u8], code: &str) -> AppResult<bool> {
        Ok(secret_bytes == TOTP_SECRET && code == VALID_TOTP_CODE)
    }
}

struct PrefixEncryptor;

#[async_trait]
impl SecretEncryptor for PrefixEncryptor {
    fn encrypt(&self, plaintext: &[u8]) -> AppResult<Vec<u8>> {
        let mut out = b"enc:".to_vec();
        out.extend_from_slice(plaintext);
        Ok(out)
    }

    fn decrypt(&self, ciphertext: &[u8]) -> AppResult<Vec<u8>> {
        ciphertext
            .strip_prefix(b"enc:")
            .map(<[u8]>::to_vec)
            .ok_or_else(|| AppError::Internal("bad ciphertext".to_owned()))
    }
}

struct Harness {
    service: AuthService,
    users: Arc<FakeUserRepository>,
    tenants: Arc<FakeTenantRepository>,
    challenges: Arc<FakeChallengeRepository>,
    capabilities: Arc<FakeCapabilityRepository>,
}

fn harness() -> Harness {
    harness_with_capabilities(FakeCapabilityRepository::new())
}

fn harness_with_capabilities(capabilities: FakeCapabilityRepository) -> Harness {
    let users = Arc::new(FakeUserRepository::new());
    let hasher = Arc::new(FakePasswordHasher);
    let challenges = Arc::new(FakeChallengeRepository::new());
    let tenants = Arc::new(FakeTenantRepository::new());
    let settings = Arc::new(FakeSettingsRepository::new());
    let capability_repository = Arc::new(capabilities);
    let rbac_repository = Arc::new(FakeRbacRepository::new());
    let audit_repository = Arc::new(FakeAuditRepository::new());
    let refresh = Arc::new(FakeRefreshTokenRepository::new());

    let audit = AuditService::new(audit_repository);
    let capabilities = CapabilityService::new(capability_repository.clone(), audit.clone());
    let rbac = RbacService::new(rbac_repository.clone(), audit.clone());
    let tenant_service = TenantService::new(
        tenants.clone(),
        settings.clone(),
        rbac,
        capabilities.clone(),
        audit.clone(),
    );
    let tokens = TokenService::new(
        refresh,
        Arc::new(FakeSigner),
        Arc::new(FakeBlacklist::new()),
        users.clone(),
        rbac_repository,
        settings,
        audit.clone(),
    );
    let mfa = MfaService::new(
        users.clone(),
        hasher.clone(),
        Arc::new(FixedTotpProvider),
        Arc::new(PrefixEncryptor),
        capability_repository.clone(),
        audit.clone(),
    );

    let service = AuthService::new(
        users.clone(),
        hasher,
        challenges.clone(),
        tenant_service,
        capabilities,
        mfa,
        tokens,
        audit,
    );

    Harness {
        service,
        users,
        tenants,
        challenges,
        capabilities: capability_repository,
    }
}

fn enrolled_user(tenant_id: TenantId) -> UserRecord {
    let mut user = make_user(Some(tenant_id), "alice");
    user.mfa_enabled = true;
    user.totp_confirmed = true;
    user.totp_secret_enc = Some({
        let mut enc = b"enc:".to_vec();
        enc.extend_from_slice(TOTP_SECRET);
        enc
    });
    user
}

fn decode(token: &str) -> AccessTokenClaims {
    serde_json::from_str(token).unwrap_or_else(|_| panic!("claims"))
}

#[tokio::test]
async fn password_only_login_issues_tokens_with_pwd_amr() {
    let harness = harness();
    let tenant_id = TenantId::new();
    harness.tenants.insert_active(tenant_id);
    harness.users.insert(make_user(Some(tenant_id), "alice"));

    let outcome = harness
        .service
        .authenticate(
            &AuditContext::default(),
            Some(tenant_id),
            "alice",
            "Correct-Horse-42",
            false,
        )
        .await
        .unwrap_or_else(|_| panic!("login"));

    let LoginOutcome::TokensIssued(pair) = outcome else {
        panic!("expected tokens");
    };
    assert!(!pair.mfa_verified);
    assert_eq!(decode(&pair.access_token).amr, vec!["pwd".to_owned()]);
}

#[tokio::test]
async fn unknown_user_and_wrong_password_fail_generically() {
    let harness = harness();
    let tenant_id = TenantId::new();
    harness.tenants.insert_active(tenant_id);
    let user = make_user(Some(tenant_id), "alice");
    harness.users.insert(user.clone());
    let context = AuditContext::default();

    let unknown = harness
        .service
        .authenticate(&context, Some(tenant_id), "nobody", "whatever-long", false)
        .await;
    assert!(matches!(unknown, Err(AppError::InvalidCredentials)));

    let wrong = harness
        .service
        .authenticate(&context, Some(tenant_id), "alice", "Wrong-Horse-42", false)
        .await;
    assert!(matches!(wrong, Err(AppError::InvalidCredentials)));

    let stored = harness.users.get(user.id).unwrap_or_else(|| panic!("user"));
    assert_eq!(stored.failed_attempt_count, 1);
}

#[tokio::test]
async fn repeated_failures_lock_the_account() {
    let harness = harness();
    let tenant_id = TenantId::new();
    harness.tenants.insert_active(tenant_id);
    let user = make_user(Some(tenant_id), "alice");
    harness.users.insert(user.clone());
    let context = AuditContext::default();

    for _ in 0..MFA_FAILURE_LOCK_THRESHOLD {
        let result = harness
            .service
            .authenticate(&context, Some(tenant_id), "alice", "Wrong-Horse-42", false)
            .await;
        assert!(result.is_err());
    }

    let stored = harness.users.get(user.id).unwrap_or_else(|| panic!("user"));
    assert_eq!(stored.status, UserStatus::Locked);

    // A locked account rejects even the correct password, generically.
    let result = harness
        .service
        .authenticate(&context, Some(tenant_id), "alice", "Correct-Horse-42", false)
        .await;
    assert!(matches!(result, Err(AppError::InvalidCredentials)));
}

#[tokio::test]
async fn suspended_tenant_blocks_authentication() {
    let harness = harness();
    let tenant_id = TenantId::new();
    harness.tenants.insert_active(tenant_id);
    harness.users.insert(make_user(Some(tenant_id), "alice"));

    let suspended = harness.tenants.set_status(tenant_id, TenantStatus::Suspended).await;
    assert!(suspended.is_ok());

    let result = harness
        .service
        .authenticate(
            &AuditContext::default(),
            Some(tenant_id),
            "alice",
            "Correct-Horse-42",
            false,
        )
        .await;
    assert!(matches!(result, Err(AppError::InvalidCredentials)));
}

#[tokio::test]
async fn mfa_login_issues_no_tokens_before_verification() {
    let harness = harness();
    let tenant_id = TenantId::new();
    harness.tenants.insert_active(tenant_id);
    harness.users.insert(enrolled_user(tenant_id));
    let context = AuditContext::default();

    let outcome = harness
        .service
        .authenticate(&context, Some(tenant_id), "alice", "Correct-Horse-42", false)
        .await
        .unwrap_or_else(|_| panic!("login"));

    let LoginOutcome::MfaRequired { challenge_id } = outcome else {
        panic!("expected a challenge");
    };

    let pair = harness
        .service
        .verify_challenge(&context, challenge_id, VALID_TOTP_CODE)
        .await
        .unwrap_or_else(|_| panic!("verify"));

    assert!(pair.mfa_verified);
    let claims = decode(&pair.access_token);
    assert_eq!(claims.amr, vec!["pwd".to_owned(), "mfa".to_owned()]);
    assert_eq!(claims.acr, "mfa");

    // The challenge is single-use.
    let replay = harness
        .service
        .verify_challenge(&context, challenge_id, VALID_TOTP_CODE)
        .await;
    assert!(matches!(replay, Err(AppError::InvalidCode)));
}

#[tokio::test]
async fn wrong_mfa_code_consumes_the_challenge() {
    let harness = harness();
    let tenant_id = TenantId::new();
    harness.tenants.insert_active(tenant_id);
    harness.users.insert(enrolled_user(tenant_id));
    let context = AuditContext::default();

    let outcome = harness
        .service
        .authenticate(&context, Some(tenant_id), "alice", "Correct-Horse-42", false)
        .await
        .unwrap_or_else(|_| panic!("login"));
    let LoginOutcome::MfaRequired { challenge_id } = outcome else {
        panic!("expected a challenge");
    };

    let result = harness
        .service
        .verify_challenge(&context, challenge_id, "000000")
        .await;
    assert!(matches!(result, Err(AppError::InvalidCode)));

    let retry = harness
        .service
        .verify_challenge(&context, challenge_id, VALID_TOTP_CODE)
        .await;
    assert!(matches!(retry, Err(AppError::InvalidCode)));
}

#[tokio::test]
async fn expired_challenge_is_rejected() {
    let harness = harness();
    let tenant_id = TenantId::new();
    harness.tenants.insert_active(tenant_id);
    let user = enrolled_user(tenant_id);
    harness.users.insert(user.clone());

    let challenge_id = harness
        .challenges
        .create(user.id, false, Utc::now() - chrono::Duration::seconds(1))
        .await
        .unwrap_or_else(|_| panic!("challenge"));

    let result = harness
        .service
        .verify_challenge(&AuditContext::default(), challenge_id, VALID_TOTP_CODE)
        .await;
    assert!(matches!(result, Err(AppError::InvalidCode)));
}

#[tokio::test]
async fn system_principal_with_authenticator_is_always_challenged() {
    let harness = harness();
    let mut root = make_user(None, "root");
    root.mfa_enabled = false;
    root.totp_confirmed = true;
    root.totp_secret_enc = Some({
        let mut enc = b"enc:".to_vec();
        enc.extend_from_slice(TOTP_SECRET);
        enc
    });
    harness.users.insert(root);

    let outcome = harness
        .service
        .authenticate(&AuditContext::default(), None, "root", "Correct-Horse-42", false)
        .await
        .unwrap_or_else(|_| panic!("login"));

    assert!(matches!(outcome, LoginOutcome::MfaRequired { .. }));
}

#[tokio::test]
async fn tenant_mandated_mfa_challenges_enrolled_users() {
    let capabilities = FakeCapabilityRepository::new().with_system(SystemCapabilityRecord {
        key: CapabilityKey::Mfa,
        enabled: true,
        default_value: None,
        default_entitled: true,
        description: "Multi-factor authentication".to_owned(),
    });
    let harness = harness_with_capabilities(capabilities);
    let tenant_id = TenantId::new();
    harness.tenants.insert_active(tenant_id);

    let mandated = harness
        .capabilities
        .set_tenant_feature(TenantFeatureRecord {
            tenant_id,
            key: CapabilityKey::Mfa,
            enabled: true,
            configuration: Some(serde_json::json!({ "required": true })),
        })
        .await;
    assert!(mandated.is_ok());

    // Enrolled, but without the per-user flag: the tenant mandate still
    // forces the challenge.
    let mut user = enrolled_user(tenant_id);
    user.mfa_enabled = false;
    harness.users.insert(user);

    let outcome = harness
        .service
        .authenticate(
            &AuditContext::default(),
            Some(tenant_id),
            "alice",
            "Correct-Horse-42",
            false,
        )
        .await
        .unwrap_or_else(|_| panic!("login"));

    assert!(matches!(outcome, LoginOutcome::MfaRequired { .. }));
}

#[tokio::test]
async fn remember_me_survives_the_mfa_challenge() {
    let harness = harness();
    let tenant_id = TenantId::new();
    harness.tenants.insert_active(tenant_id);
    harness.users.insert(enrolled_user(tenant_id));
    let context = AuditContext::default();

    let outcome = harness
        .service
        .authenticate(&context, Some(tenant_id), "alice", "Correct-Horse-42", true)
        .await
        .unwrap_or_else(|_| panic!("login"));
    let LoginOutcome::MfaRequired { challenge_id } = outcome else {
        panic!("expected a challenge");
    };

    let pair = harness
        .service
        .verify_challenge(&context, challenge_id, VALID_TOTP_CODE)
        .await;
    assert!(pair.is_ok());
}
