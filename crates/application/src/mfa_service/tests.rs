use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;

use clavis_core::{AppError, AppResult, TenantId};
use clavis_domain::CapabilityKey;

use crate::audit_service::{AuditContext, AuditService};
use crate::capability_service::CapabilityRepository;
use crate::test_support::{
    FakeAuditRepository, FakeCapabilityRepository, FakePasswordHasher, FakeUserRepository,
    make_user,
};

use super::recovery_codes::RECOVERY_CODE_COUNT;
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
    service: MfaService,
    users: Arc<FakeUserRepository>,
    capabilities: Arc<FakeCapabilityRepository>,
}

fn harness() -> Harness {
    let users = Arc::new(FakeUserRepository::new());
    let capabilities = Arc::new(FakeCapabilityRepository::new());

    let service = MfaService::new(
        users.clone(),
        Arc::new(FakePasswordHasher),
        Arc::new(FixedTotpProvider),
        Arc::new(PrefixEncryptor),
        capabilities.clone(),
        AuditService::new(Arc::new(FakeAuditRepository::new())),
    );

    Harness {
        service,
        users,
        capabilities,
    }
}

#[tokio::test]
async fn enrollment_stays_inactive_until_confirmed() {
    let harness = harness();
    let user = make_user(Some(TenantId::new()), "alice");
    harness.users.insert(user.clone());
    let context = AuditContext::default();

    let enrollment = harness
        .service
        .start_enrollment(user.id)
        .await
        .unwrap_or_else(|_| panic!("enrollment"));
    assert_eq!(enrollment.recovery_codes.len(), RECOVERY_CODE_COUNT);
    assert_eq!(enrollment.secret_base32, "BASE32SECRET");

    let stored = harness.users.get(user.id).unwrap_or_else(|| panic!("user"));
    assert!(!stored.totp_confirmed);
    assert!(!stored.mfa_enabled);
    assert!(stored.totp_secret_enc.is_some());

    let wrong = harness
        .service
        .confirm_enrollment(&context, user.id, "000000")
        .await;
    assert!(matches!(wrong, Err(AppError::InvalidCode)));

    let confirmed = harness
        .service
        .confirm_enrollment(&context, user.id, VALID_TOTP_CODE)
        .await;
    assert!(confirmed.is_ok());

    let stored = harness.users.get(user.id).unwrap_or_else(|| panic!("user"));
    assert!(stored.totp_confirmed);
    assert!(stored.mfa_enabled);

    let state = harness
        .capabilities
        .user_state(user.id, CapabilityKey::Totp)
        .await
        .unwrap_or_default();
    assert!(state.is_some_and(|state| state.enrolled));
}

#[tokio::test]
async fn second_enrollment_is_rejected() {
    let harness = harness();
    let mut user = make_user(Some(TenantId::new()), "alice");
    user.totp_confirmed = true;
    harness.users.insert(user.clone());

    let result = harness.service.start_enrollment(user.id).await;
    assert!(matches!(result, Err(AppError::Conflict(_))));
}

#[tokio::test]
async fn totp_code_cannot_be_replayed_inside_its_window() {
    let harness = harness();
    let mut user = make_user(Some(TenantId::new()), "alice");
    user.totp_confirmed = true;
    user.mfa_enabled = true;
    user.totp_secret_enc = Some({
        let mut enc = b"enc:".to_vec();
        enc.extend_from_slice(TOTP_SECRET);
        enc
    });
    harness.users.insert(user.clone());

    let first = harness
        .service
        .verify_code(&user, VALID_TOTP_CODE)
        .await
        .unwrap_or(false);
    assert!(first);

    // The step was consumed; the same code inside the window is a replay.
    let stored = harness.users.get(user.id).unwrap_or_else(|| panic!("user"));
    assert_eq!(stored.totp_last_step, Some(Utc::now().timestamp() / 30));

    let replay = harness
        .service
        .verify_code(&stored, VALID_TOTP_CODE)
        .await
        .unwrap_or(true);
    assert!(!replay);
}

#[tokio::test]
async fn recovery_code_is_single_use() {
    let harness = harness();
    let user = make_user(Some(TenantId::new()), "alice");
    harness.users.insert(user.clone());
    let context = AuditContext::default();

    let enrollment = harness
        .service
        .start_enrollment(user.id)
        .await
        .unwrap_or_else(|_| panic!("enrollment"));
    let confirmed = harness
        .service
        .confirm_enrollment(&context, user.id, VALID_TOTP_CODE)
        .await;
    assert!(confirmed.is_ok());

    let recovery_code = enrollment.recovery_codes[0].clone();
    let stored = harness.users.get(user.id).unwrap_or_else(|| panic!("user"));

    // Not a valid TOTP code, so the recovery path consumes it.
    let first = harness
        .service
        .verify_code(&stored, &recovery_code)
        .await
        .unwrap_or(false);
    assert!(first);

    let stored = harness.users.get(user.id).unwrap_or_else(|| panic!("user"));
    assert_eq!(stored.recovery_code_hashes.len(), RECOVERY_CODE_COUNT - 1);

    let replay = harness
        .service
        .verify_code(&stored, &recovery_code)
        .await
        .unwrap_or(true);
    assert!(!replay);
}

#[tokio::test]
async fn disabling_totp_requires_the_password() {
    let harness = harness();
    let mut user = make_user(Some(TenantId::new()), "alice");
    user.totp_confirmed = true;
    user.mfa_enabled = true;
    user.totp_secret_enc = Some(b"enc:whatever".to_vec());
    harness.users.insert(user.clone());
    let context = AuditContext::default();

    let wrong = harness
        .service
        .disable_totp(&context, user.id, "Wrong-Horse-42")
        .await;
    assert!(matches!(wrong, Err(AppError::InvalidCredentials)));

    let disabled = harness
        .service
        .disable_totp(&context, user.id, "Correct-Horse-42")
        .await;
    assert!(disabled.is_ok());

    let stored = harness.users.get(user.id).unwrap_or_else(|| panic!("user"));
    assert!(!stored.mfa_enabled);
    assert!(stored.totp_secret_enc.is_none());
}

#[tokio::test]
async fn admin_mfa_reset_requires_a_reason() {
    let harness = harness();
    let mut user = make_user(Some(TenantId::new()), "alice");
    user.totp_confirmed = true;
    user.mfa_enabled = true;
    user.totp_secret_enc = Some(b"enc:whatever".to_vec());
    harness.users.insert(user.clone());
    let context = AuditContext::default();

    let missing = harness.service.reset_totp(&context, user.id, None).await;
    assert!(matches!(missing, Err(AppError::AuditReasonRequired)));

    let stored = harness.users.get(user.id).unwrap_or_else(|| panic!("user"));
    assert!(stored.mfa_enabled);

    let reset = harness
        .service
        .reset_totp(&context, user.id, Some("lost device, helpdesk #4821".to_owned()))
        .await;
    assert!(reset.is_ok());

    let stored = harness.users.get(user.id).unwrap_or_else(|| panic!("user"));
    assert!(!stored.mfa_enabled);
    assert!(stored.totp_secret_enc.is_none());
}

#[tokio::test]
async fn regenerating_recovery_codes_replaces_the_set() {
    let harness = harness();
    let user = make_user(Some(TenantId::new()), "alice");
    harness.users.insert(user.clone());
    let context = AuditContext::default();

    let enrollment = harness
        .service
        .start_enrollment(user.id)
        .await
        .unwrap_or_else(|_| panic!("enrollment"));
    let confirmed = harness
        .service
        .confirm_enrollment(&context, user.id, VALID_TOTP_CODE)
        .await;
    assert!(confirmed.is_ok());

    let fresh = harness
        .service
        .regenerate_recovery_codes(&context, user.id, "Correct-Horse-42")
        .await
        .unwrap_or_default();
    assert_eq!(fresh.len(), RECOVERY_CODE_COUNT);

    // Old codes no longer verify.
    let stored = harness.users.get(user.id).unwrap_or_else(|| panic!("user"));
    let old = harness
        .service
        .verify_code(&stored, &enrollment.recovery_codes[0])
        .await
        .unwrap_or(true);
    assert!(!old);
}
