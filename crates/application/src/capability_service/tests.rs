use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use serde_json::json;

use clavis_core::{AppError, AppResult, TenantId};
use clavis_domain::{CapabilityKey, UserId};

use crate::audit_service::AuditService;
use crate::test_support::FakeAuditRepository;

use super::*;

#[derive(Default)]
struct State {
    system: Vec<SystemCapabilityRecord>,
    tenant: Vec<TenantCapabilityRecord>,
    features: Vec<TenantFeatureRecord>,
    users: Vec<UserCapabilityState>,
}

pub(crate) struct FakeCapabilityRepository {
    state: Mutex<State>,
}

impl FakeCapabilityRepository {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
        }
    }

    pub(crate) fn with_system(self, record: SystemCapabilityRecord) -> Self {
        if let Ok(mut state) = self.state.lock() {
            state.system.push(record);
        }
        self
    }

    fn lock(&self) -> AppResult<MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|_| AppError::Internal("lock poisoned".to_owned()))
    }
}

#[async_trait]
impl CapabilityRepository for FakeCapabilityRepository {
    async fn system_capability(
        &self,
        key: CapabilityKey,
    ) -> AppResult<Option<SystemCapabilityRecord>> {
        let state = self.lock()?;
        Ok(state.system.iter().find(|row| row.key == key).cloned())
    }

    async fn list_system_capabilities(&self) -> AppResult<Vec<SystemCapabilityRecord>> {
        let state = self.lock()?;
        Ok(state.system.clone())
    }

    async fn tenant_capability(
        &self,
        tenant_id: TenantId,
        key: CapabilityKey,
    ) -> AppResult<Option<TenantCapabilityRecord>> {
        let state = self.lock()?;
        Ok(state
            .tenant
            .iter()
            .find(|row| row.tenant_id == tenant_id && row.key == key)
            .cloned())
    }

    async fn set_tenant_capability(&self, record: TenantCapabilityRecord) -> AppResult<()> {
        let mut state = self.lock()?;
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
        let state = self.lock()?;
        Ok(state
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
        let state = self.lock()?;
        Ok(state
            .features
            .iter()
            .find(|row| row.tenant_id == tenant_id && row.key == key)
            .cloned())
    }

    async fn set_tenant_feature(&self, record: TenantFeatureRecord) -> AppResult<()> {
        let mut state = self.lock()?;
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
        let state = self.lock()?;
        Ok(state
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
        let state = self.lock()?;
        Ok(state
            .users
            .iter()
            .find(|row| row.user_id == user_id && row.key == key)
            .cloned())
    }

    async fn set_user_state(&self, user_state: UserCapabilityState) -> AppResult<()> {
        let mut state = self.lock()?;
        state
            .users
            .retain(|row| !(row.user_id == user_state.user_id && row.key == user_state.key));
        state.users.push(user_state);
        Ok(())
    }
}

fn totp_platform() -> SystemCapabilityRecord {
    SystemCapabilityRecord {
        key: CapabilityKey::Totp,
        enabled: true,
        default_value: None,
        default_entitled: false,
        description: "TOTP authenticators".to_owned(),
    }
}

fn service_with(repository: Arc<FakeCapabilityRepository>) -> CapabilityService {
    CapabilityService::new(repository, AuditService::new(Arc::new(FakeAuditRepository::new())))
}

#[tokio::test]
async fn unsupported_capability_fails_first_gate() {
    let repository = Arc::new(FakeCapabilityRepository::new());
    let service = service_with(repository);

    let result = service
        .resolve(Some(TenantId::new()), None, CapabilityKey::Totp)
        .await;
    assert!(matches!(result, Err(AppError::CapabilityNotSupported(_))));
}

#[tokio::test]
async fn missing_entitlement_fails_second_gate() {
    let repository = Arc::new(FakeCapabilityRepository::new().with_system(totp_platform()));
    let service = service_with(repository);

    let result = service
        .resolve(Some(TenantId::new()), None, CapabilityKey::Totp)
        .await;
    assert!(matches!(result, Err(AppError::CapabilityNotSupported(_))));
}

#[tokio::test]
async fn default_entitlement_applies_when_system_permits() {
    let mut platform = totp_platform();
    platform.default_entitled = true;
    let repository = Arc::new(FakeCapabilityRepository::new().with_system(platform));
    let service = service_with(repository.clone());
    let tenant_id = TenantId::new();

    // Entitled by default, but the tenant has not turned the feature on.
    let result = service.resolve(Some(tenant_id), None, CapabilityKey::Totp).await;
    assert!(matches!(result, Err(AppError::CapabilityNotSupported(_))));

    let enabled = repository
        .set_tenant_feature(TenantFeatureRecord {
            tenant_id,
            key: CapabilityKey::Totp,
            enabled: true,
            configuration: None,
        })
        .await;
    assert!(enabled.is_ok());

    let result = service.resolve(Some(tenant_id), None, CapabilityKey::Totp).await;
    assert!(result.is_ok());
}

#[tokio::test]
async fn unenrolled_user_fails_fourth_gate() {
    let mut platform = totp_platform();
    platform.default_entitled = true;
    let repository = Arc::new(FakeCapabilityRepository::new().with_system(platform));
    let tenant_id = TenantId::new();
    let enabled = repository
        .set_tenant_feature(TenantFeatureRecord {
            tenant_id,
            key: CapabilityKey::Totp,
            enabled: true,
            configuration: None,
        })
        .await;
    assert!(enabled.is_ok());

    let service = service_with(repository.clone());
    let user_id = UserId::new();

    let result = service
        .resolve(Some(tenant_id), Some(user_id), CapabilityKey::Totp)
        .await;
    assert!(matches!(result, Err(AppError::EnrollmentRequired(_))));

    let enrolled = repository
        .set_user_state(UserCapabilityState {
            user_id,
            key: CapabilityKey::Totp,
            enrolled: true,
            state_data: None,
            enrolled_at: Some(chrono::Utc::now()),
            last_used_at: None,
        })
        .await;
    assert!(enrolled.is_ok());

    let result = service
        .resolve(Some(tenant_id), Some(user_id), CapabilityKey::Totp)
        .await;
    assert!(result.is_ok());
}

#[tokio::test]
async fn entitlement_value_over_bound_is_rejected() {
    let platform = SystemCapabilityRecord {
        key: CapabilityKey::MaxTokenTtl,
        enabled: true,
        default_value: Some(json!(259_200)),
        default_entitled: true,
        description: "Token TTL ceiling".to_owned(),
    };
    let repository = Arc::new(FakeCapabilityRepository::new().with_system(platform));
    let service = service_with(repository);
    let context = AuditContext::default();

    let result = service
        .entitle_tenant(
            &context,
            TenantId::new(),
            CapabilityKey::MaxTokenTtl,
            true,
            Some(json!(500_000)),
        )
        .await;
    assert!(matches!(result, Err(AppError::CapabilityBoundViolation(_))));
}

#[tokio::test]
async fn values_narrow_through_the_layers() {
    let platform = SystemCapabilityRecord {
        key: CapabilityKey::MaxTokenTtl,
        enabled: true,
        default_value: Some(json!(259_200)),
        default_entitled: true,
        description: "Token TTL ceiling".to_owned(),
    };
    let repository = Arc::new(FakeCapabilityRepository::new().with_system(platform));
    let tenant_id = TenantId::new();

    let entitled = repository
        .set_tenant_capability(TenantCapabilityRecord {
            tenant_id,
            key: CapabilityKey::MaxTokenTtl,
            enabled: true,
            value: Some(json!(10_080)),
        })
        .await;
    assert!(entitled.is_ok());

    let service = service_with(repository);
    let ceiling = service.max_token_ttl_minutes(tenant_id).await;
    assert_eq!(ceiling.ok(), Some(10_080));
}

#[tokio::test]
async fn feature_configuration_cannot_exceed_entitlement() {
    let platform = SystemCapabilityRecord {
        key: CapabilityKey::AllowedGrantTypes,
        enabled: true,
        default_value: Some(json!(["authorization_code", "refresh_token"])),
        default_entitled: true,
        description: "Grant types".to_owned(),
    };
    let repository = Arc::new(FakeCapabilityRepository::new().with_system(platform));
    let service = service_with(repository);
    let context = AuditContext::default();

    let result = service
        .set_feature(
            &context,
            TenantId::new(),
            CapabilityKey::AllowedGrantTypes,
            true,
            Some(json!(["implicit"])),
        )
        .await;
    assert!(matches!(result, Err(AppError::CapabilityBoundViolation(_))));
}
