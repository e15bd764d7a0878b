use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use clavis_core::{AppError, AppResult, TenantId};
use clavis_domain::{AuditEventType, AuditResult};

use crate::audit_service::{AuditContext, AuditEvent, AuditService};
use crate::mfa_service::SecretEncryptor;
use crate::test_support::FakeAuditRepository;

use super::*;

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

#[derive(Default)]
struct RepositoryState {
    subscriptions: Vec<(WebhookSubscriptionRecord, Vec<u8>)>,
    deliveries: Vec<(WebhookDeliveryRecord, String, serde_json::Value)>,
}

struct FakeWebhookRepository {
    state: Mutex<RepositoryState>,
}

impl FakeWebhookRepository {
    fn new() -> Self {
        Self {
            state: Mutex::new(RepositoryState::default()),
        }
    }

    fn lock(&self) -> AppResult<MutexGuard<'_, RepositoryState>> {
        self.state
            .lock()
            .map_err(|_| AppError::Internal("lock poisoned".to_owned()))
    }

    fn stored_secret(&self, id: Uuid) -> Option<Vec<u8>> {
        self.state.lock().ok().and_then(|state| {
            state
                .subscriptions
                .iter()
                .find(|(subscription, _)| subscription.id == id)
                .map(|(_, secret)| secret.clone())
        })
    }

    fn pending_deliveries(&self) -> Vec<WebhookDeliveryRecord> {
        self.state
            .lock()
            .map(|state| {
                state
                    .deliveries
                    .iter()
                    .map(|(delivery, _, _)| delivery.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    fn force_attempt(&self, delivery_id: Uuid, attempt: i32) {
        if let Ok(mut state) = self.state.lock()
            && let Some((delivery, _, _)) = state
                .deliveries
                .iter_mut()
                .find(|(delivery, _, _)| delivery.id == delivery_id)
        {
            delivery.attempt = attempt;
        }
    }
}

#[async_trait]
impl WebhookRepository for FakeWebhookRepository {
    async fn create_subscription(&self, subscription: NewWebhookSubscription) -> AppResult<Uuid> {
        let mut state = self.lock()?;
        let id = Uuid::new_v4();
        state.subscriptions.push((
            WebhookSubscriptionRecord {
                id,
                tenant_id: subscription.tenant_id,
                name: subscription.name,
                url: subscription.url,
                event_types: subscription.event_types,
                status: WebhookStatus::Active,
                created_at: Utc::now(),
            },
            subscription.signing_secret_enc,
        ));
        Ok(id)
    }

    async fn find_subscription(&self, id: Uuid) -> AppResult<Option<WebhookSubscriptionRecord>> {
        Ok(self
            .lock()?
            .subscriptions
            .iter()
            .find(|(subscription, _)| subscription.id == id)
            .map(|(subscription, _)| subscription.clone()))
    }

    async fn list_subscriptions(
        &self,
        tenant_id: Option<TenantId>,
    ) -> AppResult<Vec<WebhookSubscriptionRecord>> {
        Ok(self
            .lock()?
            .subscriptions
            .iter()
            .filter(|(subscription, _)| subscription.tenant_id == tenant_id)
            .map(|(subscription, _)| subscription.clone())
            .collect())
    }

    async fn set_subscription_status(&self, id: Uuid, status: WebhookStatus) -> AppResult<()> {
        if let Some((subscription, _)) = self
            .lock()?
            .subscriptions
            .iter_mut()
            .find(|(subscription, _)| subscription.id == id)
        {
            subscription.status = status;
        }
        Ok(())
    }

    async fn delete_subscription(&self, id: Uuid) -> AppResult<()> {
        let mut state = self.lock()?;
        state
            .subscriptions
            .retain(|(subscription, _)| subscription.id != id);
        state
            .deliveries
            .retain(|(delivery, _, _)| delivery.webhook_id != id);
        Ok(())
    }

    async fn list_enabled_for_event(
        &self,
        tenant_id: Option<TenantId>,
        event_type: &str,
    ) -> AppResult<Vec<WebhookSubscriptionRecord>> {
        Ok(self
            .lock()?
            .subscriptions
            .iter()
            .filter(|(subscription, _)| {
                subscription.tenant_id == tenant_id
                    && subscription.status == WebhookStatus::Active
                    && subscription
                        .event_types
                        .iter()
                        .any(|subscribed| subscribed == event_type)
            })
            .map(|(subscription, _)| subscription.clone())
            .collect())
    }

    async fn enqueue_delivery(
        &self,
        webhook_id: Uuid,
        event_id: Uuid,
        event_type: &str,
        payload: &serde_json::Value,
        next_retry_at: chrono::DateTime<Utc>,
    ) -> AppResult<Uuid> {
        let mut state = self.lock()?;
        let id = Uuid::new_v4();
        state.deliveries.push((
            WebhookDeliveryRecord {
                id,
                webhook_id,
                event_id,
                attempt: 0,
                status: DeliveryStatus::Pending,
                response_code: None,
                next_retry_at: Some(next_retry_at),
                delivered_at: None,
                created_at: Utc::now(),
            },
            event_type.to_owned(),
            payload.clone(),
        ));
        Ok(id)
    }

    async fn claim_due_deliveries(
        &self,
        now: chrono::DateTime<Utc>,
        limit: u32,
    ) -> AppResult<Vec<DueDelivery>> {
        let state = self.lock()?;
        Ok(state
            .deliveries
            .iter()
            .filter(|(delivery, _, _)| {
                delivery.status == DeliveryStatus::Pending
                    && delivery.next_retry_at.is_some_and(|due| due <= now)
            })
            .take(limit as usize)
            .filter_map(|(delivery, event_type, payload)| {
                state
                    .subscriptions
                    .iter()
                    .find(|(subscription, _)| subscription.id == delivery.webhook_id)
                    .map(|(subscription, secret)| DueDelivery {
                        delivery: delivery.clone(),
                        url: subscription.url.clone(),
                        signing_secret_enc: secret.clone(),
                        event_type: event_type.clone(),
                        payload: payload.clone(),
                    })
            })
            .collect())
    }

    async fn mark_delivery(
        &self,
        id: Uuid,
        status: DeliveryStatus,
        attempt: i32,
        response_code: Option<i32>,
        next_retry_at: Option<chrono::DateTime<Utc>>,
        delivered_at: Option<chrono::DateTime<Utc>>,
    ) -> AppResult<()> {
        if let Some((delivery, _, _)) = self
            .lock()?
            .deliveries
            .iter_mut()
            .find(|(delivery, _, _)| delivery.id == id)
        {
            delivery.status = status;
            delivery.attempt = attempt;
            delivery.response_code = response_code;
            delivery.next_retry_at = next_retry_at;
            delivery.delivered_at = delivered_at;
        }
        Ok(())
    }

    async fn list_deliveries(
        &self,
        webhook_id: Uuid,
        _page: u32,
        _page_size: u32,
    ) -> AppResult<Vec<WebhookDeliveryRecord>> {
        Ok(self
            .lock()?
            .deliveries
            .iter()
            .filter(|(delivery, _, _)| delivery.webhook_id == webhook_id)
            .map(|(delivery, _, _)| delivery.clone())
            .collect())
    }
}

#[derive(Debug, Clone)]
struct DeliveredCall {
    url: String,
    secret: Vec<u8>,
    event_type: String,
}

struct FakeDeliverer {
    status: Mutex<u16>,
    calls: Mutex<Vec<DeliveredCall>>,
}

impl FakeDeliverer {
    fn with_status(status: u16) -> Self {
        Self {
            status: Mutex::new(status),
            calls: Mutex::new(Vec::new()),
        }
    }

    fn calls(&self) -> Vec<DeliveredCall> {
        self.calls.lock().map(|calls| calls.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl WebhookDeliverer for FakeDeliverer {
    async fn deliver(
        &self,
        url: &str,
        signing_secret: &[u8],
        _event_id: Uuid,
        event_type: &str,
        _timestamp: i64,
        _body: &str,
    ) -> AppResult<u16> {
        let mut calls = self
            .calls
            .lock()
            .map_err(|_| AppError::Internal("lock poisoned".to_owned()))?;
        calls.push(DeliveredCall {
            url: url.to_owned(),
            secret: signing_secret.to_vec(),
            event_type: event_type.to_owned(),
        });

        self.status
            .lock()
            .map(|status| *status)
            .map_err(|_| AppError::Internal("lock poisoned".to_owned()))
    }
}

struct Harness {
    service: WebhookService,
    repository: Arc<FakeWebhookRepository>,
    deliverer: Arc<FakeDeliverer>,
    audit: AuditService,
}

fn harness(delivery_status: u16) -> Harness {
    let repository = Arc::new(FakeWebhookRepository::new());
    let deliverer = Arc::new(FakeDeliverer::with_status(delivery_status));
    let audit = AuditService::new(Arc::new(FakeAuditRepository::new()))
        .with_fanout(Arc::new(WebhookFanout::new(repository.clone())));

    let service = WebhookService::new(
        repository.clone(),
        deliverer.clone(),
        Arc::new(PrefixEncryptor),
        audit.clone(),
    );

    Harness {
        service,
        repository,
        deliverer,
        audit,
    }
}

async fn subscribe(
    harness: &Harness,
    tenant_id: Option<TenantId>,
    event_types: &[&str],
) -> (WebhookSubscriptionRecord, String) {
    harness
        .service
        .create_subscription(
            &AuditContext::default(),
            tenant_id,
            "ci hook",
            "https://hooks.example.com/ci",
            event_types.iter().map(|value| (*value).to_owned()).collect(),
        )
        .await
        .unwrap_or_else(|_| panic!("subscription"))
}

#[tokio::test]
async fn signing_secret_is_shown_once_and_stored_encrypted() {
    let harness = harness(200);
    let (record, secret) = subscribe(&harness, None, &["user.created"]).await;

    assert_eq!(secret.len(), 64);
    let stored = harness
        .repository
        .stored_secret(record.id)
        .unwrap_or_default();
    assert_ne!(stored, secret.as_bytes());
    assert!(stored.starts_with(b"enc:"));
}

#[tokio::test]
async fn unknown_event_types_are_rejected() {
    let harness = harness(200);
    let result = harness
        .service
        .create_subscription(
            &AuditContext::default(),
            None,
            "bad hook",
            "https://hooks.example.com",
            vec!["user.exploded".to_owned()],
        )
        .await;
    assert!(matches!(result, Err(AppError::Validation(_))));
}

#[tokio::test]
async fn tenant_events_reach_only_tenant_subscriptions() {
    let harness = harness(200);
    let tenant_id = TenantId::new();

    let (tenant_subscription, _) = subscribe(&harness, Some(tenant_id), &["user.created"]).await;
    let (system_subscription, _) = subscribe(&harness, None, &["user.created"]).await;

    // A tenant-scoped event.
    let mut context = AuditContext::default();
    context.tenant_id = Some(tenant_id);
    let recorded = harness
        .audit
        .record(AuditEvent::new(
            AuditEventType::UserCreated,
            AuditResult::Success,
            &context,
        ))
        .await;
    assert!(recorded.is_ok());

    // A platform event (no tenant) never reaches tenant subscriptions.
    let recorded = harness
        .audit
        .record(AuditEvent::new(
            AuditEventType::UserCreated,
            AuditResult::Success,
            &AuditContext::default(),
        ))
        .await;
    assert!(recorded.is_ok());

    let deliveries = harness.repository.pending_deliveries();
    assert_eq!(deliveries.len(), 2);
    assert!(deliveries
        .iter()
        .any(|delivery| delivery.webhook_id == tenant_subscription.id));
    assert!(deliveries
        .iter()
        .any(|delivery| delivery.webhook_id == system_subscription.id));
}

#[tokio::test]
async fn successful_delivery_is_marked_and_signed_with_the_subscription_secret() {
    let harness = harness(200);
    let tenant_id = TenantId::new();
    let (_, secret) = subscribe(&harness, Some(tenant_id), &["user.created"]).await;

    let mut context = AuditContext::default();
    context.tenant_id = Some(tenant_id);
    let recorded = harness
        .audit
        .record(AuditEvent::new(
            AuditEventType::UserCreated,
            AuditResult::Success,
            &context,
        ))
        .await;
    assert!(recorded.is_ok());

    let stats = harness
        .service
        .run_due_deliveries(10)
        .await
        .unwrap_or_default();
    assert_eq!(stats.claimed, 1);
    assert_eq!(stats.delivered, 1);

    let calls = harness.deliverer.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].url, "https://hooks.example.com/ci");
    assert_eq!(calls[0].event_type, "user.created");
    assert_eq!(calls[0].secret, secret.as_bytes());

    let deliveries = harness.repository.pending_deliveries();
    assert_eq!(deliveries[0].status, DeliveryStatus::Success);
    assert_eq!(deliveries[0].response_code, Some(200));
}

#[tokio::test]
async fn failed_delivery_follows_the_backoff_schedule() {
    let harness = harness(500);
    let tenant_id = TenantId::new();
    let _ = subscribe(&harness, Some(tenant_id), &["user.created"]).await;

    let mut context = AuditContext::default();
    context.tenant_id = Some(tenant_id);
    let recorded = harness
        .audit
        .record(AuditEvent::new(
            AuditEventType::UserCreated,
            AuditResult::Success,
            &context,
        ))
        .await;
    assert!(recorded.is_ok());

    let stats = harness
        .service
        .run_due_deliveries(10)
        .await
        .unwrap_or_default();
    assert_eq!(stats.rescheduled, 1);

    let deliveries = harness.repository.pending_deliveries();
    assert_eq!(deliveries[0].status, DeliveryStatus::Pending);
    assert_eq!(deliveries[0].attempt, 1);
    let delay = deliveries[0]
        .next_retry_at
        .map(|due| (due - Utc::now()).num_seconds())
        .unwrap_or_default();
    assert!((25..=30).contains(&delay));
}

#[tokio::test]
async fn exhausted_schedule_marks_the_delivery_failed() {
    let harness = harness(500);
    let tenant_id = TenantId::new();
    let (subscription, _) = subscribe(&harness, Some(tenant_id), &["user.created"]).await;

    let mut context = AuditContext::default();
    context.tenant_id = Some(tenant_id);
    let recorded = harness
        .audit
        .record(AuditEvent::new(
            AuditEventType::UserCreated,
            AuditResult::Success,
            &context,
        ))
        .await;
    assert!(recorded.is_ok());

    let deliveries = harness.repository.pending_deliveries();
    harness
        .repository
        .force_attempt(deliveries[0].id, BACKOFF_SCHEDULE_SECONDS.len() as i32);

    let stats = harness
        .service
        .run_due_deliveries(10)
        .await
        .unwrap_or_default();
    assert_eq!(stats.failed, 1);

    let deliveries = harness.repository.pending_deliveries();
    assert_eq!(deliveries[0].status, DeliveryStatus::Failed);

    // The subscription itself stays enabled; the operator decides.
    let subscription = harness
        .repository
        .find_subscription(subscription.id)
        .await
        .unwrap_or_default()
        .unwrap_or_else(|| panic!("subscription"));
    assert_eq!(subscription.status, WebhookStatus::Active);
}

#[tokio::test]
async fn deleting_a_subscription_requires_a_reason_and_matching_scope() {
    let harness = harness(200);
    let tenant_id = TenantId::new();
    let (subscription, _) = subscribe(&harness, Some(tenant_id), &["user.created"]).await;
    let context = AuditContext::default();

    let missing_reason = harness
        .service
        .delete_subscription(&context, Some(tenant_id), subscription.id, None)
        .await;
    assert!(matches!(missing_reason, Err(AppError::AuditReasonRequired)));

    let wrong_scope = harness
        .service
        .delete_subscription(
            &context,
            Some(TenantId::new()),
            subscription.id,
            Some("cleanup".to_owned()),
        )
        .await;
    assert!(matches!(wrong_scope, Err(AppError::ForbiddenTenant(_))));

    let deleted = harness
        .service
        .delete_subscription(
            &context,
            Some(tenant_id),
            subscription.id,
            Some("decommissioned endpoint".to_owned()),
        )
        .await;
    assert!(deleted.is_ok());
}
