//! Webhook subscriptions and asynchronous delivery.
//!
//! Committed audit events fan out to the enabled subscriptions of their
//! scope: tenant events reach that tenant's subscriptions, platform events
//! reach system subscriptions only. Fan-out persists delivery rows and never
//! performs network I/O on the recording path; a background runner claims
//! due rows and delivers with exponential backoff.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use clavis_core::{AppError, AppResult, NonEmptyString, TenantId};
use clavis_domain::{AuditEventType, AuditResult};

use crate::audit_service::{
    AuditContext, AuditEvent, AuditEventRecord, AuditFanout, AuditService,
};
use crate::mfa_service::SecretEncryptor;

/// Retry delays between attempts, seconds. After the final attempt without
/// success the delivery is marked failed and the subscription stays enabled.
pub const BACKOFF_SCHEDULE_SECONDS: &[i64] = &[30, 120, 600, 3600, 21_600, 86_400];

/// Receivers verify `X-Timestamp` freshness within this window, seconds.
pub const SIGNATURE_FRESHNESS_WINDOW_SECONDS: i64 = 300;

// ---------------------------------------------------------------------------
// Ports
// ---------------------------------------------------------------------------

/// Lifecycle status of a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookStatus {
    /// Subscription receives deliveries.
    Active,
    /// Subscription is paused by its owner.
    Disabled,
}

impl WebhookStatus {
    /// Returns the storage string.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Disabled => "disabled",
        }
    }

    /// Parses a storage string.
    pub fn parse(value: &str) -> AppResult<Self> {
        match value {
            "active" => Ok(Self::Active),
            "disabled" => Ok(Self::Disabled),
            _ => Err(AppError::Validation(format!(
                "unknown webhook status '{value}'"
            ))),
        }
    }
}

/// Delivery lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryStatus {
    /// Waiting for the next attempt.
    Pending,
    /// Delivered with a 2xx response.
    Success,
    /// Exhausted the retry schedule.
    Failed,
}

impl DeliveryStatus {
    /// Returns the storage string.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Success => "success",
            Self::Failed => "failed",
        }
    }

    /// Parses a storage string.
    pub fn parse(value: &str) -> AppResult<Self> {
        match value {
            "pending" => Ok(Self::Pending),
            "success" => Ok(Self::Success),
            "failed" => Ok(Self::Failed),
            _ => Err(AppError::Validation(format!(
                "unknown delivery status '{value}'"
            ))),
        }
    }
}

/// Webhook subscription as persisted. The signing secret never appears here;
/// it is returned exactly once at creation.
#[derive(Debug, Clone)]
pub struct WebhookSubscriptionRecord {
    /// Subscription identifier.
    pub id: Uuid,
    /// Owning tenant; `None` for system-scope subscriptions.
    pub tenant_id: Option<TenantId>,
    /// Operator-facing name.
    pub name: String,
    /// Delivery endpoint.
    pub url: String,
    /// Audit event types this subscription receives.
    pub event_types: Vec<String>,
    /// Lifecycle status.
    pub status: WebhookStatus,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

/// Parameters for creating a subscription.
#[derive(Debug, Clone)]
pub struct NewWebhookSubscription {
    /// Owning tenant; `None` for system scope.
    pub tenant_id: Option<TenantId>,
    /// Operator-facing name.
    pub name: String,
    /// Delivery endpoint.
    pub url: String,
    /// Audit event types to receive.
    pub event_types: Vec<String>,
    /// Signing secret, encrypted with the process key.
    pub signing_secret_enc: Vec<u8>,
}

/// Delivery attempt record.
#[derive(Debug, Clone)]
pub struct WebhookDeliveryRecord {
    /// Delivery identifier.
    pub id: Uuid,
    /// Subscription being delivered to.
    pub webhook_id: Uuid,
    /// Audit event being delivered.
    pub event_id: Uuid,
    /// Completed attempt count.
    pub attempt: i32,
    /// Lifecycle status.
    pub status: DeliveryStatus,
    /// Last HTTP response code, when a response was received.
    pub response_code: Option<i32>,
    /// Next attempt time while pending.
    pub next_retry_at: Option<DateTime<Utc>>,
    /// Set on success.
    pub delivered_at: Option<DateTime<Utc>>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

/// A claimed delivery with everything the runner needs to attempt it.
#[derive(Debug, Clone)]
pub struct DueDelivery {
    /// The delivery row, claimed for this runner.
    pub delivery: WebhookDeliveryRecord,
    /// Subscription endpoint.
    pub url: String,
    /// Subscription signing secret, encrypted at rest.
    pub signing_secret_enc: Vec<u8>,
    /// Event type header value.
    pub event_type: String,
    /// Serialized audit event payload.
    pub payload: serde_json::Value,
}

/// Repository port for subscriptions and the delivery queue.
#[async_trait]
pub trait WebhookRepository: Send + Sync {
    /// Creates a subscription. Returns the assigned id.
    async fn create_subscription(&self, subscription: NewWebhookSubscription) -> AppResult<Uuid>;

    /// Finds a subscription by id.
    async fn find_subscription(&self, id: Uuid) -> AppResult<Option<WebhookSubscriptionRecord>>;

    /// Lists subscriptions within a scope.
    async fn list_subscriptions(
        &self,
        tenant_id: Option<TenantId>,
    ) -> AppResult<Vec<WebhookSubscriptionRecord>>;

    /// Updates a subscription's status.
    async fn set_subscription_status(&self, id: Uuid, status: WebhookStatus) -> AppResult<()>;

    /// Deletes a subscription and its delivery history.
    async fn delete_subscription(&self, id: Uuid) -> AppResult<()>;

    /// Lists enabled subscriptions receiving an event type within a scope.
    async fn list_enabled_for_event(
        &self,
        tenant_id: Option<TenantId>,
        event_type: &str,
    ) -> AppResult<Vec<WebhookSubscriptionRecord>>;

    /// Persists a pending delivery.
    async fn enqueue_delivery(
        &self,
        webhook_id: Uuid,
        event_id: Uuid,
        event_type: &str,
        payload: &serde_json::Value,
        next_retry_at: DateTime<Utc>,
    ) -> AppResult<Uuid>;

    /// Claims deliveries due at `now`, at most `limit`, locking them against
    /// concurrent runners.
    async fn claim_due_deliveries(
        &self,
        now: DateTime<Utc>,
        limit: u32,
    ) -> AppResult<Vec<DueDelivery>>;

    /// Records the outcome of a delivery attempt.
    async fn mark_delivery(
        &self,
        id: Uuid,
        status: DeliveryStatus,
        attempt: i32,
        response_code: Option<i32>,
        next_retry_at: Option<DateTime<Utc>>,
        delivered_at: Option<DateTime<Utc>>,
    ) -> AppResult<()>;

    /// Lists deliveries for a subscription, newest first.
    async fn list_deliveries(
        &self,
        webhook_id: Uuid,
        page: u32,
        page_size: u32,
    ) -> AppResult<Vec<WebhookDeliveryRecord>>;
}

/// Port performing one signed delivery attempt.
#[async_trait]
pub trait WebhookDeliverer: Send + Sync {
    /// POSTs the body to the endpoint with signature headers.
    ///
    /// Returns the HTTP status code; transport failures are errors.
    async fn deliver(
        &self,
        url: &str,
        signing_secret: &[u8],
        event_id: Uuid,
        event_type: &str,
        timestamp: i64,
        body: &str,
    ) -> AppResult<u16>;
}

// ---------------------------------------------------------------------------
// Fan-out
// ---------------------------------------------------------------------------

/// Audit fan-out that persists delivery intents at event commit.
pub struct WebhookFanout {
    repository: Arc<dyn WebhookRepository>,
}

impl WebhookFanout {
    /// Creates a fan-out over the webhook repository.
    #[must_use]
    pub fn new(repository: Arc<dyn WebhookRepository>) -> Self {
        Self { repository }
    }
}

#[async_trait]
impl AuditFanout for WebhookFanout {
    async fn publish(&self, event: &AuditEventRecord) -> AppResult<()> {
        // Tenant events go to that tenant's subscriptions; platform events
        // (no tenant) go to system subscriptions only.
        let subscriptions = self
            .repository
            .list_enabled_for_event(event.tenant_id, &event.event_type)
            .await?;

        if subscriptions.is_empty() {
            return Ok(());
        }

        let payload = serde_json::to_value(event)
            .map_err(|error| AppError::Internal(format!("failed to serialize event: {error}")))?;

        let now = Utc::now();
        for subscription in subscriptions {
            self.repository
                .enqueue_delivery(subscription.id, event.id, &event.event_type, &payload, now)
                .await?;
        }

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Service
// ---------------------------------------------------------------------------

/// Outcome counters for one delivery sweep.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeliveryStats {
    /// Deliveries claimed in this sweep.
    pub claimed: u32,
    /// Deliveries that completed with a 2xx response.
    pub delivered: u32,
    /// Deliveries rescheduled for a later attempt.
    pub rescheduled: u32,
    /// Deliveries that exhausted the schedule.
    pub failed: u32,
}

/// Application service for webhook management and delivery.
#[derive(Clone)]
pub struct WebhookService {
    repository: Arc<dyn WebhookRepository>,
    deliverer: Arc<dyn WebhookDeliverer>,
    encryptor: Arc<dyn SecretEncryptor>,
    audit: AuditService,
}

impl WebhookService {
    /// Creates a new webhook service.
    #[must_use]
    pub fn new(
        repository: Arc<dyn WebhookRepository>,
        deliverer: Arc<dyn WebhookDeliverer>,
        encryptor: Arc<dyn SecretEncryptor>,
        audit: AuditService,
    ) -> Self {
        Self {
            repository,
            deliverer,
            encryptor,
            audit,
        }
    }

    /// Creates a subscription.
    ///
    /// Returns the record and the signing secret; the secret is shown
    /// exactly once and stored encrypted with the process key.
    pub async fn create_subscription(
        &self,
        context: &AuditContext,
        tenant_id: Option<TenantId>,
        name: &str,
        url: &str,
        event_types: Vec<String>,
    ) -> AppResult<(WebhookSubscriptionRecord, String)> {
        let name = NonEmptyString::new(name)?;

        if !url.starts_with("https://") && !url.starts_with("http://") {
            return Err(AppError::Validation(
                "webhook url must be an absolute http(s) endpoint".to_owned(),
            ));
        }

        if event_types.is_empty() {
            return Err(AppError::Validation(
                "at least one event type is required".to_owned(),
            ));
        }
        for event_type in &event_types {
            let _: AuditEventType = event_type.parse()?;
        }

        let secret = generate_signing_secret()?;
        let signing_secret_enc = self.encryptor.encrypt(secret.as_bytes())?;

        let id = self
            .repository
            .create_subscription(NewWebhookSubscription {
                tenant_id,
                name: name.as_str().to_owned(),
                url: url.to_owned(),
                event_types,
                signing_secret_enc,
            })
            .await?;

        self.audit
            .record(
                AuditEvent::new(AuditEventType::WebhookCreated, AuditResult::Success, context)
                    .target("webhook", id),
            )
            .await?;

        let record = self
            .repository
            .find_subscription(id)
            .await?
            .ok_or_else(|| AppError::Internal("subscription vanished after creation".to_owned()))?;

        Ok((record, secret))
    }

    /// Lists subscriptions within a scope.
    pub async fn list_subscriptions(
        &self,
        tenant_id: Option<TenantId>,
    ) -> AppResult<Vec<WebhookSubscriptionRecord>> {
        self.repository.list_subscriptions(tenant_id).await
    }

    /// Deletes a subscription. Destructive: requires an audit reason.
    pub async fn delete_subscription(
        &self,
        context: &AuditContext,
        tenant_id: Option<TenantId>,
        id: Uuid,
        reason: Option<String>,
    ) -> AppResult<()> {
        if reason.as_deref().is_none_or(|value| value.trim().is_empty()) {
            return Err(AppError::AuditReasonRequired);
        }

        self.scoped_subscription(tenant_id, id).await?;
        self.repository.delete_subscription(id).await?;

        self.audit
            .record(
                AuditEvent::new(AuditEventType::WebhookDeleted, AuditResult::Success, context)
                    .target("webhook", id)
                    .reason(reason),
            )
            .await?;

        Ok(())
    }

    /// Pauses or resumes a subscription.
    pub async fn set_subscription_status(
        &self,
        context: &AuditContext,
        tenant_id: Option<TenantId>,
        id: Uuid,
        status: WebhookStatus,
    ) -> AppResult<()> {
        self.scoped_subscription(tenant_id, id).await?;
        self.repository.set_subscription_status(id, status).await?;

        let event_type = match status {
            WebhookStatus::Active => AuditEventType::WebhookEnabled,
            WebhookStatus::Disabled => AuditEventType::WebhookDisabled,
        };

        self.audit
            .record(
                AuditEvent::new(event_type, AuditResult::Success, context).target("webhook", id),
            )
            .await?;

        Ok(())
    }

    /// Lists delivery history for a subscription.
    pub async fn list_deliveries(
        &self,
        tenant_id: Option<TenantId>,
        webhook_id: Uuid,
        page: u32,
        page_size: u32,
    ) -> AppResult<Vec<WebhookDeliveryRecord>> {
        self.scoped_subscription(tenant_id, webhook_id).await?;
        self.repository
            .list_deliveries(webhook_id, page.max(1), page_size.clamp(1, 200))
            .await
    }

    /// Claims and attempts due deliveries.
    ///
    /// A 2xx response completes the delivery; anything else reschedules it
    /// along the backoff schedule until the schedule is exhausted.
    pub async fn run_due_deliveries(&self, limit: u32) -> AppResult<DeliveryStats> {
        let now = Utc::now();
        let due = self.repository.claim_due_deliveries(now, limit).await?;

        let mut stats = DeliveryStats {
            claimed: due.len() as u32,
            ..DeliveryStats::default()
        };

        for item in due {
            let outcome = self.attempt(&item, now).await?;
            match outcome {
                DeliveryStatus::Success => stats.delivered += 1,
                DeliveryStatus::Pending => stats.rescheduled += 1,
                DeliveryStatus::Failed => stats.failed += 1,
            }
        }

        Ok(stats)
    }

    async fn attempt(&self, item: &DueDelivery, now: DateTime<Utc>) -> AppResult<DeliveryStatus> {
        let secret = self.encryptor.decrypt(&item.signing_secret_enc)?;
        let body = item.payload.to_string();

        let response = self
            .deliverer
            .deliver(
                &item.url,
                &secret,
                item.delivery.event_id,
                &item.event_type,
                now.timestamp(),
                &body,
            )
            .await;

        let attempt = item.delivery.attempt + 1;
        let response_code = response.as_ref().ok().map(|code| i32::from(*code));
        let succeeded = matches!(&response, Ok(code) if (200..300).contains(code));

        if succeeded {
            self.repository
                .mark_delivery(
                    item.delivery.id,
                    DeliveryStatus::Success,
                    attempt,
                    response_code,
                    None,
                    Some(now),
                )
                .await?;
            return Ok(DeliveryStatus::Success);
        }

        let Some(delay_seconds) = BACKOFF_SCHEDULE_SECONDS.get(attempt as usize - 1) else {
            self.repository
                .mark_delivery(
                    item.delivery.id,
                    DeliveryStatus::Failed,
                    attempt,
                    response_code,
                    None,
                    None,
                )
                .await?;
            return Ok(DeliveryStatus::Failed);
        };

        self.repository
            .mark_delivery(
                item.delivery.id,
                DeliveryStatus::Pending,
                attempt,
                response_code,
                Some(now + Duration::seconds(*delay_seconds)),
                None,
            )
            .await?;

        Ok(DeliveryStatus::Pending)
    }

    async fn scoped_subscription(
        &self,
        tenant_id: Option<TenantId>,
        id: Uuid,
    ) -> AppResult<WebhookSubscriptionRecord> {
        let subscription = self
            .repository
            .find_subscription(id)
            .await?
            .ok_or_else(|| AppError::NotFound("webhook subscription not found".to_owned()))?;

        if subscription.tenant_id != tenant_id {
            return Err(AppError::ForbiddenTenant(
                "webhook subscription belongs to a different scope".to_owned(),
            ));
        }

        Ok(subscription)
    }
}

fn generate_signing_secret() -> AppResult<String> {
    use std::fmt::Write;

    let mut bytes = [0u8; 32];
    getrandom::fill(&mut bytes).map_err(|error| {
        AppError::Internal(format!("failed to generate signing secret: {error}"))
    })?;

    Ok(bytes
        .iter()
        .fold(String::with_capacity(64), |mut acc, byte| {
            let _ = write!(acc, "{byte:02x}");
            acc
        }))
}

#[cfg(test)]
mod tests;
