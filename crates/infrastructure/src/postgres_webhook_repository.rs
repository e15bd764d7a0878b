//! PostgreSQL-backed webhook subscription and delivery repository.
//!
//! Due deliveries are claimed with `FOR UPDATE SKIP LOCKED` so multiple
//! runners never attempt the same delivery concurrently.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use clavis_application::{
    DeliveryStatus, DueDelivery, NewWebhookSubscription, WebhookDeliveryRecord, WebhookRepository,
    WebhookStatus, WebhookSubscriptionRecord,
};
use clavis_core::{AppError, AppResult, TenantId};

/// PostgreSQL implementation of the webhook repository port.
#[derive(Clone)]
pub struct PostgresWebhookRepository {
    pool: PgPool,
}

impl PostgresWebhookRepository {
    /// Creates a repository with the provided connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct SubscriptionRow {
    id: uuid::Uuid,
    tenant_id: Option<uuid::Uuid>,
    name: String,
    url: String,
    event_types: serde_json::Value,
    status: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<SubscriptionRow> for WebhookSubscriptionRecord {
    type Error = AppError;

    fn try_from(row: SubscriptionRow) -> Result<Self, Self::Error> {
        let event_types: Vec<String> = serde_json::from_value(row.event_types)
            .map_err(|error| AppError::Internal(format!("failed to parse event types: {error}")))?;

        Ok(Self {
            id: row.id,
            tenant_id: row.tenant_id.map(TenantId::from_uuid),
            name: row.name,
            url: row.url,
            event_types,
            status: WebhookStatus::parse(&row.status)?,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct DeliveryRow {
    id: uuid::Uuid,
    webhook_id: uuid::Uuid,
    event_id: uuid::Uuid,
    attempt: i32,
    status: String,
    response_code: Option<i32>,
    next_retry_at: Option<DateTime<Utc>>,
    delivered_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl TryFrom<DeliveryRow> for WebhookDeliveryRecord {
    type Error = AppError;

    fn try_from(row: DeliveryRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            webhook_id: row.webhook_id,
            event_id: row.event_id,
            attempt: row.attempt,
            status: DeliveryStatus::parse(&row.status)?,
            response_code: row.response_code,
            next_retry_at: row.next_retry_at,
            delivered_at: row.delivered_at,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct DueDeliveryRow {
    id: uuid::Uuid,
    webhook_id: uuid::Uuid,
    event_id: uuid::Uuid,
    attempt: i32,
    status: String,
    response_code: Option<i32>,
    next_retry_at: Option<DateTime<Utc>>,
    delivered_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    url: String,
    signing_secret_enc: Vec<u8>,
    event_type: String,
    payload: serde_json::Value,
}

impl TryFrom<DueDeliveryRow> for DueDelivery {
    type Error = AppError;

    fn try_from(row: DueDeliveryRow) -> Result<Self, Self::Error> {
        Ok(Self {
            delivery: WebhookDeliveryRecord {
                id: row.id,
                webhook_id: row.webhook_id,
                event_id: row.event_id,
                attempt: row.attempt,
                status: DeliveryStatus::parse(&row.status)?,
                response_code: row.response_code,
                next_retry_at: row.next_retry_at,
                delivered_at: row.delivered_at,
                created_at: row.created_at,
            },
            url: row.url,
            signing_secret_enc: row.signing_secret_enc,
            event_type: row.event_type,
            payload: row.payload,
        })
    }
}

#[async_trait]
impl WebhookRepository for PostgresWebhookRepository {
    async fn create_subscription(&self, subscription: NewWebhookSubscription) -> AppResult<uuid::Uuid> {
        sqlx::query_scalar::<_, uuid::Uuid>(
            r#"
            INSERT INTO webhook_subscriptions
                (tenant_id, name, url, event_types, signing_secret_enc, status)
            VALUES ($1, $2, $3, $4, $5, 'active')
            RETURNING id
            "#,
        )
        .bind(subscription.tenant_id.map(|tenant_id| tenant_id.as_uuid()))
        .bind(&subscription.name)
        .bind(&subscription.url)
        .bind(serde_json::json!(subscription.event_types))
        .bind(&subscription.signing_secret_enc)
        .fetch_one(&self.pool)
        .await
        .map_err(|error| AppError::Internal(format!("failed to create subscription: {error}")))
    }

    async fn find_subscription(
        &self,
        id: uuid::Uuid,
    ) -> AppResult<Option<WebhookSubscriptionRecord>> {
        let row = sqlx::query_as::<_, SubscriptionRow>(
            r#"
            SELECT id, tenant_id, name, url, event_types, status, created_at
            FROM webhook_subscriptions
            WHERE id = $1
            LIMIT 1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|error| AppError::Internal(format!("failed to find subscription: {error}")))?;

        row.map(WebhookSubscriptionRecord::try_from).transpose()
    }

    async fn list_subscriptions(
        &self,
        tenant_id: Option<TenantId>,
    ) -> AppResult<Vec<WebhookSubscriptionRecord>> {
        let rows = sqlx::query_as::<_, SubscriptionRow>(
            r#"
            SELECT id, tenant_id, name, url, event_types, status, created_at
            FROM webhook_subscriptions
            WHERE tenant_id IS NOT DISTINCT FROM $1
            ORDER BY created_at DESC
            "#,
        )
        .bind(tenant_id.map(|tenant_id| tenant_id.as_uuid()))
        .fetch_all(&self.pool)
        .await
        .map_err(|error| AppError::Internal(format!("failed to list subscriptions: {error}")))?;

        rows.into_iter()
            .map(WebhookSubscriptionRecord::try_from)
            .collect()
    }

    async fn set_subscription_status(
        &self,
        id: uuid::Uuid,
        status: WebhookStatus,
    ) -> AppResult<()> {
        sqlx::query(
            r#"
            UPDATE webhook_subscriptions
            SET status = $2, updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(status.as_str())
        .execute(&self.pool)
        .await
        .map_err(|error| {
            AppError::Internal(format!("failed to update subscription status: {error}"))
        })?;

        Ok(())
    }

    async fn delete_subscription(&self, id: uuid::Uuid) -> AppResult<()> {
        sqlx::query("DELETE FROM webhook_subscriptions WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|error| {
                AppError::Internal(format!("failed to delete subscription: {error}"))
            })?;

        Ok(())
    }

    async fn list_enabled_for_event(
        &self,
        tenant_id: Option<TenantId>,
        event_type: &str,
    ) -> AppResult<Vec<WebhookSubscriptionRecord>> {
        let rows = sqlx::query_as::<_, SubscriptionRow>(
            r#"
            SELECT id, tenant_id, name, url, event_types, status, created_at
            FROM webhook_subscriptions
            WHERE tenant_id IS NOT DISTINCT FROM $1
                AND status = 'active'
                AND event_types @> to_jsonb(ARRAY[$2::TEXT])
            "#,
        )
        .bind(tenant_id.map(|tenant_id| tenant_id.as_uuid()))
        .bind(event_type)
        .fetch_all(&self.pool)
        .await
        .map_err(|error| {
            AppError::Internal(format!("failed to match subscriptions: {error}"))
        })?;

        rows.into_iter()
            .map(WebhookSubscriptionRecord::try_from)
            .collect()
    }

    async fn enqueue_delivery(
        &self,
        webhook_id: uuid::Uuid,
        event_id: uuid::Uuid,
        event_type: &str,
        payload: &serde_json::Value,
        next_retry_at: DateTime<Utc>,
    ) -> AppResult<uuid::Uuid> {
        sqlx::query_scalar::<_, uuid::Uuid>(
            r#"
            INSERT INTO webhook_deliveries
                (webhook_id, event_id, event_type, payload, status, next_retry_at)
            VALUES ($1, $2, $3, $4, 'pending', $5)
            RETURNING id
            "#,
        )
        .bind(webhook_id)
        .bind(event_id)
        .bind(event_type)
        .bind(payload)
        .bind(next_retry_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|error| AppError::Internal(format!("failed to enqueue delivery: {error}")))
    }

    async fn claim_due_deliveries(
        &self,
        now: DateTime<Utc>,
        limit: u32,
    ) -> AppResult<Vec<DueDelivery>> {
        // Claiming pushes next_retry_at forward as a short lease, so a
        // crashed runner only delays the delivery instead of losing it.
        let rows = sqlx::query_as::<_, DueDeliveryRow>(
            r#"
            WITH claimed AS (
                SELECT d.id
                FROM webhook_deliveries d
                JOIN webhook_subscriptions s ON s.id = d.webhook_id
                WHERE d.status = 'pending'
                    AND d.next_retry_at <= $1
                    AND s.status = 'active'
                ORDER BY d.next_retry_at
                LIMIT $2
                FOR UPDATE OF d SKIP LOCKED
            )
            UPDATE webhook_deliveries d
            SET next_retry_at = $1 + interval '60 seconds'
            FROM claimed, webhook_subscriptions s
            WHERE d.id = claimed.id AND s.id = d.webhook_id
            RETURNING d.id, d.webhook_id, d.event_id, d.attempt, d.status,
                      d.response_code, d.next_retry_at, d.delivered_at, d.created_at,
                      s.url, s.signing_secret_enc, d.event_type, d.payload
            "#,
        )
        .bind(now)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(|error| AppError::Internal(format!("failed to claim deliveries: {error}")))?;

        rows.into_iter().map(DueDelivery::try_from).collect()
    }

    async fn mark_delivery(
        &self,
        id: uuid::Uuid,
        status: DeliveryStatus,
        attempt: i32,
        response_code: Option<i32>,
        next_retry_at: Option<DateTime<Utc>>,
        delivered_at: Option<DateTime<Utc>>,
    ) -> AppResult<()> {
        sqlx::query(
            r#"
            UPDATE webhook_deliveries
            SET status = $2, attempt = $3, response_code = $4,
                next_retry_at = $5, delivered_at = $6
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(status.as_str())
        .bind(attempt)
        .bind(response_code)
        .bind(next_retry_at)
        .bind(delivered_at)
        .execute(&self.pool)
        .await
        .map_err(|error| AppError::Internal(format!("failed to mark delivery: {error}")))?;

        Ok(())
    }

    async fn list_deliveries(
        &self,
        webhook_id: uuid::Uuid,
        page: u32,
        page_size: u32,
    ) -> AppResult<Vec<WebhookDeliveryRecord>> {
        let offset = i64::from(page.saturating_sub(1)) * i64::from(page_size);
        let rows = sqlx::query_as::<_, DeliveryRow>(
            r#"
            SELECT id, webhook_id, event_id, attempt, status, response_code,
                   next_retry_at, delivered_at, created_at
            FROM webhook_deliveries
            WHERE webhook_id = $1
            ORDER BY created_at DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(webhook_id)
        .bind(i64::from(page_size))
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(|error| AppError::Internal(format!("failed to list deliveries: {error}")))?;

        rows.into_iter().map(WebhookDeliveryRecord::try_from).collect()
    }
}
