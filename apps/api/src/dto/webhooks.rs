use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use clavis_application::{WebhookDeliveryRecord, WebhookSubscriptionRecord};

/// POST /webhooks request body.
#[derive(Debug, Deserialize)]
pub struct CreateWebhookRequest {
    pub name: String,
    pub url: String,
    pub event_types: Vec<String>,
}

/// Webhook subscription representation. The signing secret never appears
/// here.
#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    pub id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<Uuid>,
    pub name: String,
    pub url: String,
    pub event_types: Vec<String>,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

impl From<WebhookSubscriptionRecord> for WebhookResponse {
    fn from(subscription: WebhookSubscriptionRecord) -> Self {
        Self {
            id: subscription.id,
            tenant_id: subscription.tenant_id.map(|tenant_id| tenant_id.as_uuid()),
            name: subscription.name,
            url: subscription.url,
            event_types: subscription.event_types,
            status: subscription.status.as_str().to_owned(),
            created_at: subscription.created_at,
        }
    }
}

/// Creation response carrying the signing secret exactly once.
#[derive(Debug, Serialize)]
pub struct CreatedWebhookResponse {
    #[serde(flatten)]
    pub webhook: WebhookResponse,
    pub signing_secret: String,
}

/// Delivery attempt representation.
#[derive(Debug, Serialize)]
pub struct WebhookDeliveryResponse {
    pub id: Uuid,
    pub event_id: Uuid,
    pub attempt: i32,
    pub status: String,
    pub response_code: Option<i32>,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl From<WebhookDeliveryRecord> for WebhookDeliveryResponse {
    fn from(delivery: WebhookDeliveryRecord) -> Self {
        Self {
            id: delivery.id,
            event_id: delivery.event_id,
            attempt: delivery.attempt,
            status: delivery.status.as_str().to_owned(),
            response_code: delivery.response_code,
            next_retry_at: delivery.next_retry_at,
            delivered_at: delivery.delivered_at,
            created_at: delivery.created_at,
        }
    }
}
