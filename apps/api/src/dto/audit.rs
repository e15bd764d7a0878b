use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use clavis_application::{AuditEventRecord, AuditQuery};
use clavis_core::{AppError, AppResult, TenantId};
use clavis_domain::{AuditResult, UserId};

/// GET /audit query string.
#[derive(Debug, Default, Deserialize)]
pub struct AuditQueryParams {
    pub event_type: Option<String>,
    pub actor_user_id: Option<Uuid>,
    pub target_type: Option<String>,
    pub target_id: Option<String>,
    pub result: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

impl AuditQueryParams {
    /// Builds the repository query with the tenant scope forced by the
    /// caller; tenant principals can never widen it.
    pub fn into_query(self, tenant_id: Option<TenantId>) -> AppResult<AuditQuery> {
        let result = self
            .result
            .as_deref()
            .map(AuditResult::parse)
            .transpose()
            .map_err(|_| AppError::Validation("unknown result filter".to_owned()))?;

        Ok(AuditQuery {
            event_type: self.event_type,
            actor_user_id: self.actor_user_id.map(UserId::from_uuid),
            target_type: self.target_type,
            target_id: self.target_id,
            tenant_id,
            result,
            from: self.from,
            to: self.to,
            page: self.page.unwrap_or(1),
            page_size: self.page_size.unwrap_or(0),
        })
    }
}

/// Audit event representation.
#[derive(Debug, Serialize)]
pub struct AuditEventResponse {
    pub id: Uuid,
    pub sequence: i64,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub result: String,
    pub actor_user_id: Option<Uuid>,
    pub actor_username: Option<String>,
    pub target_type: Option<String>,
    pub target_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<Uuid>,
    pub error_code: Option<String>,
    pub reason: Option<String>,
    pub source_ip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub impersonator_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl From<AuditEventRecord> for AuditEventResponse {
    fn from(event: AuditEventRecord) -> Self {
        Self {
            id: event.id,
            sequence: event.sequence,
            timestamp: event.timestamp,
            event_type: event.event_type,
            result: event.result.as_str().to_owned(),
            actor_user_id: event.actor_user_id.map(|user_id| user_id.as_uuid()),
            actor_username: event.actor_username,
            target_type: event.target_type,
            target_id: event.target_id,
            tenant_id: event.tenant_id.map(|tenant_id| tenant_id.as_uuid()),
            error_code: event.error_code,
            reason: event.reason,
            source_ip: event.source_ip,
            impersonator_id: event.impersonator_id.map(|user_id| user_id.as_uuid()),
            metadata: event.metadata,
        }
    }
}
