//! Structured audit pipeline.
//!
//! Every authority-bearing action produces exactly one event, written before
//! the API response. Destructive actions must carry a caller-supplied reason.
//! Committed tenant-scoped events are handed to the webhook fan-out, which
//! never blocks or fails the recording path.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use clavis_core::{AppError, AppResult, TenantId};
use clavis_domain::{AuditEventType, AuditResult, PrincipalType, UserId};

/// Default page size for audit queries.
pub const AUDIT_PAGE_SIZE_DEFAULT: u32 = 50;

/// Maximum page size for audit queries.
pub const AUDIT_PAGE_SIZE_MAX: u32 = 1000;

/// Request-scoped context threaded into every audit event.
#[derive(Debug, Clone, Default)]
pub struct AuditContext {
    /// Acting user, when authenticated.
    pub actor_user_id: Option<UserId>,
    /// Plane of the acting principal.
    pub actor_principal_type: Option<PrincipalType>,
    /// Username of the acting principal.
    pub actor_username: Option<String>,
    /// Tenant scope of the action, when tenant-scoped.
    pub tenant_id: Option<TenantId>,
    /// Client IP from the request.
    pub source_ip: Option<String>,
    /// User-Agent header from the request.
    pub user_agent: Option<String>,
    /// SYSTEM user driving an impersonation session, when applicable.
    pub impersonator_id: Option<UserId>,
}

/// Audit event input produced by application use-cases.
#[derive(Debug, Clone)]
pub struct AuditEvent {
    /// Stable event type.
    pub event_type: AuditEventType,
    /// Outcome of the guarded action.
    pub result: AuditResult,
    /// Acting user, when known.
    pub actor_user_id: Option<UserId>,
    /// Plane of the acting principal.
    pub actor_principal_type: Option<PrincipalType>,
    /// Username of the acting principal.
    pub actor_username: Option<String>,
    /// Kind of the targeted resource.
    pub target_type: Option<String>,
    /// Identifier of the targeted resource.
    pub target_id: Option<String>,
    /// Tenant scope; `None` for platform events.
    pub tenant_id: Option<TenantId>,
    /// Stable error code for failures.
    pub error_code: Option<String>,
    /// Caller-supplied justification for destructive actions.
    pub reason: Option<String>,
    /// Client IP from the request.
    pub source_ip: Option<String>,
    /// User-Agent header from the request.
    pub user_agent: Option<String>,
    /// Impersonator identity carried through impersonated requests.
    pub impersonator_id: Option<UserId>,
    /// Free-form structured detail.
    pub metadata: Option<serde_json::Value>,
}

impl AuditEvent {
    /// Creates an event from a request context.
    #[must_use]
    pub fn new(event_type: AuditEventType, result: AuditResult, context: &AuditContext) -> Self {
        Self {
            event_type,
            result,
            actor_user_id: context.actor_user_id,
            actor_principal_type: context.actor_principal_type,
            actor_username: context.actor_username.clone(),
            target_type: None,
            target_id: None,
            tenant_id: context.tenant_id,
            error_code: None,
            reason: None,
            source_ip: context.source_ip.clone(),
            user_agent: context.user_agent.clone(),
            impersonator_id: context.impersonator_id,
            metadata: None,
        }
    }

    /// Sets the targeted resource.
    #[must_use]
    pub fn target(mut self, target_type: &str, target_id: impl ToString) -> Self {
        self.target_type = Some(target_type.to_owned());
        self.target_id = Some(target_id.to_string());
        self
    }

    /// Sets the caller-supplied reason.
    #[must_use]
    pub fn reason(mut self, reason: Option<String>) -> Self {
        self.reason = reason;
        self
    }

    /// Sets the stable error code for a failure event.
    #[must_use]
    pub fn error_code(mut self, code: &'static str) -> Self {
        self.error_code = Some(code.to_owned());
        self
    }

    /// Attaches structured metadata.
    #[must_use]
    pub fn metadata(mut self, value: serde_json::Value) -> Self {
        self.metadata = Some(value);
        self
    }
}

/// Audit event as persisted, with server-assigned ordering.
///
/// Serializes to the webhook delivery payload.
#[derive(Debug, Clone, serde::Serialize)]
pub struct AuditEventRecord {
    /// Event identifier.
    pub id: Uuid,
    /// Server-assigned sequence; breaks timestamp ties.
    pub sequence: i64,
    /// Server-assigned timestamp.
    pub timestamp: DateTime<Utc>,
    /// Stable event type string.
    pub event_type: String,
    /// Outcome.
    pub result: AuditResult,
    /// Acting user, when known.
    pub actor_user_id: Option<UserId>,
    /// Plane of the acting principal.
    pub actor_principal_type: Option<PrincipalType>,
    /// Username of the acting principal.
    pub actor_username: Option<String>,
    /// Kind of the targeted resource.
    pub target_type: Option<String>,
    /// Identifier of the targeted resource.
    pub target_id: Option<String>,
    /// Tenant scope; `None` for platform events.
    pub tenant_id: Option<TenantId>,
    /// Stable error code for failures.
    pub error_code: Option<String>,
    /// Caller-supplied justification.
    pub reason: Option<String>,
    /// Client IP.
    pub source_ip: Option<String>,
    /// User-Agent header.
    pub user_agent: Option<String>,
    /// Impersonator identity, when applicable.
    pub impersonator_id: Option<UserId>,
    /// Free-form structured detail.
    pub metadata: Option<serde_json::Value>,
}

/// Filter set for audit queries.
#[derive(Debug, Clone, Default)]
pub struct AuditQuery {
    /// Restrict to one event type.
    pub event_type: Option<String>,
    /// Restrict to one acting user.
    pub actor_user_id: Option<UserId>,
    /// Restrict to one target kind.
    pub target_type: Option<String>,
    /// Restrict to one target id.
    pub target_id: Option<String>,
    /// Restrict to one tenant; `None` does not filter.
    pub tenant_id: Option<TenantId>,
    /// Restrict to one outcome.
    pub result: Option<AuditResult>,
    /// Window start, inclusive.
    pub from: Option<DateTime<Utc>>,
    /// Window end, exclusive.
    pub to: Option<DateTime<Utc>>,
    /// 1-based page number.
    pub page: u32,
    /// Page size; capped at [`AUDIT_PAGE_SIZE_MAX`].
    pub page_size: u32,
}

impl AuditQuery {
    /// Returns the effective page (1-based) and page size after clamping.
    #[must_use]
    pub fn effective_page(&self) -> (u32, u32) {
        let page = self.page.max(1);
        let page_size = if self.page_size == 0 {
            AUDIT_PAGE_SIZE_DEFAULT
        } else {
            self.page_size.min(AUDIT_PAGE_SIZE_MAX)
        };

        (page, page_size)
    }
}

/// Append-only repository port for audit events.
#[async_trait]
pub trait AuditRepository: Send + Sync {
    /// Appends an event, assigning id, sequence, and timestamp.
    async fn append(&self, event: AuditEvent) -> AppResult<AuditEventRecord>;

    /// Lists events matching the query, newest first.
    async fn query(&self, query: AuditQuery) -> AppResult<Vec<AuditEventRecord>>;

    /// Counts events matching the query, ignoring pagination.
    async fn count(&self, query: AuditQuery) -> AppResult<i64>;
}

/// Fan-out port invoked after an event commits.
///
/// Implementations must only persist delivery intents; they never perform
/// network I/O on this path.
#[async_trait]
pub trait AuditFanout: Send + Sync {
    /// Hands a committed event to the dispatcher.
    async fn publish(&self, event: &AuditEventRecord) -> AppResult<()>;
}

/// Fan-out that drops events; used where no dispatcher is wired.
pub struct NoopFanout;

#[async_trait]
impl AuditFanout for NoopFanout {
    async fn publish(&self, _event: &AuditEventRecord) -> AppResult<()> {
        Ok(())
    }
}

/// Application service for the audit pipeline.
#[derive(Clone)]
pub struct AuditService {
    repository: Arc<dyn AuditRepository>,
    fanout: Arc<dyn AuditFanout>,
}

impl AuditService {
    /// Creates an audit service without webhook fan-out.
    #[must_use]
    pub fn new(repository: Arc<dyn AuditRepository>) -> Self {
        Self {
            repository,
            fanout: Arc::new(NoopFanout),
        }
    }

    /// Attaches the webhook fan-out.
    #[must_use]
    pub fn with_fanout(mut self, fanout: Arc<dyn AuditFanout>) -> Self {
        self.fanout = fanout;
        self
    }

    /// Records an event.
    ///
    /// Fails with `audit_reason_required` when the event type is destructive
    /// and no non-empty reason was supplied. Fan-out failures are swallowed:
    /// delivery is retryable, the audit record is not.
    pub async fn record(&self, event: AuditEvent) -> AppResult<AuditEventRecord> {
        if event.event_type.requires_reason()
            && event
                .reason
                .as_deref()
                .is_none_or(|reason| reason.trim().is_empty())
        {
            return Err(AppError::AuditReasonRequired);
        }

        let record = self.repository.append(event).await?;

        // The audit record stands regardless of what fan-out does; enqueue
        // failures must never fail the recording path.
        let _ = self.fanout.publish(&record).await;

        Ok(record)
    }

    /// Lists events matching the query.
    pub async fn query(&self, query: AuditQuery) -> AppResult<Vec<AuditEventRecord>> {
        self.repository.query(query).await
    }

    /// Counts events matching the query.
    pub async fn count(&self, query: AuditQuery) -> AppResult<i64> {
        self.repository.count(query).await
    }

    /// Exports events matching the query as CSV.
    pub async fn export(&self, query: AuditQuery) -> AppResult<String> {
        let events = self.repository.query(query).await?;
        Ok(export_csv(&events))
    }
}

/// Renders audit events as CSV with the stable operator column set.
#[must_use]
pub fn export_csv(events: &[AuditEventRecord]) -> String {
    let mut output =
        String::from("Event ID,Timestamp,Event Type,Actor,Result,IP,Target Type,Target ID\n");

    for event in events {
        let actor = event
            .actor_username
            .clone()
            .or_else(|| event.actor_user_id.map(|id| id.to_string()))
            .unwrap_or_default();

        let row = [
            event.id.to_string(),
            event.timestamp.to_rfc3339(),
            event.event_type.clone(),
            actor,
            event.result.as_str().to_owned(),
            event.source_ip.clone().unwrap_or_default(),
            event.target_type.clone().unwrap_or_default(),
            event.target_id.clone().unwrap_or_default(),
        ];

        let escaped: Vec<String> = row.iter().map(|field| escape_csv_field(field)).collect();
        output.push_str(&escaped.join(","));
        output.push('\n');
    }

    output
}

fn escape_csv_field(field: &str) -> String {
    if field.contains(',') || field.contains('"') || field.contains('\n') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_owned()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::Utc;
    use uuid::Uuid;

    use clavis_core::{AppError, AppResult};
    use clavis_domain::{AuditEventType, AuditResult};

    use super::*;

    struct FakeAuditRepository {
        events: Mutex<Vec<AuditEventRecord>>,
    }

    impl FakeAuditRepository {
        fn new() -> Self {
            Self {
                events: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl AuditRepository for FakeAuditRepository {
        async fn append(&self, event: AuditEvent) -> AppResult<AuditEventRecord> {
            let mut events = self
                .events
                .lock()
                .map_err(|_| AppError::Internal("lock poisoned".to_owned()))?;
            let sequence = events.len() as i64 + 1;
            let record = AuditEventRecord {
                id: Uuid::new_v4(),
                sequence,
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
            let events = self
                .events
                .lock()
                .map_err(|_| AppError::Internal("lock poisoned".to_owned()))?;
            Ok(events.clone())
        }

        async fn count(&self, _query: AuditQuery) -> AppResult<i64> {
            let events = self
                .events
                .lock()
                .map_err(|_| AppError::Internal("lock poisoned".to_owned()))?;
            Ok(events.len() as i64)
        }
    }

    fn service() -> AuditService {
        AuditService::new(Arc::new(FakeAuditRepository::new()))
    }

    #[tokio::test]
    async fn destructive_event_without_reason_is_rejected() {
        let result = service()
            .record(AuditEvent::new(
                AuditEventType::UserDeleted,
                AuditResult::Success,
                &AuditContext::default(),
            ))
            .await;

        assert!(matches!(result, Err(AppError::AuditReasonRequired)));
    }

    #[tokio::test]
    async fn destructive_event_with_blank_reason_is_rejected() {
        let event = AuditEvent::new(
            AuditEventType::WebhookDeleted,
            AuditResult::Success,
            &AuditContext::default(),
        )
        .reason(Some("   ".to_owned()));

        let result = service().record(event).await;
        assert!(matches!(result, Err(AppError::AuditReasonRequired)));
    }

    #[tokio::test]
    async fn destructive_event_with_reason_is_recorded() {
        let event = AuditEvent::new(
            AuditEventType::UserDeleted,
            AuditResult::Success,
            &AuditContext::default(),
        )
        .reason(Some("offboarding ticket OPS-1421".to_owned()));

        let record = service().record(event).await;
        assert!(record.is_ok());
    }

    #[tokio::test]
    async fn sequence_is_monotonic() {
        let service = service();
        let context = AuditContext::default();

        let first = service
            .record(AuditEvent::new(
                AuditEventType::LoginPassword,
                AuditResult::Success,
                &context,
            ))
            .await;
        let second = service
            .record(AuditEvent::new(
                AuditEventType::TokenIssued,
                AuditResult::Success,
                &context,
            ))
            .await;

        let first = first.unwrap_or_else(|_| panic!("test"));
        let second = second.unwrap_or_else(|_| panic!("test"));
        assert!(second.sequence > first.sequence);
    }

    #[test]
    fn page_clamping_applies_default_and_max() {
        let mut query = AuditQuery::default();
        assert_eq!(query.effective_page(), (1, AUDIT_PAGE_SIZE_DEFAULT));

        query.page = 3;
        query.page_size = 5000;
        assert_eq!(query.effective_page(), (3, AUDIT_PAGE_SIZE_MAX));
    }

    #[test]
    fn csv_export_has_stable_columns_and_escaping() {
        let record = AuditEventRecord {
            id: Uuid::nil(),
            sequence: 1,
            timestamp: Utc::now(),
            event_type: "user.deleted".to_owned(),
            result: AuditResult::Success,
            actor_user_id: None,
            actor_principal_type: None,
            actor_username: Some("smith, alice".to_owned()),
            target_type: Some("user".to_owned()),
            target_id: Some("u-1".to_owned()),
            tenant_id: None,
            error_code: None,
            reason: None,
            source_ip: Some("10.0.0.1".to_owned()),
            user_agent: None,
            impersonator_id: None,
            metadata: None,
        };

        let csv = export_csv(&[record]);
        let mut lines = csv.lines();
        assert_eq!(
            lines.next(),
            Some("Event ID,Timestamp,Event Type,Actor,Result,IP,Target Type,Target ID")
        );
        let row = lines.next().unwrap_or_default();
        assert!(row.contains("\"smith, alice\""));
        assert!(row.contains("user.deleted"));
        assert!(row.ends_with("user,u-1"));
    }
}
