//! PostgreSQL-backed append-only audit repository.
//!
//! Events get a server-assigned timestamp and a `BIGSERIAL` sequence that
//! breaks timestamp ties; nothing ever updates or deletes a row.

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use clavis_application::{AuditEvent, AuditEventRecord, AuditQuery, AuditRepository};
use clavis_core::{AppError, AppResult, TenantId};
use clavis_domain::{AuditResult, PrincipalType, UserId};

/// PostgreSQL implementation of the audit repository port.
#[derive(Clone)]
pub struct PostgresAuditRepository {
    pool: PgPool,
}

impl PostgresAuditRepository {
    /// Creates a repository with the provided connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const EVENT_COLUMNS: &str = r#"
    id, sequence, timestamp, event_type, result, actor_user_id,
    actor_principal_type, actor_username, target_type, target_id, tenant_id,
    error_code, reason, source_ip, user_agent, impersonator_id, metadata
"#;

#[derive(Debug, sqlx::FromRow)]
struct AuditEventRow {
    id: uuid::Uuid,
    sequence: i64,
    timestamp: DateTime<Utc>,
    event_type: String,
    result: String,
    actor_user_id: Option<uuid::Uuid>,
    actor_principal_type: Option<String>,
    actor_username: Option<String>,
    target_type: Option<String>,
    target_id: Option<String>,
    tenant_id: Option<uuid::Uuid>,
    error_code: Option<String>,
    reason: Option<String>,
    source_ip: Option<String>,
    user_agent: Option<String>,
    impersonator_id: Option<uuid::Uuid>,
    metadata: Option<serde_json::Value>,
}

impl TryFrom<AuditEventRow> for AuditEventRecord {
    type Error = AppError;

    fn try_from(row: AuditEventRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            sequence: row.sequence,
            timestamp: row.timestamp,
            event_type: row.event_type,
            result: AuditResult::parse(&row.result)?,
            actor_user_id: row.actor_user_id.map(UserId::from_uuid),
            actor_principal_type: row
                .actor_principal_type
                .as_deref()
                .map(PrincipalType::from_str)
                .transpose()?,
            actor_username: row.actor_username,
            target_type: row.target_type,
            target_id: row.target_id,
            tenant_id: row.tenant_id.map(TenantId::from_uuid),
            error_code: row.error_code,
            reason: row.reason,
            source_ip: row.source_ip,
            user_agent: row.user_agent,
            impersonator_id: row.impersonator_id.map(UserId::from_uuid),
            metadata: row.metadata,
        })
    }
}

#[async_trait]
impl AuditRepository for PostgresAuditRepository {
    async fn append(&self, event: AuditEvent) -> AppResult<AuditEventRecord> {
        let row = sqlx::query_as::<_, AuditEventRow>(&format!(
            r#"
            INSERT INTO audit_events (
                event_type, result, actor_user_id, actor_principal_type,
                actor_username, target_type, target_id, tenant_id, error_code,
                reason, source_ip, user_agent, impersonator_id, metadata
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            RETURNING {EVENT_COLUMNS}
            "#
        ))
        .bind(event.event_type.as_str())
        .bind(event.result.as_str())
        .bind(event.actor_user_id.map(|user_id| user_id.as_uuid()))
        .bind(event.actor_principal_type.map(|kind| kind.as_str()))
        .bind(event.actor_username.as_deref())
        .bind(event.target_type.as_deref())
        .bind(event.target_id.as_deref())
        .bind(event.tenant_id.map(|tenant_id| tenant_id.as_uuid()))
        .bind(event.error_code.as_deref())
        .bind(event.reason.as_deref())
        .bind(event.source_ip.as_deref())
        .bind(event.user_agent.as_deref())
        .bind(event.impersonator_id.map(|user_id| user_id.as_uuid()))
        .bind(event.metadata)
        .fetch_one(&self.pool)
        .await
        .map_err(|error| AppError::Internal(format!("failed to append audit event: {error}")))?;

        AuditEventRecord::try_from(row)
    }

    async fn query(&self, query: AuditQuery) -> AppResult<Vec<AuditEventRecord>> {
        let (page, page_size) = query.effective_page();
        let offset = i64::from(page - 1) * i64::from(page_size);

        let rows = sqlx::query_as::<_, AuditEventRow>(&format!(
            r#"
            SELECT {EVENT_COLUMNS}
            FROM audit_events
            WHERE ($1::TEXT IS NULL OR event_type = $1)
                AND ($2::UUID IS NULL OR actor_user_id = $2)
                AND ($3::TEXT IS NULL OR target_type = $3)
                AND ($4::TEXT IS NULL OR target_id = $4)
                AND ($5::UUID IS NULL OR tenant_id = $5)
                AND ($6::TEXT IS NULL OR result = $6)
                AND ($7::TIMESTAMPTZ IS NULL OR timestamp >= $7)
                AND ($8::TIMESTAMPTZ IS NULL OR timestamp < $8)
            ORDER BY timestamp DESC, sequence DESC
            LIMIT $9 OFFSET $10
            "#
        ))
        .bind(query.event_type.as_deref())
        .bind(query.actor_user_id.map(|user_id| user_id.as_uuid()))
        .bind(query.target_type.as_deref())
        .bind(query.target_id.as_deref())
        .bind(query.tenant_id.map(|tenant_id| tenant_id.as_uuid()))
        .bind(query.result.map(|result| result.as_str()))
        .bind(query.from)
        .bind(query.to)
        .bind(i64::from(page_size))
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(|error| AppError::Internal(format!("failed to query audit events: {error}")))?;

        rows.into_iter().map(AuditEventRecord::try_from).collect()
    }

    async fn count(&self, query: AuditQuery) -> AppResult<i64> {
        sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*)
            FROM audit_events
            WHERE ($1::TEXT IS NULL OR event_type = $1)
                AND ($2::UUID IS NULL OR actor_user_id = $2)
                AND ($3::TEXT IS NULL OR target_type = $3)
                AND ($4::TEXT IS NULL OR target_id = $4)
                AND ($5::UUID IS NULL OR tenant_id = $5)
                AND ($6::TEXT IS NULL OR result = $6)
                AND ($7::TIMESTAMPTZ IS NULL OR timestamp >= $7)
                AND ($8::TIMESTAMPTZ IS NULL OR timestamp < $8)
            "#,
        )
        .bind(query.event_type.as_deref())
        .bind(query.actor_user_id.map(|user_id| user_id.as_uuid()))
        .bind(query.target_type.as_deref())
        .bind(query.target_id.as_deref())
        .bind(query.tenant_id.map(|tenant_id| tenant_id.as_uuid()))
        .bind(query.result.map(|result| result.as_str()))
        .bind(query.from)
        .bind(query.to)
        .fetch_one(&self.pool)
        .await
        .map_err(|error| AppError::Internal(format!("failed to count audit events: {error}")))
    }
}
