//! SYSTEM-initiated, tenant-scoped impersonation.
//!
//! An impersonation session mints a short-lived access token that acts as the
//! target user inside one tenant while carrying the impersonator's identity.
//! Start and end are destructive audit events; ending revokes the token.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use clavis_core::{AppError, AppResult, TenantId};
use clavis_domain::{AuditEventType, AuditResult, PrincipalType, UserId};

use crate::audit_service::{AuditContext, AuditEvent, AuditService};
use crate::authorization_service::Principal;
use crate::token_service::{IMPERSONATION_ACCESS_TTL_MINUTES, TokenService};
use crate::user_service::UserRepository;

/// Lifetime of an impersonation token, minutes.
pub const IMPERSONATION_TTL_MINUTES: i64 = IMPERSONATION_ACCESS_TTL_MINUTES;

// ---------------------------------------------------------------------------
// Ports
// ---------------------------------------------------------------------------

/// Impersonation session as persisted.
#[derive(Debug, Clone)]
pub struct ImpersonationSessionRecord {
    /// Session identifier.
    pub id: Uuid,
    /// The SYSTEM user driving the session.
    pub impersonator_id: UserId,
    /// The tenant user being impersonated.
    pub target_user_id: UserId,
    /// Tenant scope of the session.
    pub tenant_id: TenantId,
    /// `jti` of the impersonation token, revoked at session end.
    pub token_jti: Uuid,
    /// Session start.
    pub started_at: DateTime<Utc>,
    /// Session end, when ended.
    pub ended_at: Option<DateTime<Utc>>,
    /// Caller-supplied justification.
    pub reason: String,
}

/// Repository port for impersonation sessions.
#[async_trait]
pub trait ImpersonationRepository: Send + Sync {
    /// Persists a started session. Returns its id.
    async fn create(
        &self,
        impersonator_id: UserId,
        target_user_id: UserId,
        tenant_id: TenantId,
        token_jti: Uuid,
        reason: &str,
    ) -> AppResult<Uuid>;

    /// Finds a session by id.
    async fn find_by_id(&self, id: Uuid) -> AppResult<Option<ImpersonationSessionRecord>>;

    /// Stamps the session end.
    async fn end(&self, id: Uuid, ended_at: DateTime<Utc>) -> AppResult<()>;
}

/// A started impersonation session and its token.
#[derive(Debug, Clone)]
pub struct StartedImpersonation {
    /// Session identifier, used to end the session.
    pub session_id: Uuid,
    /// Impersonation access token; banner-visible via its claims.
    pub access_token: String,
    /// Token expiry.
    pub expires_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Service
// ---------------------------------------------------------------------------

/// Application service for impersonation sessions.
#[derive(Clone)]
pub struct ImpersonationService {
    repository: Arc<dyn ImpersonationRepository>,
    user_repository: Arc<dyn UserRepository>,
    tokens: TokenService,
    audit: AuditService,
}

impl ImpersonationService {
    /// Creates a new impersonation service.
    #[must_use]
    pub fn new(
        repository: Arc<dyn ImpersonationRepository>,
        user_repository: Arc<dyn UserRepository>,
        tokens: TokenService,
        audit: AuditService,
    ) -> Self {
        Self {
            repository,
            user_repository,
            tokens,
            audit,
        }
    }

    /// Starts an impersonation session.
    ///
    /// The caller must already hold `users:impersonate`; this service
    /// re-checks the tenant scope: the target must belong to the selected
    /// tenant, cross-tenant impersonation is forbidden.
    pub async fn start(
        &self,
        context: &AuditContext,
        impersonator: &Principal,
        tenant_id: TenantId,
        target_user_id: UserId,
        reason: Option<String>,
    ) -> AppResult<StartedImpersonation> {
        let Some(reason) = reason.filter(|value| !value.trim().is_empty()) else {
            return Err(AppError::AuditReasonRequired);
        };

        if impersonator.principal_type != PrincipalType::System
            || impersonator.impersonation.is_some()
        {
            return Err(AppError::ForbiddenPlane(
                "impersonation requires a SYSTEM principal".to_owned(),
            ));
        }

        let target = self
            .user_repository
            .find_by_id(target_user_id)
            .await?
            .ok_or_else(|| AppError::NotFound("target user not found".to_owned()))?;

        if target.tenant_id != Some(tenant_id) {
            return Err(AppError::ForbiddenTenant(
                "target user does not belong to the selected tenant".to_owned(),
            ));
        }

        let (access_token, token_jti, expires_at) = self
            .tokens
            .issue_impersonation_token(&target, tenant_id, impersonator.user_id)
            .await?;

        let session_id = self
            .repository
            .create(
                impersonator.user_id,
                target_user_id,
                tenant_id,
                token_jti,
                &reason,
            )
            .await?;

        self.audit
            .record(
                AuditEvent::new(
                    AuditEventType::ImpersonationStarted,
                    AuditResult::Success,
                    context,
                )
                .target("user", target_user_id)
                .reason(Some(reason))
                .metadata(serde_json::json!({
                    "session_id": session_id,
                    "tenant_id": tenant_id,
                })),
            )
            .await?;

        Ok(StartedImpersonation {
            session_id,
            access_token,
            expires_at,
        })
    }

    /// Ends an impersonation session, revoking its token.
    pub async fn end(
        &self,
        context: &AuditContext,
        session_id: Uuid,
        reason: Option<String>,
    ) -> AppResult<()> {
        let session = self
            .repository
            .find_by_id(session_id)
            .await?
            .ok_or_else(|| AppError::NotFound("impersonation session not found".to_owned()))?;

        if session.ended_at.is_some() {
            return Err(AppError::Conflict(
                "impersonation session already ended".to_owned(),
            ));
        }

        let now = Utc::now();
        self.tokens
            .revoke_access(
                context,
                session.token_jti,
                session.started_at + chrono::Duration::minutes(IMPERSONATION_TTL_MINUTES),
                reason.clone().or_else(|| Some("impersonation ended".to_owned())),
            )
            .await?;
        self.repository.end(session_id, now).await?;

        self.audit
            .record(
                AuditEvent::new(
                    AuditEventType::ImpersonationEnded,
                    AuditResult::Success,
                    context,
                )
                .target("user", session.target_user_id)
                .reason(reason.or_else(|| Some("impersonation ended".to_owned())))
                .metadata(serde_json::json!({ "session_id": session_id })),
            )
            .await?;

        Ok(())
    }

    /// Returns a session by id.
    pub async fn find_by_id(&self, id: Uuid) -> AppResult<Option<ImpersonationSessionRecord>> {
        self.repository.find_by_id(id).await
    }
}
