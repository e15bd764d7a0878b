use axum::extract::{Request, State};
use axum::http::{HeaderMap, header};
use axum::middleware::Next;
use axum::response::Response;

use clavis_application::{AuditContext, Principal, RateLimitRule};
use clavis_core::{AppError, TenantId};

use crate::error::ApiResult;
use crate::state::AppState;

/// Tenant scope of the current request, validated against the token.
#[derive(Debug, Clone, Copy)]
pub struct TenantContext(pub TenantId);

/// Decodes the bearer token, consults the revocation blacklist, and inserts
/// the [`Principal`] into request extensions.
pub async fn require_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> ApiResult<Response> {
    let token = bearer_token(request.headers())?;
    let claims = state.token_service.authenticate_access_token(token).await?;
    let principal = Principal::from_claims(&claims)?;

    request.extensions_mut().insert(principal);
    Ok(next.run(request).await)
}

/// Validates the `X-Tenant-Id` header against the principal's tenant and
/// inserts the [`TenantContext`].
///
/// SYSTEM principals without an impersonation session are rejected here:
/// they have no tenant selected.
pub async fn require_tenant_context(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> ApiResult<Response> {
    let principal = request
        .extensions()
        .get::<Principal>()
        .cloned()
        .ok_or_else(|| AppError::Unauthorized("authentication required".to_owned()))?;

    let tenant_id = tenant_header(request.headers())?;
    state
        .authorization
        .require_tenant_context(&principal, tenant_id)?;

    // Per-tenant cap from tenant settings, keyed per principal.
    let settings = state.tenant_service.settings(tenant_id).await?;
    let tenant_rule = RateLimitRule::new(
        format!("tenant:{tenant_id}"),
        settings.rate_limit_per_minute,
        60,
    );
    state
        .rate_limit_service
        .check_rate_limit(&tenant_rule, &principal.user_id.to_string())
        .await?;

    request.extensions_mut().insert(TenantContext(tenant_id));
    Ok(next.run(request).await)
}

/// Rate limiting middleware keyed per principal (or client IP before
/// authentication), with the rule injected via `Extension<RateLimitRule>`.
pub async fn rate_limit(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> ApiResult<Response> {
    let rule = request
        .extensions()
        .get::<RateLimitRule>()
        .cloned()
        .ok_or_else(|| {
            AppError::Internal(
                "rate limit middleware misconfigured: missing RateLimitRule extension".to_owned(),
            )
        })?;

    let key = request
        .extensions()
        .get::<Principal>()
        .map(|principal| principal.user_id.to_string())
        .unwrap_or_else(|| extract_client_ip(request.headers()));

    state.rate_limit_service.check_rate_limit(&rule, &key).await?;

    Ok(next.run(request).await)
}

/// Reads the bearer token from the `Authorization` header.
pub fn bearer_token(headers: &HeaderMap) -> Result<&str, AppError> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or_else(|| AppError::Unauthorized("bearer token required".to_owned()))
}

/// Reads and parses the `X-Tenant-Id` header.
pub fn tenant_header(headers: &HeaderMap) -> Result<TenantId, AppError> {
    let raw = headers
        .get("x-tenant-id")
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| {
            AppError::ForbiddenTenant("x-tenant-id header is required".to_owned())
        })?;

    uuid::Uuid::parse_str(raw.trim())
        .map(TenantId::from_uuid)
        .map_err(|_| AppError::ForbiddenTenant("x-tenant-id header is invalid".to_owned()))
}

/// Builds the audit context for a request.
pub fn audit_context(principal: Option<&Principal>, headers: &HeaderMap) -> AuditContext {
    let mut context = AuditContext {
        source_ip: Some(extract_client_ip(headers)),
        user_agent: headers
            .get(header::USER_AGENT)
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned),
        ..AuditContext::default()
    };

    if let Some(principal) = principal {
        context.actor_user_id = Some(principal.user_id);
        context.actor_principal_type = Some(principal.principal_type);
        context.tenant_id = principal.tenant_id;
        context.impersonator_id = principal
            .impersonation
            .as_ref()
            .map(|session| session.impersonator_id);
    }

    context
}

/// Extracts the client IP address from request headers.
///
/// Prefers `X-Forwarded-For` (first entry) for reverse-proxy setups,
/// falls back to `X-Real-Ip`, then to `"unknown"`.
pub fn extract_client_ip(headers: &HeaderMap) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|forwarded| forwarded.split(',').next())
        .map(|ip| ip.trim().to_owned())
        .or_else(|| {
            headers
                .get("x-real-ip")
                .and_then(|value| value.to_str().ok())
                .map(|ip| ip.trim().to_owned())
        })
        .unwrap_or_else(|| "unknown".to_owned())
}
