use axum::Json;
use axum::extract::{Extension, State};
use axum::http::{HeaderMap, StatusCode};

use clavis_application::{LoginOutcome, Principal};
use clavis_core::AppError;
use clavis_domain::{PermissionKey, UserId};

use crate::dto::{
    ChallengeVerifyRequest, LoginRequest, LoginResponse, LogoutRequest, RefreshRequest,
    RevokeSessionsRequest, TokenResponse,
};
use crate::error::ApiResult;
use crate::middleware::{TenantContext, audit_context, tenant_header};
use crate::state::AppState;

/// POST /api/v1/auth/login - Password step of the state machine.
///
/// Returns tokens directly, or a challenge id when MFA must complete first.
pub async fn login(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<LoginRequest>,
) -> ApiResult<Json<LoginResponse>> {
    let tenant_id = tenant_header(&headers)?;
    let mut context = audit_context(None, &headers);
    context.tenant_id = Some(tenant_id);

    let outcome = state
        .auth_service
        .authenticate(
            &context,
            Some(tenant_id),
            &payload.username,
            &payload.password,
            payload.remember_me,
        )
        .await?;

    match outcome {
        LoginOutcome::TokensIssued(pair) => Ok(Json(LoginResponse::tokens(pair))),
        LoginOutcome::MfaRequired { challenge_id } => {
            Ok(Json(LoginResponse::challenge(challenge_id)))
        }
    }
}

/// POST /system/auth/login - SYSTEM-plane password step.
pub async fn system_login(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<LoginRequest>,
) -> ApiResult<Json<LoginResponse>> {
    let context = audit_context(None, &headers);

    let outcome = state
        .auth_service
        .authenticate(
            &context,
            None,
            &payload.username,
            &payload.password,
            payload.remember_me,
        )
        .await?;

    match outcome {
        LoginOutcome::TokensIssued(pair) => Ok(Json(LoginResponse::tokens(pair))),
        LoginOutcome::MfaRequired { challenge_id } => {
            Ok(Json(LoginResponse::challenge(challenge_id)))
        }
    }
}

/// POST /api/v1/mfa/challenge/verify - MFA step of the state machine.
pub async fn verify_challenge(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<ChallengeVerifyRequest>,
) -> ApiResult<Json<TokenResponse>> {
    let context = audit_context(None, &headers);

    let pair = state
        .auth_service
        .verify_challenge(&context, payload.challenge_id, &payload.code)
        .await?;

    Ok(Json(TokenResponse::from(pair)))
}

/// POST /api/v1/auth/refresh - Single-use rotation.
pub async fn refresh(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<RefreshRequest>,
) -> ApiResult<Json<TokenResponse>> {
    let context = audit_context(None, &headers);

    let pair = state
        .token_service
        .refresh(&context, &payload.refresh_token)
        .await?;

    Ok(Json(TokenResponse::from(pair)))
}

/// POST /api/v1/auth/logout - Revokes the presenting session.
pub async fn logout(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    headers: HeaderMap,
    Json(payload): Json<LogoutRequest>,
) -> ApiResult<StatusCode> {
    let context = audit_context(Some(&principal), &headers);

    state
        .token_service
        .logout(
            &context,
            &payload.refresh_token,
            Some((principal.jti, principal.token_expires_at)),
        )
        .await?;

    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/v1/auth/revoke - Revokes every session of a user.
///
/// Administrator path: requires `tenant.users:manage` plus an audit reason.
pub async fn revoke_sessions(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Extension(TenantContext(tenant_id)): Extension<TenantContext>,
    headers: HeaderMap,
    Json(payload): Json<RevokeSessionsRequest>,
) -> ApiResult<StatusCode> {
    state.authorization.require_tenant(
        &principal,
        tenant_id,
        &PermissionKey::new("tenant.users", "manage")?,
    )?;

    let target = UserId::from_uuid(payload.user_id);
    state
        .user_service
        .find_in_tenant(tenant_id, target)
        .await?;

    if payload.reason.trim().is_empty() {
        return Err(AppError::AuditReasonRequired.into());
    }

    let context = audit_context(Some(&principal), &headers);
    state
        .token_service
        .revoke_all_for_user(&context, target, Some(payload.reason))
        .await?;

    Ok(StatusCode::NO_CONTENT)
}
