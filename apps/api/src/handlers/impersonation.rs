use axum::Json;
use axum::extract::{Extension, Path, State};
use axum::http::{HeaderMap, StatusCode};
use uuid::Uuid;

use clavis_application::Principal;
use clavis_core::TenantId;
use clavis_domain::{SystemPermission, UserId};

use crate::dto::{EndImpersonationRequest, ImpersonationResponse, StartImpersonationRequest};
use crate::error::ApiResult;
use crate::middleware::audit_context;
use crate::state::AppState;

/// POST /system/impersonation - Start a tenant-scoped impersonation session.
pub async fn start(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    headers: HeaderMap,
    Json(payload): Json<StartImpersonationRequest>,
) -> ApiResult<(StatusCode, Json<ImpersonationResponse>)> {
    state
        .authorization
        .require_system(&principal, SystemPermission::UsersImpersonate)?;

    let context = audit_context(Some(&principal), &headers);
    let session = state
        .impersonation_service
        .start(
            &context,
            &principal,
            TenantId::from_uuid(payload.tenant_id),
            UserId::from_uuid(payload.target_user_id),
            Some(payload.reason),
        )
        .await?;

    Ok((StatusCode::CREATED, Json(ImpersonationResponse::from(session))))
}

/// DELETE /system/impersonation/{id} - End a session, revoking its token.
pub async fn end(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(session_id): Path<Uuid>,
    headers: HeaderMap,
    payload: Option<Json<EndImpersonationRequest>>,
) -> ApiResult<StatusCode> {
    state
        .authorization
        .require_system(&principal, SystemPermission::UsersImpersonate)?;

    let reason = payload.and_then(|Json(body)| body.reason);
    let context = audit_context(Some(&principal), &headers);
    state
        .impersonation_service
        .end(&context, session_id, reason)
        .await?;

    Ok(StatusCode::NO_CONTENT)
}
