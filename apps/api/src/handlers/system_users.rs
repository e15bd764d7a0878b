use axum::Json;
use axum::extract::{Extension, Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use uuid::Uuid;

use clavis_application::Principal;
use clavis_core::AppError;
use clavis_domain::{PrincipalType, SystemPermission, UserId};

use crate::dto::{CreateUserRequest, PageQuery, ReasonParams, UserResponse};
use crate::error::ApiResult;
use crate::middleware::audit_context;
use crate::state::AppState;

/// GET /system/users - List SYSTEM principals.
pub async fn list(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Query(page): Query<PageQuery>,
) -> ApiResult<Json<Vec<UserResponse>>> {
    state
        .authorization
        .require_system(&principal, SystemPermission::SystemUsersRead)?;

    let users = state
        .user_service
        .list_users(None, page.page(), page.page_size())
        .await?;

    Ok(Json(users.into_iter().map(UserResponse::from).collect()))
}

/// POST /system/users - Create a SYSTEM principal.
pub async fn create(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    headers: HeaderMap,
    Json(payload): Json<CreateUserRequest>,
) -> ApiResult<(StatusCode, Json<UserResponse>)> {
    state
        .authorization
        .require_system(&principal, SystemPermission::SystemUsersManage)?;

    let context = audit_context(Some(&principal), &headers);
    let user = state
        .user_service
        .create_user(
            &context,
            None,
            PrincipalType::System,
            &payload.username,
            &payload.email,
            &payload.password,
        )
        .await?;

    Ok((StatusCode::CREATED, Json(UserResponse::from(user))))
}

/// GET /system/users/{id} - Read a SYSTEM principal.
pub async fn get(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(user_id): Path<Uuid>,
) -> ApiResult<Json<UserResponse>> {
    state
        .authorization
        .require_system(&principal, SystemPermission::SystemUsersRead)?;

    let user = state
        .user_service
        .find_by_id(UserId::from_uuid(user_id))
        .await?
        .filter(|user| user.principal_type == PrincipalType::System)
        .ok_or_else(|| AppError::NotFound("user not found".to_owned()))?;

    Ok(Json(UserResponse::from(user)))
}

/// DELETE /system/users/{id} - Delete a SYSTEM principal. Requires a reason.
pub async fn delete(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(user_id): Path<Uuid>,
    Query(reason): Query<ReasonParams>,
    headers: HeaderMap,
) -> ApiResult<StatusCode> {
    state
        .authorization
        .require_system(&principal, SystemPermission::SystemUsersManage)?;

    let target = UserId::from_uuid(user_id);
    state
        .user_service
        .find_by_id(target)
        .await?
        .filter(|user| user.principal_type == PrincipalType::System)
        .ok_or_else(|| AppError::NotFound("user not found".to_owned()))?;

    if principal.user_id == target {
        return Err(AppError::Conflict(
            "a SYSTEM principal cannot delete itself".to_owned(),
        )
        .into());
    }

    let context = audit_context(Some(&principal), &headers);
    state
        .user_service
        .delete_user(&context, target, reason.reason)
        .await?;

    Ok(StatusCode::NO_CONTENT)
}

/// POST /system/users/{id}/revoke-sessions - Revoke every session of a user.
pub async fn revoke_sessions(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(user_id): Path<Uuid>,
    Query(reason): Query<ReasonParams>,
    headers: HeaderMap,
) -> ApiResult<StatusCode> {
    state
        .authorization
        .require_system(&principal, SystemPermission::SystemUsersManage)?;

    let context = audit_context(Some(&principal), &headers);
    state
        .token_service
        .revoke_all_for_user(&context, UserId::from_uuid(user_id), reason.reason)
        .await?;

    Ok(StatusCode::NO_CONTENT)
}
