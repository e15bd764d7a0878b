use axum::Json;
use axum::extract::{Extension, Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use uuid::Uuid;

use clavis_application::Principal;
use clavis_core::AppError;
use clavis_domain::{PermissionKey, PrincipalType, UserId, UserStatus};

use crate::dto::{
    AssignRoleRequest, ChangePasswordRequest, CreateUserRequest, PageQuery, ReasonParams,
    UpdateUserRequest, UserResponse,
};
use crate::error::ApiResult;
use crate::middleware::{TenantContext, audit_context};
use crate::state::AppState;

/// GET /api/v1/users - List tenant users.
pub async fn list(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Extension(TenantContext(tenant_id)): Extension<TenantContext>,
    Query(page): Query<PageQuery>,
) -> ApiResult<Json<Vec<UserResponse>>> {
    state.authorization.require_tenant(
        &principal,
        tenant_id,
        &PermissionKey::new("tenant.users", "read")?,
    )?;

    let users = state
        .user_service
        .list_users(Some(tenant_id), page.page(), page.page_size())
        .await?;

    Ok(Json(users.into_iter().map(UserResponse::from).collect()))
}

/// POST /api/v1/users - Create a tenant user.
pub async fn create(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Extension(TenantContext(tenant_id)): Extension<TenantContext>,
    headers: HeaderMap,
    Json(payload): Json<CreateUserRequest>,
) -> ApiResult<(StatusCode, Json<UserResponse>)> {
    state.authorization.require_tenant(
        &principal,
        tenant_id,
        &PermissionKey::new("tenant.users", "manage")?,
    )?;

    let context = audit_context(Some(&principal), &headers);
    let user = state
        .user_service
        .create_user(
            &context,
            Some(tenant_id),
            PrincipalType::Tenant,
            &payload.username,
            &payload.email,
            &payload.password,
        )
        .await?;

    Ok((StatusCode::CREATED, Json(UserResponse::from(user))))
}

/// GET /api/v1/users/{id} - Read a tenant user.
pub async fn get(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Extension(TenantContext(tenant_id)): Extension<TenantContext>,
    Path(user_id): Path<Uuid>,
) -> ApiResult<Json<UserResponse>> {
    state.authorization.require_tenant(
        &principal,
        tenant_id,
        &PermissionKey::new("tenant.users", "read")?,
    )?;

    let user = state
        .user_service
        .find_in_tenant(tenant_id, UserId::from_uuid(user_id))
        .await?;

    Ok(Json(UserResponse::from(user)))
}

/// PUT /api/v1/users/{id} - Update a user's status.
pub async fn update(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Extension(TenantContext(tenant_id)): Extension<TenantContext>,
    Path(user_id): Path<Uuid>,
    headers: HeaderMap,
    Json(payload): Json<UpdateUserRequest>,
) -> ApiResult<StatusCode> {
    state.authorization.require_tenant(
        &principal,
        tenant_id,
        &PermissionKey::new("tenant.users", "manage")?,
    )?;

    let target = UserId::from_uuid(user_id);
    state.user_service.find_in_tenant(tenant_id, target).await?;

    let status = UserStatus::parse(&payload.status)?;
    let context = audit_context(Some(&principal), &headers);
    state.user_service.set_status(&context, target, status).await?;

    Ok(StatusCode::NO_CONTENT)
}

/// DELETE /api/v1/users/{id} - Delete a user. Requires an audit reason.
pub async fn delete(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Extension(TenantContext(tenant_id)): Extension<TenantContext>,
    Path(user_id): Path<Uuid>,
    Query(reason): Query<ReasonParams>,
    headers: HeaderMap,
) -> ApiResult<StatusCode> {
    state.authorization.require_tenant(
        &principal,
        tenant_id,
        &PermissionKey::new("tenant.users", "manage")?,
    )?;

    let target = UserId::from_uuid(user_id);
    state.user_service.find_in_tenant(tenant_id, target).await?;

    let context = audit_context(Some(&principal), &headers);
    state
        .user_service
        .delete_user(&context, target, reason.reason)
        .await?;

    Ok(StatusCode::NO_CONTENT)
}

/// PUT /api/v1/users/{id}/password - Change or reset a password.
///
/// Self-service requires the current password; the administrator reset path
/// requires `tenant.users:manage` instead.
pub async fn set_password(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Extension(TenantContext(tenant_id)): Extension<TenantContext>,
    Path(user_id): Path<Uuid>,
    headers: HeaderMap,
    Json(payload): Json<ChangePasswordRequest>,
) -> ApiResult<StatusCode> {
    let target = UserId::from_uuid(user_id);
    state.user_service.find_in_tenant(tenant_id, target).await?;
    let context = audit_context(Some(&principal), &headers);

    if principal.user_id == target {
        let current = payload.current_password.ok_or_else(|| {
            AppError::Validation("current_password is required".to_owned())
        })?;

        state
            .user_service
            .change_password(&context, target, &current, &payload.new_password)
            .await?;
    } else {
        state.authorization.require_tenant(
            &principal,
            tenant_id,
            &PermissionKey::new("tenant.users", "manage")?,
        )?;

        state
            .user_service
            .reset_password(&context, target, &payload.new_password)
            .await?;
    }

    Ok(StatusCode::NO_CONTENT)
}

/// DELETE /api/v1/users/{id}/mfa - Reset a user's MFA enrollment.
///
/// Destructive administrator path; requires an audit reason.
pub async fn reset_mfa(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Extension(TenantContext(tenant_id)): Extension<TenantContext>,
    Path(user_id): Path<Uuid>,
    Query(reason): Query<ReasonParams>,
    headers: HeaderMap,
) -> ApiResult<StatusCode> {
    state.authorization.require_tenant(
        &principal,
        tenant_id,
        &PermissionKey::new("tenant.users", "manage")?,
    )?;

    let target = UserId::from_uuid(user_id);
    state.user_service.find_in_tenant(tenant_id, target).await?;

    let context = audit_context(Some(&principal), &headers);
    state
        .mfa_service
        .reset_totp(&context, target, reason.reason)
        .await?;

    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/v1/users/{id}/roles - Assign a role.
pub async fn assign_role(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Extension(TenantContext(tenant_id)): Extension<TenantContext>,
    Path(user_id): Path<Uuid>,
    headers: HeaderMap,
    Json(payload): Json<AssignRoleRequest>,
) -> ApiResult<StatusCode> {
    state.authorization.require_tenant(
        &principal,
        tenant_id,
        &PermissionKey::new("tenant.roles", "manage")?,
    )?;

    let target = UserId::from_uuid(user_id);
    state.user_service.find_in_tenant(tenant_id, target).await?;

    let context = audit_context(Some(&principal), &headers);
    state
        .rbac_service
        .assign_role(&context, tenant_id, target, payload.role_id)
        .await?;

    Ok(StatusCode::NO_CONTENT)
}

/// DELETE /api/v1/users/{id}/roles/{role_id} - Remove a role assignment.
pub async fn unassign_role(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Extension(TenantContext(tenant_id)): Extension<TenantContext>,
    Path((user_id, role_id)): Path<(Uuid, Uuid)>,
    headers: HeaderMap,
) -> ApiResult<StatusCode> {
    state.authorization.require_tenant(
        &principal,
        tenant_id,
        &PermissionKey::new("tenant.roles", "manage")?,
    )?;

    let context = audit_context(Some(&principal), &headers);
    state
        .rbac_service
        .unassign_role(&context, tenant_id, UserId::from_uuid(user_id), role_id)
        .await?;

    Ok(StatusCode::NO_CONTENT)
}
