use axum::Json;
use axum::extract::{Extension, Path, State};
use axum::http::{HeaderMap, StatusCode};
use uuid::Uuid;

use clavis_application::Principal;
use clavis_domain::PermissionKey;

use crate::dto::{CreateRoleRequest, RoleResponse, UpdateRoleRequest};
use crate::error::ApiResult;
use crate::middleware::{TenantContext, audit_context};
use crate::state::AppState;

/// GET /api/v1/roles - List tenant roles.
pub async fn list(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Extension(TenantContext(tenant_id)): Extension<TenantContext>,
) -> ApiResult<Json<Vec<RoleResponse>>> {
    state.authorization.require_tenant(
        &principal,
        tenant_id,
        &PermissionKey::new("tenant.users", "read")?,
    )?;

    let roles = state.rbac_service.list_roles(tenant_id).await?;
    Ok(Json(roles.into_iter().map(RoleResponse::from).collect()))
}

/// POST /api/v1/roles - Create a tenant role.
pub async fn create(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Extension(TenantContext(tenant_id)): Extension<TenantContext>,
    headers: HeaderMap,
    Json(payload): Json<CreateRoleRequest>,
) -> ApiResult<(StatusCode, Json<RoleResponse>)> {
    state.authorization.require_tenant(
        &principal,
        tenant_id,
        &PermissionKey::new("tenant.roles", "manage")?,
    )?;

    let context = audit_context(Some(&principal), &headers);
    let role = state
        .rbac_service
        .create_role(&context, tenant_id, &payload.name, payload.description)
        .await?;

    Ok((StatusCode::CREATED, Json(RoleResponse::from(role))))
}

/// PUT /api/v1/roles/{id} - Update a tenant role.
pub async fn update(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Extension(TenantContext(tenant_id)): Extension<TenantContext>,
    Path(role_id): Path<Uuid>,
    headers: HeaderMap,
    Json(payload): Json<UpdateRoleRequest>,
) -> ApiResult<StatusCode> {
    state.authorization.require_tenant(
        &principal,
        tenant_id,
        &PermissionKey::new("tenant.roles", "manage")?,
    )?;

    let context = audit_context(Some(&principal), &headers);
    state
        .rbac_service
        .update_role(&context, tenant_id, role_id, payload.description)
        .await?;

    Ok(StatusCode::NO_CONTENT)
}

/// DELETE /api/v1/roles/{id} - Delete a tenant role.
pub async fn delete(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Extension(TenantContext(tenant_id)): Extension<TenantContext>,
    Path(role_id): Path<Uuid>,
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
        .delete_role(&context, tenant_id, role_id)
        .await?;

    Ok(StatusCode::NO_CONTENT)
}
