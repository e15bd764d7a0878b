use axum::Json;
use axum::extract::{Extension, Path, State};
use axum::http::{HeaderMap, StatusCode};
use uuid::Uuid;

use clavis_application::Principal;
use clavis_domain::PermissionKey;

use crate::dto::{CreatePermissionRequest, PermissionResponse};
use crate::error::ApiResult;
use crate::middleware::{TenantContext, audit_context};
use crate::state::AppState;

/// GET /api/v1/permissions - List tenant permissions.
pub async fn list(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Extension(TenantContext(tenant_id)): Extension<TenantContext>,
) -> ApiResult<Json<Vec<PermissionResponse>>> {
    state.authorization.require_tenant(
        &principal,
        tenant_id,
        &PermissionKey::new("tenant.users", "read")?,
    )?;

    let permissions = state.rbac_service.list_permissions(tenant_id).await?;
    Ok(Json(
        permissions
            .into_iter()
            .map(PermissionResponse::from)
            .collect(),
    ))
}

/// POST /api/v1/permissions - Create a tenant permission.
///
/// The resource must fall inside an allowed namespace; the new permission is
/// auto-attached to `tenant_owner`.
pub async fn create(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Extension(TenantContext(tenant_id)): Extension<TenantContext>,
    headers: HeaderMap,
    Json(payload): Json<CreatePermissionRequest>,
) -> ApiResult<(StatusCode, Json<PermissionResponse>)> {
    state.authorization.require_tenant(
        &principal,
        tenant_id,
        &PermissionKey::new("tenant.permissions", "manage")?,
    )?;

    let context = audit_context(Some(&principal), &headers);
    let permission = state
        .rbac_service
        .create_permission(
            &context,
            tenant_id,
            &payload.resource,
            &payload.action,
            payload.description,
        )
        .await?;

    Ok((StatusCode::CREATED, Json(PermissionResponse::from(permission))))
}

/// DELETE /api/v1/permissions/{id} - Delete a tenant permission.
pub async fn delete(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Extension(TenantContext(tenant_id)): Extension<TenantContext>,
    Path(permission_id): Path<Uuid>,
    headers: HeaderMap,
) -> ApiResult<StatusCode> {
    state.authorization.require_tenant(
        &principal,
        tenant_id,
        &PermissionKey::new("tenant.permissions", "manage")?,
    )?;

    let context = audit_context(Some(&principal), &headers);
    state
        .rbac_service
        .delete_permission(&context, tenant_id, permission_id)
        .await?;

    Ok(StatusCode::NO_CONTENT)
}
