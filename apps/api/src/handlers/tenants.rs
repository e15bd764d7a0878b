use axum::Json;
use axum::extract::{Extension, Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use uuid::Uuid;

use clavis_application::{Principal, RbacRepository};
use clavis_core::{AppError, TenantId};
use clavis_domain::SystemPermission;

use crate::dto::{
    CreateTenantRequest, PageQuery, TenantResponse, TenantSettingsPayload, UpdateTenantRequest,
};
use crate::error::ApiResult;
use crate::middleware::audit_context;
use crate::state::AppState;

/// GET /system/tenants - List tenants.
pub async fn list(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Query(page): Query<PageQuery>,
) -> ApiResult<Json<Vec<TenantResponse>>> {
    state
        .authorization
        .require_system(&principal, SystemPermission::TenantsRead)?;

    let tenants = state
        .tenant_service
        .list(page.page(), page.page_size())
        .await?;

    Ok(Json(tenants.into_iter().map(TenantResponse::from).collect()))
}

/// POST /system/tenants - Create a tenant.
pub async fn create(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    headers: HeaderMap,
    Json(payload): Json<CreateTenantRequest>,
) -> ApiResult<(StatusCode, Json<TenantResponse>)> {
    state
        .authorization
        .require_system(&principal, SystemPermission::TenantsManage)?;

    let context = audit_context(Some(&principal), &headers);
    let tenant = state
        .tenant_service
        .create_tenant(&context, &payload.name, &payload.domain)
        .await?;

    // The initial owner keeps the tenant administrable from day one: every
    // tenant must always have at least one tenant_owner assignment.
    if let Some(owner) = payload.owner {
        let user = state
            .user_service
            .create_user(
                &context,
                Some(tenant.id),
                clavis_domain::PrincipalType::Tenant,
                &owner.username,
                &owner.email,
                &owner.password,
            )
            .await?;

        let owner_role = state
            .rbac_service
            .repository()
            .find_role_by_name(Some(tenant.id), clavis_domain::TENANT_OWNER_ROLE)
            .await?
            .ok_or_else(|| {
                AppError::Internal("tenant seeded without a tenant_owner role".to_owned())
            })?;

        state
            .rbac_service
            .assign_role(&context, tenant.id, user.id, owner_role.id)
            .await?;
    }

    Ok((StatusCode::CREATED, Json(TenantResponse::from(tenant))))
}

/// GET /system/tenants/{id} - Read a tenant.
pub async fn get(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(tenant_id): Path<Uuid>,
) -> ApiResult<Json<TenantResponse>> {
    state
        .authorization
        .require_system(&principal, SystemPermission::TenantsRead)?;

    let tenant = state
        .tenant_service
        .find_by_id(TenantId::from_uuid(tenant_id))
        .await?
        .ok_or_else(|| AppError::NotFound("tenant not found".to_owned()))?;

    Ok(Json(TenantResponse::from(tenant)))
}

/// PUT /system/tenants/{id} - Rename a tenant.
pub async fn update(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(tenant_id): Path<Uuid>,
    headers: HeaderMap,
    Json(payload): Json<UpdateTenantRequest>,
) -> ApiResult<StatusCode> {
    state
        .authorization
        .require_system(&principal, SystemPermission::TenantsManage)?;

    let context = audit_context(Some(&principal), &headers);
    state
        .tenant_service
        .rename(&context, TenantId::from_uuid(tenant_id), &payload.name)
        .await?;

    Ok(StatusCode::NO_CONTENT)
}

/// DELETE /system/tenants/{id} - Soft-delete a tenant.
pub async fn delete(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(tenant_id): Path<Uuid>,
    headers: HeaderMap,
) -> ApiResult<StatusCode> {
    state
        .authorization
        .require_system(&principal, SystemPermission::TenantsManage)?;

    let context = audit_context(Some(&principal), &headers);
    state
        .tenant_service
        .delete(&context, TenantId::from_uuid(tenant_id))
        .await?;

    Ok(StatusCode::NO_CONTENT)
}

/// POST /system/tenants/{id}/suspend - Suspend a tenant.
pub async fn suspend(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(tenant_id): Path<Uuid>,
    headers: HeaderMap,
) -> ApiResult<StatusCode> {
    state
        .authorization
        .require_system(&principal, SystemPermission::TenantsManage)?;

    let context = audit_context(Some(&principal), &headers);
    state
        .tenant_service
        .suspend(&context, TenantId::from_uuid(tenant_id))
        .await?;

    Ok(StatusCode::NO_CONTENT)
}

/// POST /system/tenants/{id}/resume - Resume a suspended tenant.
pub async fn resume(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(tenant_id): Path<Uuid>,
    headers: HeaderMap,
) -> ApiResult<StatusCode> {
    state
        .authorization
        .require_system(&principal, SystemPermission::TenantsManage)?;

    let context = audit_context(Some(&principal), &headers);
    state
        .tenant_service
        .resume(&context, TenantId::from_uuid(tenant_id))
        .await?;

    Ok(StatusCode::NO_CONTENT)
}

/// GET /system/tenants/{id}/settings - Read tenant settings.
pub async fn settings(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(tenant_id): Path<Uuid>,
) -> ApiResult<Json<TenantSettingsPayload>> {
    state
        .authorization
        .require_system(&principal, SystemPermission::TenantSettingsManage)?;

    let settings = state
        .tenant_service
        .settings(TenantId::from_uuid(tenant_id))
        .await?;

    Ok(Json(TenantSettingsPayload::from(settings)))
}

/// PUT /system/tenants/{id}/settings - Write tenant settings.
///
/// Every TTL is checked against the system ceiling; an over-bound value
/// fails instead of clamping.
pub async fn update_settings(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(tenant_id): Path<Uuid>,
    headers: HeaderMap,
    Json(payload): Json<TenantSettingsPayload>,
) -> ApiResult<StatusCode> {
    state
        .authorization
        .require_system(&principal, SystemPermission::TenantSettingsManage)?;

    let tenant_id = TenantId::from_uuid(tenant_id);
    state
        .tenant_service
        .find_by_id(tenant_id)
        .await?
        .ok_or_else(|| AppError::NotFound("tenant not found".to_owned()))?;

    let context = audit_context(Some(&principal), &headers);
    state
        .tenant_service
        .update_settings(&context, payload.into_record(tenant_id))
        .await?;

    Ok(StatusCode::NO_CONTENT)
}
