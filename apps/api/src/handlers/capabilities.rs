use axum::Json;
use axum::extract::{Extension, Path, State};
use axum::http::{HeaderMap, StatusCode};
use uuid::Uuid;

use clavis_application::Principal;
use clavis_core::TenantId;
use clavis_domain::{CapabilityKey, SystemPermission};

use crate::dto::{EntitleCapabilityRequest, SystemCapabilityResponse, TenantCapabilityResponse};
use crate::error::ApiResult;
use crate::middleware::audit_context;
use crate::state::AppState;

/// GET /system/capabilities - Platform capability catalog.
pub async fn catalog(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
) -> ApiResult<Json<Vec<SystemCapabilityResponse>>> {
    state
        .authorization
        .require_system(&principal, SystemPermission::CapabilitiesManage)?;

    let capabilities = state.capability_service.list_system_capabilities().await?;
    Ok(Json(
        capabilities
            .into_iter()
            .map(SystemCapabilityResponse::from)
            .collect(),
    ))
}

/// GET /system/tenants/{id}/capabilities - A tenant's entitlements.
pub async fn list_for_tenant(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(tenant_id): Path<Uuid>,
) -> ApiResult<Json<Vec<TenantCapabilityResponse>>> {
    state
        .authorization
        .require_system(&principal, SystemPermission::CapabilitiesManage)?;

    let capabilities = state
        .capability_service
        .list_tenant_capabilities(TenantId::from_uuid(tenant_id))
        .await?;

    Ok(Json(
        capabilities
            .into_iter()
            .map(TenantCapabilityResponse::from)
            .collect(),
    ))
}

/// PUT /system/tenants/{id}/capabilities - Entitle or strip a capability.
pub async fn entitle(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(tenant_id): Path<Uuid>,
    headers: HeaderMap,
    Json(payload): Json<EntitleCapabilityRequest>,
) -> ApiResult<StatusCode> {
    state
        .authorization
        .require_system(&principal, SystemPermission::CapabilitiesManage)?;

    let key: CapabilityKey = payload.key.parse()?;
    let context = audit_context(Some(&principal), &headers);
    state
        .capability_service
        .entitle_tenant(
            &context,
            TenantId::from_uuid(tenant_id),
            key,
            payload.enabled,
            payload.value,
        )
        .await?;

    Ok(StatusCode::NO_CONTENT)
}
