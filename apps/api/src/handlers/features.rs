use axum::Json;
use axum::extract::{Extension, Path, State};
use axum::http::{HeaderMap, StatusCode};

use clavis_application::Principal;
use clavis_domain::{CapabilityKey, PermissionKey};

use crate::dto::{SetFeatureRequest, TenantFeatureResponse, TenantSettingsPayload};
use crate::error::ApiResult;
use crate::middleware::{TenantContext, audit_context};
use crate::state::AppState;

/// GET /api/v1/features - List the tenant's feature switches.
pub async fn list(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Extension(TenantContext(tenant_id)): Extension<TenantContext>,
) -> ApiResult<Json<Vec<TenantFeatureResponse>>> {
    state.authorization.require_tenant(
        &principal,
        tenant_id,
        &PermissionKey::new("tenant.settings", "read")?,
    )?;

    let features = state
        .capability_service
        .list_tenant_features(tenant_id)
        .await?;

    Ok(Json(
        features.into_iter().map(TenantFeatureResponse::from).collect(),
    ))
}

/// PUT /api/v1/features/{key} - Turn a feature on or off.
///
/// Bounded by the tenant's entitlement; over-bound configuration fails with
/// `capability_bound_violation`.
pub async fn set(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Extension(TenantContext(tenant_id)): Extension<TenantContext>,
    Path(key): Path<String>,
    headers: HeaderMap,
    Json(payload): Json<SetFeatureRequest>,
) -> ApiResult<StatusCode> {
    state.authorization.require_tenant(
        &principal,
        tenant_id,
        &PermissionKey::new("tenant.features", "manage")?,
    )?;

    let key: CapabilityKey = key.parse()?;
    let context = audit_context(Some(&principal), &headers);
    state
        .capability_service
        .set_feature(&context, tenant_id, key, payload.enabled, payload.configuration)
        .await?;

    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/v1/settings - Read the tenant's settings.
pub async fn settings(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Extension(TenantContext(tenant_id)): Extension<TenantContext>,
) -> ApiResult<Json<TenantSettingsPayload>> {
    state.authorization.require_tenant(
        &principal,
        tenant_id,
        &PermissionKey::new("tenant.settings", "read")?,
    )?;

    let settings = state.tenant_service.settings(tenant_id).await?;
    Ok(Json(TenantSettingsPayload::from(settings)))
}
