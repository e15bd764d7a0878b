use axum::Json;
use axum::extract::{Extension, Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};

use clavis_application::Principal;
use clavis_domain::{PermissionKey, SystemPermission};

use crate::dto::{AuditEventResponse, AuditQueryParams};
use crate::error::ApiResult;
use crate::middleware::TenantContext;
use crate::state::AppState;

/// GET /api/v1/audit - Query the tenant's audit events.
pub async fn list(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Extension(TenantContext(tenant_id)): Extension<TenantContext>,
    Query(params): Query<AuditQueryParams>,
) -> ApiResult<Json<Vec<AuditEventResponse>>> {
    state.authorization.require_tenant(
        &principal,
        tenant_id,
        &PermissionKey::new("tenant.audit", "read")?,
    )?;

    let query = params.into_query(Some(tenant_id))?;
    let events = state.audit_service.query(query).await?;

    Ok(Json(events.into_iter().map(AuditEventResponse::from).collect()))
}

/// GET /api/v1/audit/export - Export the tenant's audit events as CSV.
pub async fn export(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Extension(TenantContext(tenant_id)): Extension<TenantContext>,
    Query(params): Query<AuditQueryParams>,
) -> ApiResult<Response> {
    state.authorization.require_tenant(
        &principal,
        tenant_id,
        &PermissionKey::new("tenant.audit", "read")?,
    )?;

    let query = params.into_query(Some(tenant_id))?;
    let csv = state.audit_service.export(query).await?;

    Ok(csv_response(csv))
}

/// GET /system/audit - Query the platform audit log.
pub async fn system_list(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Query(params): Query<AuditQueryParams>,
) -> ApiResult<Json<Vec<AuditEventResponse>>> {
    state
        .authorization
        .require_system(&principal, SystemPermission::AuditRead)?;

    // SYSTEM operators may query across tenants; the filter stays open.
    let query = params.into_query(None)?;
    let events = state.audit_service.query(query).await?;

    Ok(Json(events.into_iter().map(AuditEventResponse::from).collect()))
}

/// GET /system/audit/export - Export the platform audit log as CSV.
pub async fn system_export(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Query(params): Query<AuditQueryParams>,
) -> ApiResult<Response> {
    state
        .authorization
        .require_system(&principal, SystemPermission::AuditRead)?;

    let query = params.into_query(None)?;
    let csv = state.audit_service.export(query).await?;

    Ok(csv_response(csv))
}

fn csv_response(csv: String) -> Response {
    (
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8"),
            (
                header::CONTENT_DISPOSITION,
                "attachment; filename=\"audit-events.csv\"",
            ),
        ],
        csv,
    )
        .into_response()
}
