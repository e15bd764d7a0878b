use axum::Json;
use axum::extract::{Extension, Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use uuid::Uuid;

use clavis_application::{Principal, WebhookStatus};
use clavis_domain::PermissionKey;

use crate::dto::{
    CreateWebhookRequest, CreatedWebhookResponse, PageQuery, ReasonParams,
    WebhookDeliveryResponse, WebhookResponse,
};
use crate::error::ApiResult;
use crate::middleware::{TenantContext, audit_context};
use crate::state::AppState;

/// GET /api/v1/webhooks - List the tenant's subscriptions.
pub async fn list(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Extension(TenantContext(tenant_id)): Extension<TenantContext>,
) -> ApiResult<Json<Vec<WebhookResponse>>> {
    state.authorization.require_tenant(
        &principal,
        tenant_id,
        &PermissionKey::new("tenant.webhooks", "manage")?,
    )?;

    let subscriptions = state
        .webhook_service
        .list_subscriptions(Some(tenant_id))
        .await?;

    Ok(Json(
        subscriptions.into_iter().map(WebhookResponse::from).collect(),
    ))
}

/// POST /api/v1/webhooks - Create a subscription.
///
/// The signing secret appears in this response and nowhere else.
pub async fn create(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Extension(TenantContext(tenant_id)): Extension<TenantContext>,
    headers: HeaderMap,
    Json(payload): Json<CreateWebhookRequest>,
) -> ApiResult<(StatusCode, Json<CreatedWebhookResponse>)> {
    state.authorization.require_tenant(
        &principal,
        tenant_id,
        &PermissionKey::new("tenant.webhooks", "manage")?,
    )?;

    let context = audit_context(Some(&principal), &headers);
    let (subscription, signing_secret) = state
        .webhook_service
        .create_subscription(
            &context,
            Some(tenant_id),
            &payload.name,
            &payload.url,
            payload.event_types,
        )
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(CreatedWebhookResponse {
            webhook: WebhookResponse::from(subscription),
            signing_secret,
        }),
    ))
}

/// DELETE /api/v1/webhooks/{id} - Delete a subscription. Requires a reason.
pub async fn delete(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Extension(TenantContext(tenant_id)): Extension<TenantContext>,
    Path(webhook_id): Path<Uuid>,
    Query(reason): Query<ReasonParams>,
    headers: HeaderMap,
) -> ApiResult<StatusCode> {
    state.authorization.require_tenant(
        &principal,
        tenant_id,
        &PermissionKey::new("tenant.webhooks", "manage")?,
    )?;

    let context = audit_context(Some(&principal), &headers);
    state
        .webhook_service
        .delete_subscription(&context, Some(tenant_id), webhook_id, reason.reason)
        .await?;

    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/v1/webhooks/{id}/disable - Pause a subscription.
pub async fn disable(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Extension(TenantContext(tenant_id)): Extension<TenantContext>,
    Path(webhook_id): Path<Uuid>,
    headers: HeaderMap,
) -> ApiResult<StatusCode> {
    set_status(state, principal, tenant_id, webhook_id, headers, WebhookStatus::Disabled).await
}

/// POST /api/v1/webhooks/{id}/enable - Resume a subscription.
pub async fn enable(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Extension(TenantContext(tenant_id)): Extension<TenantContext>,
    Path(webhook_id): Path<Uuid>,
    headers: HeaderMap,
) -> ApiResult<StatusCode> {
    set_status(state, principal, tenant_id, webhook_id, headers, WebhookStatus::Active).await
}

/// GET /api/v1/webhooks/{id}/deliveries - Delivery history.
pub async fn deliveries(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Extension(TenantContext(tenant_id)): Extension<TenantContext>,
    Path(webhook_id): Path<Uuid>,
    Query(page): Query<PageQuery>,
) -> ApiResult<Json<Vec<WebhookDeliveryResponse>>> {
    state.authorization.require_tenant(
        &principal,
        tenant_id,
        &PermissionKey::new("tenant.webhooks", "manage")?,
    )?;

    let deliveries = state
        .webhook_service
        .list_deliveries(Some(tenant_id), webhook_id, page.page(), page.page_size())
        .await?;

    Ok(Json(
        deliveries
            .into_iter()
            .map(WebhookDeliveryResponse::from)
            .collect(),
    ))
}

async fn set_status(
    state: AppState,
    principal: Principal,
    tenant_id: clavis_core::TenantId,
    webhook_id: Uuid,
    headers: HeaderMap,
    status: WebhookStatus,
) -> ApiResult<StatusCode> {
    state.authorization.require_tenant(
        &principal,
        tenant_id,
        &PermissionKey::new("tenant.webhooks", "manage")?,
    )?;

    let context = audit_context(Some(&principal), &headers);
    state
        .webhook_service
        .set_subscription_status(&context, Some(tenant_id), webhook_id, status)
        .await?;

    Ok(StatusCode::NO_CONTENT)
}
