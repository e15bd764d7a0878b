use axum::Json;
use axum::extract::{Extension, State};
use axum::http::{HeaderMap, StatusCode};

use clavis_application::Principal;
use clavis_domain::CapabilityKey;

use crate::dto::{
    MfaConfirmRequest, MfaDisableRequest, MfaRegenerateRequest, TotpEnrollmentResponse,
};
use crate::error::ApiResult;
use crate::middleware::{TenantContext, audit_context};
use crate::state::AppState;

/// POST /api/v1/mfa/totp/enroll - Start TOTP enrollment.
///
/// Gated on the tenant being entitled to and having enabled the `totp`
/// capability.
pub async fn enroll(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Extension(TenantContext(tenant_id)): Extension<TenantContext>,
) -> ApiResult<Json<TotpEnrollmentResponse>> {
    if !state
        .capability_service
        .is_available_for_tenant(tenant_id, CapabilityKey::Totp)
        .await?
    {
        return Err(clavis_core::AppError::CapabilityNotSupported(
            "the totp capability is not enabled for this tenant".to_owned(),
        )
        .into());
    }

    let enrollment = state.mfa_service.start_enrollment(principal.user_id).await?;

    Ok(Json(TotpEnrollmentResponse {
        secret_base32: enrollment.secret_base32,
        otpauth_uri: enrollment.otpauth_uri,
        recovery_codes: enrollment.recovery_codes,
    }))
}

/// POST /api/v1/mfa/totp/confirm - Confirm TOTP enrollment.
pub async fn confirm(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    headers: HeaderMap,
    Json(payload): Json<MfaConfirmRequest>,
) -> ApiResult<StatusCode> {
    let context = audit_context(Some(&principal), &headers);

    state
        .mfa_service
        .confirm_enrollment(&context, principal.user_id, &payload.code)
        .await?;

    Ok(StatusCode::NO_CONTENT)
}

/// DELETE /api/v1/mfa/totp - Disable TOTP (requires password).
pub async fn disable(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    headers: HeaderMap,
    Json(payload): Json<MfaDisableRequest>,
) -> ApiResult<StatusCode> {
    let context = audit_context(Some(&principal), &headers);

    state
        .mfa_service
        .disable_totp(&context, principal.user_id, &payload.password)
        .await?;

    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/v1/mfa/recovery-codes/regenerate - Replace recovery codes.
pub async fn regenerate_recovery_codes(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    headers: HeaderMap,
    Json(payload): Json<MfaRegenerateRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let context = audit_context(Some(&principal), &headers);

    let codes = state
        .mfa_service
        .regenerate_recovery_codes(&context, principal.user_id, &payload.password)
        .await?;

    Ok(Json(serde_json::json!({ "recovery_codes": codes })))
}
