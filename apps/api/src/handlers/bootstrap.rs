use axum::Json;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};

use clavis_core::AppError;

use crate::dto::{BootstrapRequest, GenericMessageResponse};
use crate::error::ApiResult;
use crate::middleware::audit_context;
use crate::state::AppState;

/// POST /system/bootstrap - One-shot platform initialization.
///
/// Guarded by the configuration bootstrap token; refused once any SYSTEM
/// principal exists.
pub async fn bootstrap(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<BootstrapRequest>,
) -> ApiResult<(StatusCode, Json<GenericMessageResponse>)> {
    if payload.token != state.bootstrap_token {
        return Err(AppError::Unauthorized("invalid bootstrap token".to_owned()).into());
    }

    let context = audit_context(None, &headers);
    let user_id = state
        .bootstrap_service
        .bootstrap(&context, &payload.username, &payload.email, &payload.password)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(GenericMessageResponse {
            message: format!("system owner '{user_id}' created; bootstrap is now disabled"),
        }),
    ))
}
