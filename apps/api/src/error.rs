use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use clavis_core::AppError;
use serde::Serialize;

/// Wire error envelope: a stable code plus a generic message.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    error: &'static str,
    message: String,
}

/// HTTP API error wrapper around core application errors.
#[derive(Debug)]
pub struct ApiError(pub AppError);

impl From<AppError> for ApiError {
    fn from(value: AppError) -> Self {
        Self(value)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let retry_after_seconds = match &self.0 {
            AppError::RateLimited {
                retry_after_seconds,
                ..
            } => Some(*retry_after_seconds),
            _ => None,
        };

        let status = match self.0 {
            AppError::Validation(_) | AppError::AuditReasonRequired => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::InvalidCredentials
            | AppError::MfaRequired
            | AppError::InvalidCode
            | AppError::TokenRefreshFailed
            | AppError::TokenRevoked
            | AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::ForbiddenPlane(_)
            | AppError::ForbiddenTenant(_)
            | AppError::ForbiddenPermission(_)
            | AppError::ForbiddenNamespace(_)
            | AppError::EnrollmentRequired(_) => StatusCode::FORBIDDEN,
            AppError::CapabilityNotSupported(_) | AppError::CapabilityBoundViolation(_) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            AppError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            AppError::UpstreamTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        // End-user message stays generic; the precise kind lives in the code
        // and in the audit log.
        let payload = Json(ErrorResponse {
            error: self.0.code(),
            message: public_message(&self.0),
        });

        // Retry-After reflects the rule's actual window, not a constant.
        if let Some(retry_after_seconds) = retry_after_seconds {
            (
                status,
                [("retry-after", retry_after_seconds.to_string())],
                payload,
            )
                .into_response()
        } else {
            (status, payload).into_response()
        }
    }
}

fn public_message(error: &AppError) -> String {
    match error {
        AppError::InvalidCredentials => "authentication failed".to_owned(),
        AppError::Internal(_) => "an internal error occurred".to_owned(),
        other => other.to_string(),
    }
}

/// Standard API result type.
pub type ApiResult<T> = Result<T, ApiError>;
