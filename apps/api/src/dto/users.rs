use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use clavis_application::UserRecord;

/// POST /api/v1/users and /system/users request body.
#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    pub username: String,
    pub email: String,
    pub password: String,
}

/// PUT /api/v1/users/{id} request body.
#[derive(Debug, Deserialize)]
pub struct UpdateUserRequest {
    pub status: String,
}

/// PUT /api/v1/users/{id}/password request body.
///
/// `current_password` is required on the self-service path and absent on the
/// administrator reset path.
#[derive(Debug, Deserialize)]
pub struct ChangePasswordRequest {
    pub current_password: Option<String>,
    pub new_password: String,
}

/// User representation. Credentials and MFA material never appear here.
#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<Uuid>,
    pub principal_type: String,
    pub username: String,
    pub email: String,
    pub status: String,
    pub mfa_enabled: bool,
    pub last_login_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl From<UserRecord> for UserResponse {
    fn from(user: UserRecord) -> Self {
        Self {
            id: user.id.as_uuid(),
            tenant_id: user.tenant_id.map(|tenant_id| tenant_id.as_uuid()),
            principal_type: user.principal_type.as_str().to_owned(),
            username: user.username,
            email: user.email,
            status: user.status.as_str().to_owned(),
            mfa_enabled: user.mfa_enabled,
            last_login_at: user.last_login_at,
            created_at: user.created_at,
        }
    }
}

/// POST /api/v1/mfa/totp/confirm request body.
#[derive(Debug, Deserialize)]
pub struct MfaConfirmRequest {
    pub code: String,
}

/// DELETE /api/v1/mfa/totp request body.
#[derive(Debug, Deserialize)]
pub struct MfaDisableRequest {
    pub password: String,
}

/// POST /api/v1/mfa/recovery-codes/regenerate request body.
#[derive(Debug, Deserialize)]
pub struct MfaRegenerateRequest {
    pub password: String,
}

/// TOTP enrollment material; shown exactly once.
#[derive(Debug, Serialize)]
pub struct TotpEnrollmentResponse {
    pub secret_base32: String,
    pub otpauth_uri: String,
    pub recovery_codes: Vec<String>,
}
