use serde::{Deserialize, Serialize};
use uuid::Uuid;

use clavis_application::TokenPair;

/// POST /api/v1/auth/login request body.
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub remember_me: bool,
}

/// Login response: either a token pair or a pending MFA challenge.
///
/// No token field is ever present while `mfa_required` is true.
#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub mfa_required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub challenge_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<i64>,
}

impl LoginResponse {
    pub fn tokens(pair: TokenPair) -> Self {
        Self {
            mfa_required: false,
            challenge_id: None,
            access_token: Some(pair.access_token),
            refresh_token: Some(pair.refresh_token),
            token_type: Some("Bearer".to_owned()),
            expires_in: Some(pair.expires_in),
        }
    }

    pub fn challenge(challenge_id: Uuid) -> Self {
        Self {
            mfa_required: true,
            challenge_id: Some(challenge_id),
            access_token: None,
            refresh_token: None,
            token_type: None,
            expires_in: None,
        }
    }
}

/// POST /api/v1/mfa/challenge/verify request body.
#[derive(Debug, Deserialize)]
pub struct ChallengeVerifyRequest {
    pub challenge_id: Uuid,
    pub code: String,
}

/// Issued token pair.
#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub expires_in: i64,
}

impl From<TokenPair> for TokenResponse {
    fn from(pair: TokenPair) -> Self {
        Self {
            access_token: pair.access_token,
            refresh_token: pair.refresh_token,
            token_type: "Bearer".to_owned(),
            expires_in: pair.expires_in,
        }
    }
}

/// POST /api/v1/auth/refresh request body.
#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

/// POST /api/v1/auth/logout request body.
#[derive(Debug, Deserialize)]
pub struct LogoutRequest {
    pub refresh_token: String,
}

/// POST /api/v1/auth/revoke request body. Administrator path; revokes every
/// session of the target user.
#[derive(Debug, Deserialize)]
pub struct RevokeSessionsRequest {
    pub user_id: Uuid,
    pub reason: String,
}

/// POST /system/bootstrap request body.
#[derive(Debug, Deserialize)]
pub struct BootstrapRequest {
    pub token: String,
    pub username: String,
    pub email: String,
    pub password: String,
}
