use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use clavis_application::StartedImpersonation;

/// POST /system/impersonation request body.
#[derive(Debug, Deserialize)]
pub struct StartImpersonationRequest {
    pub tenant_id: Uuid,
    pub target_user_id: Uuid,
    pub reason: String,
}

/// DELETE /system/impersonation/{id} request body.
#[derive(Debug, Default, Deserialize)]
pub struct EndImpersonationRequest {
    pub reason: Option<String>,
}

/// Started impersonation session.
#[derive(Debug, Serialize)]
pub struct ImpersonationResponse {
    pub session_id: Uuid,
    pub access_token: String,
    pub expires_at: DateTime<Utc>,
    /// Clients render the impersonation banner from this flag.
    pub impersonation: bool,
}

impl From<StartedImpersonation> for ImpersonationResponse {
    fn from(session: StartedImpersonation) -> Self {
        Self {
            session_id: session.session_id,
            access_token: session.access_token,
            expires_at: session.expires_at,
            impersonation: true,
        }
    }
}
