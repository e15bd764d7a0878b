use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use clavis_application::{PermissionRecord, RoleRecord};

/// POST /api/v1/roles request body.
#[derive(Debug, Deserialize)]
pub struct CreateRoleRequest {
    pub name: String,
    pub description: Option<String>,
}

/// PUT /api/v1/roles/{id} request body.
#[derive(Debug, Deserialize)]
pub struct UpdateRoleRequest {
    pub description: Option<String>,
}

/// Role representation.
#[derive(Debug, Serialize)]
pub struct RoleResponse {
    pub id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<Uuid>,
    pub name: String,
    pub description: Option<String>,
    pub is_system: bool,
    pub created_at: DateTime<Utc>,
}

impl From<RoleRecord> for RoleResponse {
    fn from(role: RoleRecord) -> Self {
        Self {
            id: role.id,
            tenant_id: role.tenant_id.map(|tenant_id| tenant_id.as_uuid()),
            name: role.name,
            description: role.description,
            is_system: role.is_system,
            created_at: role.created_at,
        }
    }
}

/// POST /api/v1/permissions request body.
#[derive(Debug, Deserialize)]
pub struct CreatePermissionRequest {
    pub resource: String,
    pub action: String,
    pub description: Option<String>,
}

/// Permission representation.
#[derive(Debug, Serialize)]
pub struct PermissionResponse {
    pub id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<Uuid>,
    pub resource: String,
    pub action: String,
    pub key: String,
    pub description: Option<String>,
}

impl From<PermissionRecord> for PermissionResponse {
    fn from(permission: PermissionRecord) -> Self {
        let key = permission.key();
        Self {
            id: permission.id,
            tenant_id: permission.tenant_id.map(|tenant_id| tenant_id.as_uuid()),
            resource: permission.resource,
            action: permission.action,
            key,
            description: permission.description,
        }
    }
}

/// POST /api/v1/users/{id}/roles request body.
#[derive(Debug, Deserialize)]
pub struct AssignRoleRequest {
    pub role_id: Uuid,
}
