use serde::{Deserialize, Serialize};

use clavis_application::{SystemCapabilityRecord, TenantCapabilityRecord, TenantFeatureRecord};

/// Platform capability catalog entry.
#[derive(Debug, Serialize)]
pub struct SystemCapabilityResponse {
    pub key: String,
    pub enabled: bool,
    pub default_value: Option<serde_json::Value>,
    pub default_entitled: bool,
    pub description: String,
}

impl From<SystemCapabilityRecord> for SystemCapabilityResponse {
    fn from(record: SystemCapabilityRecord) -> Self {
        Self {
            key: record.key.as_str().to_owned(),
            enabled: record.enabled,
            default_value: record.default_value,
            default_entitled: record.default_entitled,
            description: record.description,
        }
    }
}

/// PUT /system/tenants/{id}/capabilities request body.
#[derive(Debug, Deserialize)]
pub struct EntitleCapabilityRequest {
    pub key: String,
    pub enabled: bool,
    pub value: Option<serde_json::Value>,
}

/// Tenant entitlement entry.
#[derive(Debug, Serialize)]
pub struct TenantCapabilityResponse {
    pub key: String,
    pub enabled: bool,
    pub value: Option<serde_json::Value>,
}

impl From<TenantCapabilityRecord> for TenantCapabilityResponse {
    fn from(record: TenantCapabilityRecord) -> Self {
        Self {
            key: record.key.as_str().to_owned(),
            enabled: record.enabled,
            value: record.value,
        }
    }
}

/// PUT /api/v1/features/{key} request body.
#[derive(Debug, Deserialize)]
pub struct SetFeatureRequest {
    pub enabled: bool,
    pub configuration: Option<serde_json::Value>,
}

/// Tenant feature entry.
#[derive(Debug, Serialize)]
pub struct TenantFeatureResponse {
    pub key: String,
    pub enabled: bool,
    pub configuration: Option<serde_json::Value>,
}

impl From<TenantFeatureRecord> for TenantFeatureResponse {
    fn from(record: TenantFeatureRecord) -> Self {
        Self {
            key: record.key.as_str().to_owned(),
            enabled: record.enabled,
            configuration: record.configuration,
        }
    }
}
