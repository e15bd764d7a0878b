//! Request and response payloads.

mod audit;
mod auth;
mod capabilities;
mod common;
mod impersonation;
mod rbac;
mod tenants;
mod users;
mod webhooks;

pub use audit::{AuditEventResponse, AuditQueryParams};
pub use auth::{
    BootstrapRequest, ChallengeVerifyRequest, LoginRequest, LoginResponse, LogoutRequest,
    RefreshRequest, RevokeSessionsRequest, TokenResponse,
};
pub use capabilities::{
    EntitleCapabilityRequest, SetFeatureRequest, SystemCapabilityResponse,
    TenantCapabilityResponse, TenantFeatureResponse,
};
pub use common::{GenericMessageResponse, PageQuery, ReasonParams};
pub use impersonation::{EndImpersonationRequest, ImpersonationResponse, StartImpersonationRequest};
pub use rbac::{
    AssignRoleRequest, CreatePermissionRequest, CreateRoleRequest, PermissionResponse,
    RoleResponse, UpdateRoleRequest,
};
pub use tenants::{
    CreateTenantRequest, TenantOwnerRequest, TenantResponse, TenantSettingsPayload,
    UpdateTenantRequest,
};
pub use users::{
    ChangePasswordRequest, CreateUserRequest, MfaConfirmRequest, MfaDisableRequest,
    MfaRegenerateRequest, TotpEnrollmentResponse, UpdateUserRequest, UserResponse,
};
pub use webhooks::{
    CreateWebhookRequest, CreatedWebhookResponse, WebhookDeliveryResponse, WebhookResponse,
};
