//! Application services and ports.

#![forbid(unsafe_code)]

mod audit_service;
mod auth_service;
mod authorization_service;
mod bootstrap_service;
mod capability_service;
mod impersonation_service;
mod mfa_service;
mod rate_limit_service;
mod rbac_service;
mod tenant_service;
mod token_service;
mod user_service;
mod webhook_service;

#[cfg(test)]
mod test_support;

pub use audit_service::{
    AUDIT_PAGE_SIZE_DEFAULT, AUDIT_PAGE_SIZE_MAX, AuditContext, AuditEvent, AuditEventRecord,
    AuditFanout, AuditQuery, AuditRepository, AuditService, NoopFanout, export_csv,
};
pub use auth_service::{
    AuthService, CHALLENGE_TTL_SECONDS, ChallengeRecord, ChallengeRepository, LoginOutcome,
    MFA_FAILURE_LOCK_THRESHOLD,
};
pub use authorization_service::{AuthorizationService, ImpersonationContext, Principal};
pub use bootstrap_service::BootstrapService;
pub use capability_service::{
    CapabilityRepository, CapabilityService, FALLBACK_MAX_TOKEN_TTL_MINUTES, ResolvedCapability,
    SystemCapabilityRecord, TenantCapabilityRecord, TenantFeatureRecord, UserCapabilityState,
};
pub use impersonation_service::{
    IMPERSONATION_TTL_MINUTES, ImpersonationRepository, ImpersonationService,
    ImpersonationSessionRecord, StartedImpersonation,
};
pub use mfa_service::{MfaService, SecretEncryptor, TotpEnrollment, TotpProvider};
pub use rate_limit_service::{
    RateLimitAttempt, RateLimitRepository, RateLimitRule, RateLimitService,
};
pub use rbac_service::{
    NewPermission, NewRole, PermissionRecord, RbacReader, RbacRepository, RbacService, RoleRecord,
};
pub use tenant_service::{
    NewTenant, TenantRecord, TenantRepository, TenantService, TenantSettingsRecord,
    TenantSettingsRepository,
};
pub use token_service::{
    DEFAULT_ACCESS_TTL_MINUTES, IMPERSONATION_ACCESS_TTL_MINUTES, JtiBlacklist, NewRefreshToken,
    RefreshTokenRecord, RefreshTokenRepository, SYSTEM_REFRESH_TTL_DAYS, TokenPair, TokenService,
    TokenSigner,
};
pub use user_service::{NewUser, PasswordHasher, UserRecord, UserRepository, UserService};
pub use webhook_service::{
    BACKOFF_SCHEDULE_SECONDS, DeliveryStats, DeliveryStatus, DueDelivery,
    NewWebhookSubscription, SIGNATURE_FRESHNESS_WINDOW_SECONDS, WebhookDeliverer,
    WebhookDeliveryRecord, WebhookFanout, WebhookRepository, WebhookService, WebhookStatus,
    WebhookSubscriptionRecord,
};
