use clavis_application::{
    AuditService, AuthService, AuthorizationService, BootstrapService, CapabilityService,
    ImpersonationService, MfaService, RateLimitService, RbacService, TenantService, TokenService,
    UserService, WebhookService,
};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub db_pool: sqlx::PgPool,
    pub auth_service: AuthService,
    pub token_service: TokenService,
    pub user_service: UserService,
    pub mfa_service: MfaService,
    pub rbac_service: RbacService,
    pub tenant_service: TenantService,
    pub capability_service: CapabilityService,
    pub audit_service: AuditService,
    pub webhook_service: WebhookService,
    pub impersonation_service: ImpersonationService,
    pub bootstrap_service: BootstrapService,
    pub rate_limit_service: RateLimitService,
    pub authorization: AuthorizationService,
    pub bootstrap_token: String,
}
