//! Service graph construction for the API binary.

use std::sync::Arc;
use std::time::Duration;

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tracing::{info, warn};

use clavis_application::{
    AuditService, AuthService, AuthorizationService, BootstrapService, CapabilityService,
    ImpersonationService, JtiBlacklist, MfaService, RateLimitRepository, RateLimitService,
    RbacService, TenantService, TokenService, UserService, WebhookFanout, WebhookService,
};
use clavis_core::{AppError, AppResult};
use clavis_infrastructure::{
    AesSecretEncryptor, Argon2PasswordHasher, HttpWebhookDeliverer, JwtTokenSigner,
    PostgresAuditRepository, PostgresCapabilityRepository, PostgresChallengeRepository,
    PostgresImpersonationRepository, PostgresJtiBlacklist, PostgresRateLimitRepository,
    PostgresRbacRepository, PostgresRefreshTokenRepository, PostgresTenantRepository,
    PostgresTenantSettingsRepository, PostgresUserRepository, PostgresWebhookRepository,
    RedisJtiBlacklist, RedisRateLimitRepository, TotpRsProvider,
};

use crate::api_config::ApiConfig;
use crate::state::AppState;

/// Connects the Postgres pool used by every repository.
pub async fn connect_pool(database_url: &str) -> AppResult<PgPool> {
    PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await
        .map_err(|error| AppError::Internal(format!("failed to connect to database: {error}")))
}

/// Wires repositories, adapters, and services into the shared state.
pub fn build_app_state(pool: PgPool, config: &ApiConfig) -> Result<AppState, AppError> {
    let audit_repository = Arc::new(PostgresAuditRepository::new(pool.clone()));
    let webhook_repository = Arc::new(PostgresWebhookRepository::new(pool.clone()));
    let user_repository = Arc::new(PostgresUserRepository::new(pool.clone()));
    let refresh_repository = Arc::new(PostgresRefreshTokenRepository::new(pool.clone()));
    let rbac_repository = Arc::new(PostgresRbacRepository::new(pool.clone()));
    let capability_repository = Arc::new(PostgresCapabilityRepository::new(pool.clone()));
    let settings_repository = Arc::new(PostgresTenantSettingsRepository::new(pool.clone()));
    let tenant_repository = Arc::new(PostgresTenantRepository::new(pool.clone()));
    let challenge_repository = Arc::new(PostgresChallengeRepository::new(pool.clone()));
    let impersonation_repository = Arc::new(PostgresImpersonationRepository::new(pool.clone()));

    let password_hasher = Arc::new(Argon2PasswordHasher::with_params(
        config.argon2_memory_kib,
        config.argon2_time_cost,
        config.argon2_parallelism,
    )?);
    let secret_encryptor = Arc::new(AesSecretEncryptor::from_hex(&config.secret_encryption_key)?);
    let totp_provider = Arc::new(TotpRsProvider::new(config.totp_issuer.clone()));
    let token_signer = Arc::new(JwtTokenSigner::new(&config.jwt_signing_secret)?);

    let redis_client = config
        .redis_url
        .as_deref()
        .map(redis::Client::open)
        .transpose()
        .map_err(|error| AppError::Validation(format!("invalid REDIS_URL: {error}")))?;

    let jti_authority = Arc::new(PostgresJtiBlacklist::new(pool.clone()));
    let blacklist: Arc<dyn JtiBlacklist> = match redis_client.clone() {
        Some(client) => Arc::new(RedisJtiBlacklist::new(
            client,
            "clavis:revoked_jti",
            jti_authority,
        )),
        None => jti_authority,
    };

    let rate_limit_repository: Arc<dyn RateLimitRepository> = match redis_client {
        Some(client) => Arc::new(RedisRateLimitRepository::new(client, "clavis:rate_limit")),
        None => Arc::new(PostgresRateLimitRepository::new(pool.clone())),
    };

    // The fan-out only persists delivery rows; the dispatcher task and the
    // worker perform the actual HTTP calls.
    let audit_service = AuditService::new(audit_repository)
        .with_fanout(Arc::new(WebhookFanout::new(webhook_repository.clone())));

    let token_service = TokenService::new(
        refresh_repository.clone(),
        token_signer,
        blacklist,
        user_repository.clone(),
        rbac_repository.clone(),
        settings_repository.clone(),
        audit_service.clone(),
    );
    let user_service = UserService::new(
        user_repository.clone(),
        password_hasher.clone(),
        refresh_repository,
        settings_repository.clone(),
        audit_service.clone(),
    );
    let capability_service =
        CapabilityService::new(capability_repository.clone(), audit_service.clone());
    let rbac_service = RbacService::new(rbac_repository.clone(), audit_service.clone());
    let tenant_service = TenantService::new(
        tenant_repository,
        settings_repository,
        rbac_service.clone(),
        capability_service.clone(),
        audit_service.clone(),
    );
    let mfa_service = MfaService::new(
        user_repository.clone(),
        password_hasher.clone(),
        totp_provider,
        secret_encryptor.clone(),
        capability_repository,
        audit_service.clone(),
    );
    let auth_service = AuthService::new(
        user_repository.clone(),
        password_hasher.clone(),
        challenge_repository,
        tenant_service.clone(),
        capability_service.clone(),
        mfa_service.clone(),
        token_service.clone(),
        audit_service.clone(),
    );

    let http_client = reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()
        .map_err(|error| AppError::Internal(format!("failed to build HTTP client: {error}")))?;
    let webhook_service = WebhookService::new(
        webhook_repository,
        Arc::new(HttpWebhookDeliverer::new(http_client)),
        secret_encryptor,
        audit_service.clone(),
    );

    let impersonation_service = ImpersonationService::new(
        impersonation_repository,
        user_repository.clone(),
        token_service.clone(),
        audit_service.clone(),
    );
    let bootstrap_service = BootstrapService::new(
        user_repository,
        rbac_repository,
        password_hasher,
        audit_service.clone(),
    );

    Ok(AppState {
        db_pool: pool,
        auth_service,
        token_service,
        user_service,
        mfa_service,
        rbac_service,
        tenant_service,
        capability_service,
        audit_service,
        webhook_service,
        impersonation_service,
        bootstrap_service,
        rate_limit_service: RateLimitService::new(rate_limit_repository),
        authorization: AuthorizationService::new(),
        bootstrap_token: config.bootstrap_token.clone(),
    })
}

/// Spawns the in-process webhook dispatch loop.
///
/// Fan-out never blocks an API response: committed events become pending
/// delivery rows, and this task drains the due ones on an interval. A
/// dedicated worker process can run the same loop at larger scale.
pub fn spawn_webhook_dispatcher(state: AppState, interval_ms: u64, batch_size: u32) {
    tokio::spawn(async move {
        loop {
            match state.webhook_service.run_due_deliveries(batch_size).await {
                Ok(stats) if stats.claimed > 0 => {
                    info!(
                        claimed = stats.claimed,
                        delivered = stats.delivered,
                        rescheduled = stats.rescheduled,
                        failed = stats.failed,
                        "webhook dispatch cycle finished"
                    );
                }
                Ok(_) => {}
                Err(error) => {
                    warn!(error = %error, "webhook dispatch cycle failed");
                }
            }

            tokio::time::sleep(Duration::from_millis(interval_ms)).await;
        }
    });
}
