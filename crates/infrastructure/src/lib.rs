//! Infrastructure adapters for application ports.

#![forbid(unsafe_code)]

mod aes_secret_encryptor;
mod argon2_password_hasher;
mod http_webhook_deliverer;
mod jwt_token_signer;
mod postgres_audit_repository;
mod postgres_capability_repository;
mod postgres_challenge_repository;
mod postgres_impersonation_repository;
mod postgres_jti_blacklist;
mod postgres_rate_limit_repository;
mod postgres_rbac_repository;
mod postgres_refresh_token_repository;
mod postgres_tenant_repository;
mod postgres_user_repository;
mod postgres_webhook_repository;
mod redis_jti_blacklist;
mod redis_rate_limit_repository;
mod totp_provider;

pub use aes_secret_encryptor::AesSecretEncryptor;
pub use argon2_password_hasher::Argon2PasswordHasher;
pub use http_webhook_deliverer::HttpWebhookDeliverer;
pub use jwt_token_signer::JwtTokenSigner;
pub use postgres_audit_repository::PostgresAuditRepository;
pub use postgres_capability_repository::PostgresCapabilityRepository;
pub use postgres_challenge_repository::PostgresChallengeRepository;
pub use postgres_impersonation_repository::PostgresImpersonationRepository;
pub use postgres_jti_blacklist::PostgresJtiBlacklist;
pub use postgres_rate_limit_repository::PostgresRateLimitRepository;
pub use postgres_rbac_repository::PostgresRbacRepository;
pub use postgres_refresh_token_repository::PostgresRefreshTokenRepository;
pub use postgres_tenant_repository::{PostgresTenantRepository, PostgresTenantSettingsRepository};
pub use postgres_user_repository::PostgresUserRepository;
pub use postgres_webhook_repository::PostgresWebhookRepository;
pub use redis_jti_blacklist::RedisJtiBlacklist;
pub use redis_rate_limit_repository::RedisRateLimitRepository;
pub use totp_provider::TotpRsProvider;
