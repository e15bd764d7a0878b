//! Clavis background worker runtime.
//!
//! Runs the webhook delivery loop against the persisted queue and the
//! periodic expiry sweeps (refresh tokens, MFA challenges, revoked jtis,
//! rate-limit counters). The API process runs the same delivery loop
//! in-process; a dedicated worker takes over at larger scale.

#![forbid(unsafe_code)]

use std::env;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use clavis_application::{AuditService, WebhookService};
use clavis_core::{AppError, AppResult};
use clavis_infrastructure::{
    AesSecretEncryptor, HttpWebhookDeliverer, PostgresAuditRepository,
    PostgresChallengeRepository, PostgresJtiBlacklist, PostgresRateLimitRepository,
    PostgresRefreshTokenRepository, PostgresWebhookRepository,
};

#[derive(Debug, Clone)]
struct WorkerConfig {
    database_url: String,
    secret_encryption_key: String,
    poll_interval_ms: u64,
    delivery_batch_size: u32,
    sweep_interval_seconds: u64,
}

impl WorkerConfig {
    fn load() -> AppResult<Self> {
        let database_url = required_env("DATABASE_URL")?;
        let secret_encryption_key = required_env("SECRET_ENCRYPTION_KEY")?;
        let poll_interval_ms = parse_env_u64("WORKER_POLL_INTERVAL_MS", 1_000)?;
        let delivery_batch_size = parse_env_u32("WORKER_DELIVERY_BATCH_SIZE", 50)?;
        let sweep_interval_seconds = parse_env_u64("WORKER_SWEEP_INTERVAL_SECONDS", 300)?;

        if poll_interval_ms == 0 {
            return Err(AppError::Validation(
                "WORKER_POLL_INTERVAL_MS must be greater than zero".to_owned(),
            ));
        }

        if delivery_batch_size == 0 {
            return Err(AppError::Validation(
                "WORKER_DELIVERY_BATCH_SIZE must be greater than zero".to_owned(),
            ));
        }

        if sweep_interval_seconds == 0 {
            return Err(AppError::Validation(
                "WORKER_SWEEP_INTERVAL_SECONDS must be greater than zero".to_owned(),
            ));
        }

        Ok(Self {
            database_url,
            secret_encryption_key,
            poll_interval_ms,
            delivery_batch_size,
            sweep_interval_seconds,
        })
    }
}

#[tokio::main]
async fn main() -> Result<(), AppError> {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = WorkerConfig::load()?;
    let pool = connect_pool(config.database_url.as_str()).await?;
    let webhook_service = build_webhook_service(pool.clone(), &config)?;

    info!(
        poll_interval_ms = config.poll_interval_ms,
        delivery_batch_size = config.delivery_batch_size,
        sweep_interval_seconds = config.sweep_interval_seconds,
        "clavis-worker started"
    );

    tokio::spawn(run_expiry_sweeps(pool, config.sweep_interval_seconds));

    loop {
        match webhook_service
            .run_due_deliveries(config.delivery_batch_size)
            .await
        {
            Ok(stats) if stats.claimed > 0 => {
                info!(
                    claimed = stats.claimed,
                    delivered = stats.delivered,
                    rescheduled = stats.rescheduled,
                    failed = stats.failed,
                    "webhook delivery cycle finished"
                );
            }
            Ok(_) => {}
            Err(error) => {
                warn!(error = %error, "webhook delivery cycle failed");
            }
        }

        tokio::time::sleep(Duration::from_millis(config.poll_interval_ms)).await;
    }
}

fn build_webhook_service(pool: PgPool, config: &WorkerConfig) -> AppResult<WebhookService> {
    let webhook_repository = Arc::new(PostgresWebhookRepository::new(pool.clone()));
    let audit_repository = Arc::new(PostgresAuditRepository::new(pool));
    let secret_encryptor = Arc::new(AesSecretEncryptor::from_hex(
        config.secret_encryption_key.as_str(),
    )?);

    let http_client = reqwest::Client::builder()
        .timeout(Duration::from_secs(15))
        .build()
        .map_err(|error| AppError::Internal(format!("failed to build HTTP client: {error}")))?;

    Ok(WebhookService::new(
        webhook_repository,
        Arc::new(HttpWebhookDeliverer::new(http_client)),
        secret_encryptor,
        AuditService::new(audit_repository),
    ))
}

/// Prunes expired refresh tokens, challenges, revoked jtis, and rate-limit
/// counters on a fixed interval.
async fn run_expiry_sweeps(pool: PgPool, interval_seconds: u64) {
    let refresh_tokens = PostgresRefreshTokenRepository::new(pool.clone());
    let challenges = PostgresChallengeRepository::new(pool.clone());
    let blacklist = PostgresJtiBlacklist::new(pool.clone());
    let rate_limits = PostgresRateLimitRepository::new(pool);

    loop {
        tokio::time::sleep(Duration::from_secs(interval_seconds)).await;

        let now = Utc::now();
        let retention_cutoff = now - chrono::Duration::hours(24);

        match sweep_totals(&refresh_tokens, &challenges, &blacklist, &rate_limits, now, retention_cutoff)
            .await
        {
            Ok((tokens, pending_challenges, jtis, counters)) => {
                if tokens + pending_challenges + jtis + counters > 0 {
                    info!(
                        refresh_tokens = tokens,
                        challenges = pending_challenges,
                        revoked_jtis = jtis,
                        rate_limit_counters = counters,
                        "expiry sweep finished"
                    );
                }
            }
            Err(error) => {
                warn!(error = %error, "expiry sweep failed");
            }
        }
    }
}

async fn sweep_totals(
    refresh_tokens: &PostgresRefreshTokenRepository,
    challenges: &PostgresChallengeRepository,
    blacklist: &PostgresJtiBlacklist,
    rate_limits: &PostgresRateLimitRepository,
    now: chrono::DateTime<Utc>,
    retention_cutoff: chrono::DateTime<Utc>,
) -> AppResult<(u64, u64, u64, u64)> {
    use clavis_application::{ChallengeRepository, RateLimitRepository, RefreshTokenRepository};

    let tokens = refresh_tokens.delete_expired(now).await?;
    let pending_challenges = challenges.delete_expired(now).await?;
    let jtis = blacklist.delete_expired(now).await?;
    let counters = rate_limits.cleanup_expired(retention_cutoff).await?;

    Ok((tokens, pending_challenges, jtis, counters))
}

async fn connect_pool(database_url: &str) -> AppResult<PgPool> {
    PgPoolOptions::new()
        .max_connections(5)
        .connect(database_url)
        .await
        .map_err(|error| AppError::Internal(format!("failed to connect to database: {error}")))
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .init();
}

fn required_env(name: &str) -> AppResult<String> {
    env::var(name).map_err(|_| AppError::Validation(format!("{name} is required")))
}

fn parse_env_u64(name: &str, default: u64) -> AppResult<u64> {
    match env::var(name) {
        Ok(value) => value.parse::<u64>().map_err(|error| {
            AppError::Validation(format!("invalid {name} value '{value}': {error}"))
        }),
        Err(_) => Ok(default),
    }
}

fn parse_env_u32(name: &str, default: u32) -> AppResult<u32> {
    match env::var(name) {
        Ok(value) => value.parse::<u32>().map_err(|error| {
            AppError::Validation(format!("invalid {name} value '{value}': {error}"))
        }),
        Err(_) => Ok(default),
    }
}
