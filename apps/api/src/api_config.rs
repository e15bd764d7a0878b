use std::env;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

use clavis_core::AppError;
use tracing_subscriber::EnvFilter;

/// Validated process configuration, loaded once at startup.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub database_url: String,
    pub redis_url: Option<String>,
    pub api_host: String,
    pub api_port: u16,
    pub jwt_signing_secret: String,
    pub secret_encryption_key: String,
    pub bootstrap_token: String,
    pub totp_issuer: String,
    pub argon2_memory_kib: u32,
    pub argon2_time_cost: u32,
    pub argon2_parallelism: u32,
    pub cors_allowed_origins: Vec<String>,
    pub webhook_dispatch_interval_ms: u64,
    pub webhook_dispatch_batch_size: u32,
}

impl ApiConfig {
    pub fn load() -> Result<Self, AppError> {
        let database_url = required_env("DATABASE_URL")?;
        let redis_url = env::var("REDIS_URL")
            .ok()
            .map(|value| value.trim().to_owned())
            .filter(|value| !value.is_empty());

        let api_host = env::var("API_HOST").unwrap_or_else(|_| "127.0.0.1".to_owned());
        let api_port = env::var("API_PORT")
            .ok()
            .and_then(|value| value.parse::<u16>().ok())
            .unwrap_or(3001);

        let jwt_signing_secret = required_env("JWT_SIGNING_SECRET")?;
        if jwt_signing_secret.len() < 32 {
            return Err(AppError::Validation(
                "JWT_SIGNING_SECRET must be at least 32 characters".to_owned(),
            ));
        }

        // 32 bytes hex; validated again when the encryptor is built.
        let secret_encryption_key = required_env("SECRET_ENCRYPTION_KEY")?;

        let bootstrap_token = required_env("BOOTSTRAP_TOKEN")?;
        if bootstrap_token.len() < 32 {
            return Err(AppError::Validation(
                "BOOTSTRAP_TOKEN must be at least 32 characters".to_owned(),
            ));
        }

        let totp_issuer = env::var("TOTP_ISSUER").unwrap_or_else(|_| "Clavis".to_owned());

        // Password hashing cost; the hasher enforces the OWASP floor.
        let argon2_memory_kib = parse_env_u32("ARGON2_MEMORY_KIB", 19_456)?;
        let argon2_time_cost = parse_env_u32("ARGON2_TIME_COST", 2)?;
        let argon2_parallelism = parse_env_u32("ARGON2_PARALLELISM", 1)?;

        let cors_allowed_origins = env::var("CORS_ALLOWED_ORIGINS")
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|origin| !origin.is_empty())
            .map(str::to_owned)
            .collect();

        let webhook_dispatch_interval_ms =
            parse_env_u64("WEBHOOK_DISPATCH_INTERVAL_MS", 1_000)?;
        let webhook_dispatch_batch_size = parse_env_u32("WEBHOOK_DISPATCH_BATCH_SIZE", 25)?;

        if webhook_dispatch_interval_ms == 0 {
            return Err(AppError::Validation(
                "WEBHOOK_DISPATCH_INTERVAL_MS must be greater than zero".to_owned(),
            ));
        }

        if webhook_dispatch_batch_size == 0 {
            return Err(AppError::Validation(
                "WEBHOOK_DISPATCH_BATCH_SIZE must be greater than zero".to_owned(),
            ));
        }

        Ok(Self {
            database_url,
            redis_url,
            api_host,
            api_port,
            jwt_signing_secret,
            secret_encryption_key,
            bootstrap_token,
            totp_issuer,
            argon2_memory_kib,
            argon2_time_cost,
            argon2_parallelism,
            cors_allowed_origins,
            webhook_dispatch_interval_ms,
            webhook_dispatch_batch_size,
        })
    }

    pub fn socket_address(&self) -> Result<SocketAddr, AppError> {
        let host = IpAddr::from_str(&self.api_host).map_err(|error| {
            AppError::Internal(format!("invalid API_HOST '{}': {error}", self.api_host))
        })?;
        Ok(SocketAddr::from((host, self.api_port)))
    }
}

pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .init();
}

fn required_env(name: &str) -> Result<String, AppError> {
    env::var(name).map_err(|_| AppError::Validation(format!("{name} is required")))
}

fn parse_env_u64(name: &str, default: u64) -> Result<u64, AppError> {
    match env::var(name) {
        Ok(value) => value.parse::<u64>().map_err(|error| {
            AppError::Validation(format!("invalid {name} value '{value}': {error}"))
        }),
        Err(_) => Ok(default),
    }
}

fn parse_env_u32(name: &str, default: u32) -> Result<u32, AppError> {
    match env::var(name) {
        Ok(value) => value.parse::<u32>().map_err(|error| {
            AppError::Validation(format!("invalid {name} value '{value}': {error}"))
        }),
        Err(_) => Ok(default),
    }
}
