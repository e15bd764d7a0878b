//! Clavis API composition root.

#![forbid(unsafe_code)]

mod api_config;
mod api_router;
mod api_services;
mod dto;
mod error;
mod handlers;
mod middleware;
mod state;

use clavis_core::AppError;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    dotenvy::dotenv().ok();
    api_config::init_tracing();

    let config = api_config::ApiConfig::load()?;

    let pool = api_services::connect_pool(&config.database_url).await?;
    let app_state = api_services::build_app_state(pool, &config)?;

    api_services::spawn_webhook_dispatcher(
        app_state.clone(),
        config.webhook_dispatch_interval_ms,
        config.webhook_dispatch_batch_size,
    );

    let app = api_router::build_router(app_state, &config.cors_allowed_origins);
    let address = config.socket_address()?;

    let listener = tokio::net::TcpListener::bind(address)
        .await
        .map_err(|error| AppError::Internal(format!("failed to bind listener: {error}")))?;

    info!(%address, "clavis-api listening");

    axum::serve(listener, app)
        .await
        .map_err(|error| AppError::Internal(format!("api server error: {error}")))
}
