//! authgate API Server
//!
//! Author: hephaex@gmail.com

use anyhow::Context;
use authgate_api::{auth::CommonPasswordSet, create_router, state::AppState};
use authgate_core::config::{AppConfig, LoggingConfig};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration: TOML file if given, then environment overrides
    let config = match std::env::var("AUTHGATE_CONFIG") {
        Ok(path) => AppConfig::from_file(path)?.with_env_override()?,
        Err(_) => AppConfig::from_env()?,
    };

    init_tracing(&config.logging);

    config.validate().context("Invalid configuration")?;

    let common = CommonPasswordSet::load(config.password.common_passwords_path.as_deref())
        .context("Failed to load common password list")?;
    tracing::info!(entries = common.len(), "Loaded common password list");

    let pool = if config.database.url.is_some() {
        let pool = authgate_core::connect(&config.database).await?;
        if config.database.run_migrations {
            authgate_core::migrate(&pool).await?;
        }
        tracing::info!("Using PostgreSQL storage");
        Some(pool)
    } else {
        tracing::warn!("DATABASE_URL is not set; users and refresh tokens are kept in memory");
        None
    };

    let addr = format!("{}:{}", config.server.host, config.server.port);

    // Create application state
    let state = Arc::new(AppState::build(config, common, pool)?);

    let purge_task = state.spawn_refresh_token_purge();

    // Create router
    let app = create_router(state);

    // Start server
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("authgate API Server starting on http://{}", addr);
    tracing::info!("Swagger UI available at http://{}/swagger-ui/", addr);
    tracing::info!("OpenAPI spec at http://{}/api-docs/openapi.json", addr);

    axum::serve(listener, app).await?;
    purge_task.abort();

    Ok(())
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&logging.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_file(logging.include_location)
        .with_line_number(logging.include_location);

    if logging.json_format {
        builder.json().init();
    } else {
        builder.init();
    }
}
