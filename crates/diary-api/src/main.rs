//! Diary API Server
//!
//! REST API server for the workout diary.
//!
//! Author: hephaex@gmail.com

use diary_api::{create_router, state::AppState};
use diary_core::{AppConfig, Environment, SqliteStore};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn init_tracing(config: &AppConfig) {
    let default_level = config.logging.level.clone().unwrap_or_else(|| {
        match config.env {
            Environment::Prod => "info",
            Environment::Local | Environment::Dev => "debug",
        }
        .to_string()
    });

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!("diary_api={default_level},diary_core={default_level},audit=info,tower_http={default_level}")
            .into()
    });

    let include_location = config.logging.include_location;
    let registry = tracing_subscriber::registry().with(filter);

    match config.env {
        Environment::Local => registry
            .with(
                fmt::layer()
                    .with_file(include_location)
                    .with_line_number(include_location),
            )
            .init(),
        Environment::Dev | Environment::Prod => registry
            .with(
                fmt::layer()
                    .json()
                    .with_file(include_location)
                    .with_line_number(include_location),
            )
            .init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = AppConfig::load()?;
    init_tracing(&config);

    if config.jwt.refresh_ttl_secs <= config.jwt.access_ttl_secs {
        tracing::warn!(
            access_ttl_secs = config.jwt.access_ttl_secs,
            refresh_ttl_secs = config.jwt.refresh_ttl_secs,
            "Refresh tokens do not outlive access tokens"
        );
    }
    if !config.transport.require_secure {
        tracing::warn!("Secure transport is not required for login and registration");
    }

    let store = SqliteStore::connect(&config.database.url, config.database.max_connections).await?;
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let sweep_interval = config.blacklist.sweep_interval_secs;

    // Create application state
    let state = Arc::new(AppState::new(config, store)?);

    let sweeper = (sweep_interval > 0).then(|| {
        state
            .auth
            .blacklist()
            .spawn_sweeper(Duration::from_secs(sweep_interval))
    });

    let app = create_router(state);

    // Start server
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Diary API Server starting on http://{}", addr);
    tracing::info!("OpenAPI spec at http://{}/api-docs/openapi.json", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutdown signal received");
        })
        .await?;

    if let Some(sweeper) = sweeper {
        sweeper.abort();
    }

    Ok(())
}
