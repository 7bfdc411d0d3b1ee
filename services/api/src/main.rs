use anyhow::Result;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod error;
mod middleware;
mod models;
mod routes;
mod state;

use auth::RbacCore;
use common::CoreConfig;
use tokio::net::TcpListener;

use crate::state::AppState;

/// Interval of the best-effort expired-session sweep
const SESSION_SWEEP_INTERVAL: Duration = Duration::from_secs(300);

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Starting API service");

    let config = CoreConfig::from_env()?;
    info!(
        "Session limit {} per user, timeout {}s",
        config.session.max_concurrent_sessions, config.session.session_timeout_secs
    );

    let app_state = AppState::new(RbacCore::new(config));

    // Expiry is enforced on access; the sweep only reclaims memory
    let sweeper = app_state.core.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(SESSION_SWEEP_INTERVAL);
        loop {
            interval.tick().await;
            sweeper.sessions().cleanup_expired_sessions().await;
        }
    });

    // Start the web server
    let app = routes::create_router(app_state);

    let bind_addr = std::env::var("API_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".to_string());
    let listener = TcpListener::bind(&bind_addr).await?;
    info!("API service listening on {}", bind_addr);

    axum::serve(listener, app).await?;

    Ok(())
}
