//! # Passkey Server
//!
//! Multi-tenant passkey registration and sign-in over HTTP.
//!
//! ## Key Concepts
//! - **Tenant**: one application using the server, selected per request
//! - **Register token**: lets the application backend authorize a user to add a passkey
//! - **Verification token**: proof of a completed ceremony, redeemed by the application backend

use passkey_core::config::Config;
use passkey_core::handlers;
use passkey_core::state::AppState;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Main application entry point
///
/// This function:
/// 1. Sets up logging
/// 2. Loads configuration (fails without `TOKEN_SALT`)
/// 3. Connects storage and builds the shared state
/// 4. Sets up routes and starts the HTTP server
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Default: info level for most crates, debug level for the core
    // Can be overridden with RUST_LOG environment variable
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,passkey_core=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    tracing::info!("Configuration loaded: {:?}", config);

    let app_state = AppState::new(&config).await?;
    tracing::info!("Application state initialized");

    let app = handlers::router(app_state).layer(TraceLayer::new_for_http());

    let bind_addr = config.bind_address();
    tracing::info!("Starting server on {}", bind_addr);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
