// SPDX-License-Identifier: MIT

//! Fitlink API Server
//!
//! Connects user accounts to Fitbit and serves normalized daily health
//! summaries with automatic OAuth token refresh.

use fitlink::{
    config::Config,
    db::FirestoreDb,
    services::{FitbitService, OAuthStateStore},
    AppState,
};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize structured JSON logging
    init_logging();

    // Load configuration from environment
    let config = Config::from_env().expect("Failed to load configuration");
    tracing::info!(port = config.port, "Starting Fitlink API");

    // Initialize Firestore database
    let db = FirestoreDb::new(&config.gcp_project_id)
        .await
        .expect("Failed to connect to Firestore");

    // Initialize shared token cache and refresh locks
    // These are shared across all FitbitService instances within this process
    let token_cache = Arc::new(dashmap::DashMap::new());
    let refresh_locks = Arc::new(dashmap::DashMap::new());
    tracing::info!("Token cache initialized");

    // Initialize Fitbit service
    let fitbit = FitbitService::new(
        config.fitbit_client_id.clone(),
        config.fitbit_client_secret.clone(),
        db.clone(),
        token_cache,
        refresh_locks,
    );

    // Pending OAuth states live in-process; see DESIGN.md for the
    // multi-instance limitation.
    let oauth_states = OAuthStateStore::new();

    // Build shared state
    let state = Arc::new(AppState {
        config: config.clone(),
        db,
        fitbit,
        oauth_states,
    });

    // Build router
    let app = fitlink::routes::create_router(state);

    // Start server
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(address = %addr, "Server listening");

    axum::serve(listener, app).await?;
    Ok(())
}

/// Initialize structured JSON logging.
fn init_logging() {
    let format = tracing_subscriber::fmt::layer()
        .json()
        .with_target(false)
        .with_current_span(true)
        .flatten_event(true);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("fitlink=debug".parse().unwrap())
                .add_directive("info".parse().unwrap()),
        )
        .with(format)
        .init();
}
