// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Questlog API Server
//!
//! Serves profiles, goals, conversations and the leaderboard from a local
//! cache that is reconciled with Firestore whenever Firestore is reachable.

use anyhow::Context;
use questlog::{
    config::Config,
    db::{FirestoreGateway, LocalCache},
    services::{LeaderboardService, Reconciler},
    AppState,
};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize structured JSON logging for GCP
    init_logging()?;

    // Load configuration from environment
    let config = Config::from_env().context("Failed to load configuration")?;
    tracing::info!(port = config.port, "Starting Questlog API");

    let cache = LocalCache::open(&config.cache_dir).context("Failed to open local cache")?;

    // An unreachable Firestore is not fatal: the service runs from the cache
    // and every write stays pending until a later start.
    let gateway = if config.offline_mode {
        tracing::warn!("OFFLINE_MODE set, not connecting to Firestore");
        FirestoreGateway::new_offline()
    } else {
        match FirestoreGateway::new(&config.gcp_project_id).await {
            Ok(gateway) => gateway,
            Err(e) => {
                tracing::error!(error = %e, "Firestore unreachable, continuing offline");
                FirestoreGateway::new_offline()
            }
        }
    };

    let reconciler = Reconciler::new(cache, gateway.clone(), config.gateway_timeout);
    let leaderboard = LeaderboardService::new(
        gateway,
        config.leaderboard_population_cap,
        config.gateway_timeout,
    );

    // Build shared state
    let state = Arc::new(AppState {
        config: config.clone(),
        reconciler,
        leaderboard,
    });

    // Build router
    let app = questlog::routes::create_router(state);

    // Start server
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(address = %addr, "Server listening");

    axum::serve(listener, app).await?;
    Ok(())
}

/// Initialize structured JSON logging (GCP-compliant).
fn init_logging() -> anyhow::Result<()> {
    let format = tracing_subscriber::fmt::layer()
        .json()
        .with_target(false)
        .with_current_span(true)
        .flatten_event(true);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("questlog=debug".parse()?)
                .add_directive("info".parse()?),
        )
        .with(format)
        .init();
    Ok(())
}
