// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Fleetgate server binary.

use anyhow::Context;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use fleetgate::config::Config;
use fleetgate::scheduler;
use fleetgate::server::{self, AppState};
use fleetgate::store::{PostgresStore, Store};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if dotenvy::dotenv().is_err() {
        warn!("No .env file found, using environment variables only");
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("fleetgate=info,tower_http=info")),
        )
        .init();

    let config = Config::from_env().context("Failed to load configuration")?;

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await
        .context("Failed to connect to database")?;

    let postgres = PostgresStore::new(pool);
    postgres
        .apply_schema()
        .await
        .context("Failed to apply schema")?;
    let store: Arc<dyn Store> = Arc::new(postgres);

    let state = Arc::new(AppState::new(&config, store.clone()));

    let shutdown = Arc::new(Notify::new());
    // The poll loop drives the same scanner the HTTP trigger uses.
    let poll_loop = scheduler::spawn_poll_loop(
        state.scanner.clone(),
        config.scan_interval.as_secs(),
        shutdown.clone(),
    );

    let listener = tokio::net::TcpListener::bind(config.http_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.http_addr))?;
    info!(addr = %config.http_addr, "Fleetgate listening");

    axum::serve(listener, server::router(state))
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await
        .context("Server error")?;

    if let Some(handle) = poll_loop {
        handle.await.context("Scan loop panicked")?;
    }
    info!("Fleetgate stopped");
    Ok(())
}

async fn shutdown_signal(notify: Arc<Notify>) {
    if tokio::signal::ctrl_c().await.is_err() {
        warn!("Failed to listen for shutdown signal");
        return;
    }
    info!("Shutdown signal received");
    notify.notify_waiters();
}
