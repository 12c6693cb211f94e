// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Smood Provisioner - Tenant Provisioning Server
//!
//! An HTTP server responsible for:
//! - Provisioning tenant databases and containers
//! - Container lifecycle (run, pause, delete)
//! - Nginx + Certbot subdomains
//! - Tenant database backups and restores
//! - Tenant registration and heartbeats

use std::sync::Arc;
use tracing::{info, warn};

use smood_provisioner::config::Config;
use smood_provisioner::migrations;
use smood_provisioner::runner::{CommandRunner, SystemRunner};
use smood_provisioner::runtime::ProvisionerRuntime;
use smood_provisioner::store::PostgresStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "smood_provisioner=info".into()),
        )
        .init();

    // Load .env file if present
    if let Err(e) = dotenvy::dotenv() {
        warn!("No .env file loaded: {}", e);
    }

    // Load configuration
    let config = Config::from_env()?;

    info!(
        http_addr = %config.http_addr,
        port_range = %format!("{}-{}", config.port_range.start, config.port_range.end),
        backup_dir = %config.backup.root_dir.display(),
        auto_nginx = config.auto_nginx,
        "Starting Smood Provisioner"
    );

    // Connect to database
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await?;

    info!("Connected to database");

    migrations::run(&pool).await?;

    info!("Database schema verified");

    let runner = Arc::new(SystemRunner::new());
    info!(runner_type = runner.runner_type(), "Runner initialized");

    for tool in ["docker", "pg_dump", "pg_restore"] {
        if !runner.is_available(tool).await {
            warn!(tool, "Tool not found on PATH");
        }
    }

    let http_addr = config.http_addr;

    // Start the runtime
    let runtime = ProvisionerRuntime::builder()
        .store(Arc::new(PostgresStore::new(pool)))
        .runner(runner)
        .config(config)
        .build()?
        .start()
        .await?;

    info!(addr = %http_addr, "Provisioner server ready");

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    // Graceful shutdown
    runtime.shutdown().await?;

    info!("Smood Provisioner shut down");

    Ok(())
}
