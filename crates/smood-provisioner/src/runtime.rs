// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Embeddable runtime for smood-provisioner.
//!
//! [`ProvisionerRuntime`] runs the HTTP API and, when configured, the drift
//! reconciler inside an existing tokio application.
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use smood_provisioner::config::Config;
//! use smood_provisioner::runner::SystemRunner;
//! use smood_provisioner::runtime::ProvisionerRuntime;
//! use smood_provisioner::store::PostgresStore;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     let pool = sqlx::PgPool::connect(&config.database_url).await?;
//!
//!     let runtime = ProvisionerRuntime::builder()
//!         .store(Arc::new(PostgresStore::new(pool)))
//!         .runner(Arc::new(SystemRunner::new()))
//!         .config(config)
//!         .build()?
//!         .start()
//!         .await?;
//!
//!     tokio::signal::ctrl_c().await?;
//!     runtime.shutdown().await?;
//!     Ok(())
//! }
//! ```

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use tokio::net::TcpListener;
use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::config::Config;
use crate::handlers::ProvisionerState;
use crate::reconciler::Reconciler;
use crate::runner::CommandRunner;
use crate::server;
use crate::store::InstallationStore;
use crate::tenant_db::{PgTenantDatabases, TenantDatabases};

/// Builder for creating a [`ProvisionerRuntime`].
#[derive(Default)]
pub struct ProvisionerRuntimeBuilder {
    store: Option<Arc<dyn InstallationStore>>,
    runner: Option<Arc<dyn CommandRunner>>,
    databases: Option<Arc<dyn TenantDatabases>>,
    config: Option<Config>,
    bind_addr: Option<SocketAddr>,
}

impl ProvisionerRuntimeBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the installation store (required).
    pub fn store(mut self, store: Arc<dyn InstallationStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Set the command runner (required).
    pub fn runner(mut self, runner: Arc<dyn CommandRunner>) -> Self {
        self.runner = Some(runner);
        self
    }

    /// Set the provisioner configuration (required).
    pub fn config(mut self, config: Config) -> Self {
        self.config = Some(config);
        self
    }

    /// Set the tenant database provisioner.
    ///
    /// Default: [`PgTenantDatabases`] built from the config's admin connection.
    pub fn databases(mut self, databases: Arc<dyn TenantDatabases>) -> Self {
        self.databases = Some(databases);
        self
    }

    /// Set the bind address for the HTTP server.
    ///
    /// Default: the config's `http_addr` (`0.0.0.0:$PORT`)
    pub fn bind_addr(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = Some(addr);
        self
    }

    /// Build the runtime configuration.
    ///
    /// Returns an error if required fields are missing.
    pub fn build(self) -> Result<ProvisionerRuntimeConfig> {
        let store = self
            .store
            .ok_or_else(|| anyhow::anyhow!("store is required"))?;
        let runner = self
            .runner
            .ok_or_else(|| anyhow::anyhow!("runner is required"))?;
        let config = self
            .config
            .ok_or_else(|| anyhow::anyhow!("config is required"))?;
        let databases = self.databases.unwrap_or_else(|| {
            Arc::new(PgTenantDatabases::new(config.tenant_db.clone())) as Arc<dyn TenantDatabases>
        });
        let bind_addr = self.bind_addr.unwrap_or(config.http_addr);

        Ok(ProvisionerRuntimeConfig {
            store,
            runner,
            databases,
            config,
            bind_addr,
        })
    }
}

/// Configuration for a [`ProvisionerRuntime`].
pub struct ProvisionerRuntimeConfig {
    store: Arc<dyn InstallationStore>,
    runner: Arc<dyn CommandRunner>,
    databases: Arc<dyn TenantDatabases>,
    config: Config,
    bind_addr: SocketAddr,
}

impl ProvisionerRuntimeConfig {
    /// Start the runtime, spawning the HTTP server and reconciler tasks.
    pub async fn start(self) -> Result<ProvisionerRuntime> {
        let state = Arc::new(ProvisionerState::new(
            self.store.clone(),
            self.runner.clone(),
            self.databases.clone(),
            &self.config,
        )?);

        // Start reconciler if enabled
        let reconciler = match self.config.reconciler.clone() {
            Some(reconciler_config) => {
                let reconciler = Reconciler::new(
                    self.store.clone(),
                    state.containers.clone(),
                    state.locks.clone(),
                    reconciler_config,
                );
                let shutdown = reconciler.shutdown_handle();
                let handle = tokio::spawn(async move {
                    reconciler.run().await;
                });
                Some((handle, shutdown))
            }
            None => {
                debug!("Reconciler disabled; app status reflects the last command");
                None
            }
        };

        // Start HTTP server task
        let listener = TcpListener::bind(self.bind_addr).await?;
        let bind_addr = listener.local_addr()?;
        let (server_shutdown_tx, server_shutdown_rx) = watch::channel(false);
        let server_handle = tokio::spawn(server::serve(
            listener,
            state.clone(),
            server_shutdown_rx,
        ));

        info!(
            bind_addr = %bind_addr,
            runner_type = self.runner.runner_type(),
            reconciler = reconciler.is_some(),
            auto_nginx = self.config.auto_nginx,
            "ProvisionerRuntime started"
        );

        Ok(ProvisionerRuntime {
            server_handle,
            reconciler,
            server_shutdown_tx,
            state,
            bind_addr,
        })
    }
}

/// A running provisioner that can be embedded in an application.
///
/// The runtime manages:
/// - HTTP server for tenant reporting and admin operations
/// - Drift reconciler (optional, when `RECONCILE_INTERVAL_SECS` is set)
///
/// Call [`shutdown`](Self::shutdown) for graceful termination.
pub struct ProvisionerRuntime {
    server_handle: JoinHandle<Result<()>>,
    reconciler: Option<(JoinHandle<()>, Arc<Notify>)>,
    server_shutdown_tx: watch::Sender<bool>,
    state: Arc<ProvisionerState>,
    bind_addr: SocketAddr,
}

impl ProvisionerRuntime {
    /// Create a new builder for configuring the runtime.
    pub fn builder() -> ProvisionerRuntimeBuilder {
        ProvisionerRuntimeBuilder::new()
    }

    /// Address the HTTP server is listening on.
    pub fn bind_addr(&self) -> SocketAddr {
        self.bind_addr
    }

    /// Get a reference to the shared handler state.
    pub fn state(&self) -> &Arc<ProvisionerState> {
        &self.state
    }

    /// Gracefully shut down the runtime.
    ///
    /// Signals the HTTP server and reconciler to stop, then waits for them.
    pub async fn shutdown(self) -> Result<()> {
        info!("ProvisionerRuntime shutting down...");

        // Signal server shutdown
        let _ = self.server_shutdown_tx.send(true);

        // Stop reconciler
        if let Some((handle, shutdown)) = self.reconciler {
            shutdown.notify_one();
            if let Err(e) = handle.await {
                error!("Reconciler task panicked: {}", e);
            }
        }

        // Wait for server
        match self.server_handle.await {
            Ok(Ok(())) => {
                info!("ProvisionerRuntime shutdown complete");
                Ok(())
            }
            Ok(Err(e)) => {
                error!("ProvisionerRuntime server error during shutdown: {}", e);
                Err(e)
            }
            Err(e) => {
                error!("ProvisionerRuntime server task panicked: {}", e);
                Err(anyhow::anyhow!("server task panicked: {}", e))
            }
        }
    }

    /// Check if the runtime is still running.
    pub fn is_running(&self) -> bool {
        let reconciler_running = self
            .reconciler
            .as_ref()
            .is_none_or(|(handle, _)| !handle.is_finished());
        !self.server_handle.is_finished() && reconciler_running
    }
}
