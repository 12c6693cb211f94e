// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Background worker comparing recorded app status with observed containers.
//!
//! `app_status` records the last commanded state. A container can die, be
//! removed by hand, or be started outside the provisioner, and the record
//! would never notice. The reconciler periodically inspects every
//! installation that has a container and reports drift. In
//! [`ReconcileMode::Correct`] it also rewrites the record to what it saw.
//!
//! Only `running` and `stopped` records are compared; `provisioning` and
//! `pending` are in flight and left alone.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::container::{ContainerManager, ContainerState};
use crate::error::{Error, Result};
use crate::locks::InstallationLocks;
use crate::model::AppStatus;
use crate::store::InstallationStore;

/// What to do about drift.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReconcileMode {
    /// Log drift only.
    #[default]
    Observe,
    /// Log drift and update the record.
    Correct,
}

impl FromStr for ReconcileMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "observe" => Ok(ReconcileMode::Observe),
            "correct" => Ok(ReconcileMode::Correct),
            other => Err(Error::InvalidRequest(format!(
                "invalid reconcile mode: {}",
                other
            ))),
        }
    }
}

/// Configuration for the reconciler.
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// How often to compare.
    pub poll_interval: Duration,
    /// Observe or correct.
    pub mode: ReconcileMode,
    /// Installations read from the store per page.
    pub batch_size: i64,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(300),
            mode: ReconcileMode::Observe,
            batch_size: 500,
        }
    }
}

/// Outcome of one pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Installations compared.
    pub checked: usize,
    /// Records that disagree with the container.
    pub drifted: usize,
    /// Records rewritten.
    pub corrected: usize,
    /// Installations that could not be inspected.
    pub errors: usize,
}

/// Background worker that detects status drift.
pub struct Reconciler {
    store: Arc<dyn InstallationStore>,
    containers: Arc<ContainerManager>,
    locks: InstallationLocks,
    config: ReconcilerConfig,
    shutdown: Arc<Notify>,
}

impl Reconciler {
    /// Create a new reconciler.
    pub fn new(
        store: Arc<dyn InstallationStore>,
        containers: Arc<ContainerManager>,
        locks: InstallationLocks,
        config: ReconcilerConfig,
    ) -> Self {
        Self {
            store,
            containers,
            locks,
            config,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Get a handle that can be used to signal shutdown.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    /// Run passes until shutdown is signalled.
    pub async fn run(&self) {
        info!(
            poll_interval_secs = self.config.poll_interval.as_secs(),
            mode = ?self.config.mode,
            "Reconciler started"
        );

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.notified() => {
                    info!("Reconciler shutting down");
                    break;
                }

                _ = tokio::time::sleep(self.config.poll_interval) => {
                    match self.reconcile_once().await {
                        Ok(report) if report.drifted > 0 || report.errors > 0 => {
                            info!(
                                checked = report.checked,
                                drifted = report.drifted,
                                corrected = report.corrected,
                                errors = report.errors,
                                "Reconcile pass finished"
                            );
                        }
                        Ok(report) => {
                            debug!(checked = report.checked, "Reconcile pass finished, no drift");
                        }
                        Err(e) => {
                            error!(error = %e, "Reconcile pass failed");
                        }
                    }
                }
            }
        }

        info!("Reconciler stopped");
    }

    /// Compare every installation with a container once.
    pub async fn reconcile_once(&self) -> Result<ReconcileReport> {
        let mut report = ReconcileReport::default();
        let batch_size = self.config.batch_size.max(1);
        let mut after = None;

        loop {
            let page = self.store.list_after(after, batch_size).await?;
            let Some(last) = page.last() else {
                break;
            };
            after = Some(last.id);
            let full = page.len() as i64 == batch_size;

            for inst in page {
                if !matches!(inst.app_status, AppStatus::Running | AppStatus::Stopped)
                    || inst.metadata.container_name.is_none()
                {
                    continue;
                }
                self.reconcile_installation(inst.id, &mut report).await?;
            }

            if !full {
                break;
            }
        }

        Ok(report)
    }

    async fn reconcile_installation(&self, id: Uuid, report: &mut ReconcileReport) -> Result<()> {
        let _guard = self.locks.acquire(id).await;
        // Re-read under the lock; a lifecycle call may have just finished.
        let Some(mut current) = self.store.get(id).await? else {
            return Ok(());
        };

        let observed = match self.containers.inspect(current.id).await {
            Ok(state) => state,
            Err(e) => {
                warn!(installation_id = %current.id, error = %e, "Failed to inspect container");
                report.errors += 1;
                return Ok(());
            }
        };
        report.checked += 1;

        let Some(actual) = drift(current.app_status, observed) else {
            return Ok(());
        };
        report.drifted += 1;
        warn!(
            installation_id = %current.id,
            recorded = %current.app_status,
            observed = ?observed,
            "App status drift detected"
        );

        if self.config.mode == ReconcileMode::Correct {
            current.app_status = actual;
            if self.store.update(&current).await? {
                report.corrected += 1;
                info!(installation_id = %current.id, app_status = %actual, "App status corrected");
            }
        }
        Ok(())
    }
}

/// Status the record should have, if it disagrees with `observed`.
fn drift(recorded: AppStatus, observed: ContainerState) -> Option<AppStatus> {
    match (recorded, observed) {
        (AppStatus::Running, ContainerState::Stopped | ContainerState::Missing) => {
            Some(AppStatus::Stopped)
        }
        (AppStatus::Stopped, ContainerState::Running) => Some(AppStatus::Running),
        _ => None,
    }
}
