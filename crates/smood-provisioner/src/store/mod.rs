// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Installation and heartbeat persistence.
//!
//! [`PostgresStore`] is the production backend. [`MemoryStore`] keeps
//! everything in process and backs handler tests and local experiments.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PostgresStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::Result;
use crate::model::{Heartbeat, Installation, NewHeartbeat, Overview};

/// Default number of rows returned by list queries.
pub const DEFAULT_LIST_LIMIT: i64 = 50;

/// Cut-offs used by [`InstallationStore::overview`].
#[derive(Debug, Clone, Copy)]
pub struct OverviewWindow {
    /// Installations seen after this instant are online.
    pub online_since: DateTime<Utc>,
    /// Trials ending at or before this instant are expiring.
    pub trial_ends_before: DateTime<Utc>,
}

/// Storage for installations and their heartbeats.
#[async_trait]
pub trait InstallationStore: Send + Sync {
    /// Insert a new installation.
    async fn insert(&self, inst: &Installation) -> Result<()>;

    /// Fetch one installation.
    async fn get(&self, id: Uuid) -> Result<Option<Installation>>;

    /// Overwrite an existing installation. `updated_at` is set to now.
    ///
    /// Returns `false` when no such installation exists.
    async fn update(&self, inst: &Installation) -> Result<bool>;

    /// Delete an installation together with its heartbeats.
    ///
    /// Returns `false` when no such installation exists.
    async fn delete(&self, id: Uuid) -> Result<bool>;

    /// Most recently updated installations first.
    async fn list_recent(&self, limit: i64) -> Result<Vec<Installation>>;

    /// Up to `limit` installations ordered by id, starting after `after`.
    async fn list_after(&self, after: Option<Uuid>, limit: i64) -> Result<Vec<Installation>>;

    /// Installation holding `license_key`.
    async fn find_by_license_key(&self, license_key: &str) -> Result<Option<Installation>>;

    /// Installation reporting `primary_ip`.
    async fn find_by_primary_ip(&self, primary_ip: &str) -> Result<Option<Installation>>;

    /// Latest created installation with this contact email whose studio or
    /// company name equals `name`.
    async fn find_by_contact(&self, contact_email: &str, name: &str) -> Result<Option<Installation>>;

    /// Installation linked to `booking_id`.
    async fn find_by_booking_id(&self, booking_id: &str) -> Result<Option<Installation>>;

    /// Record a heartbeat.
    async fn insert_heartbeat(&self, installation_id: Uuid, heartbeat: &NewHeartbeat) -> Result<Heartbeat>;

    /// Most recent heartbeat of an installation.
    async fn latest_heartbeat(&self, installation_id: Uuid) -> Result<Option<Heartbeat>>;

    /// Heartbeats of an installation, newest first.
    async fn list_heartbeats(&self, installation_id: Uuid, limit: i64) -> Result<Vec<Heartbeat>>;

    /// Fleet counters.
    async fn overview(&self, window: OverviewWindow) -> Result<Overview>;

    /// Whether the backend is reachable.
    async fn health_check(&self) -> Result<bool>;
}
