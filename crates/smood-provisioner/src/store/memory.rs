// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-process [`InstallationStore`].

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{InstallationStore, OverviewWindow};
use crate::error::Result;
use crate::model::{Heartbeat, Installation, LicenseTier, NewHeartbeat, Overview};

#[derive(Default)]
struct MemoryState {
    installations: HashMap<Uuid, Installation>,
    heartbeats: Vec<Heartbeat>,
}

/// [`InstallationStore`] kept in memory. Cloning shares the data.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<RwLock<MemoryState>>,
}

impl MemoryStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored heartbeats across all installations.
    pub async fn heartbeat_count(&self) -> usize {
        self.state.read().await.heartbeats.len()
    }

    async fn find_latest_created<F>(&self, pred: F) -> Option<Installation>
    where
        F: Fn(&Installation) -> bool,
    {
        self.state
            .read()
            .await
            .installations
            .values()
            .filter(|i| pred(i))
            .max_by_key(|i| i.created_at)
            .cloned()
    }
}

#[async_trait]
impl InstallationStore for MemoryStore {
    async fn insert(&self, inst: &Installation) -> Result<()> {
        self.state
            .write()
            .await
            .installations
            .insert(inst.id, inst.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Installation>> {
        Ok(self.state.read().await.installations.get(&id).cloned())
    }

    async fn update(&self, inst: &Installation) -> Result<bool> {
        let mut state = self.state.write().await;
        match state.installations.get_mut(&inst.id) {
            Some(existing) => {
                *existing = inst.clone();
                existing.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete(&self, id: Uuid) -> Result<bool> {
        let mut state = self.state.write().await;
        let removed = state.installations.remove(&id).is_some();
        state.heartbeats.retain(|hb| hb.installation_id != id);
        Ok(removed)
    }

    async fn list_recent(&self, limit: i64) -> Result<Vec<Installation>> {
        let state = self.state.read().await;
        let mut all: Vec<Installation> = state.installations.values().cloned().collect();
        all.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        all.truncate(limit.max(0) as usize);
        Ok(all)
    }

    async fn list_after(&self, after: Option<Uuid>, limit: i64) -> Result<Vec<Installation>> {
        let state = self.state.read().await;
        let mut page: Vec<Installation> = state
            .installations
            .values()
            .filter(|i| after.is_none_or(|a| i.id > a))
            .cloned()
            .collect();
        page.sort_by_key(|i| i.id);
        page.truncate(limit.max(0) as usize);
        Ok(page)
    }

    async fn find_by_license_key(&self, license_key: &str) -> Result<Option<Installation>> {
        Ok(self
            .find_latest_created(|i| i.license_key.as_deref() == Some(license_key))
            .await)
    }

    async fn find_by_primary_ip(&self, primary_ip: &str) -> Result<Option<Installation>> {
        Ok(self
            .find_latest_created(|i| i.primary_ip.as_deref() == Some(primary_ip))
            .await)
    }

    async fn find_by_contact(&self, contact_email: &str, name: &str) -> Result<Option<Installation>> {
        Ok(self
            .find_latest_created(|i| {
                i.contact_email.as_deref() == Some(contact_email)
                    && (i.studio_name.as_deref() == Some(name)
                        || i.company_name.as_deref() == Some(name))
            })
            .await)
    }

    async fn find_by_booking_id(&self, booking_id: &str) -> Result<Option<Installation>> {
        Ok(self
            .find_latest_created(|i| i.metadata.booking_id.as_deref() == Some(booking_id))
            .await)
    }

    async fn insert_heartbeat(&self, installation_id: Uuid, heartbeat: &NewHeartbeat) -> Result<Heartbeat> {
        let hb = Heartbeat {
            id: Uuid::new_v4(),
            installation_id,
            ip_address: heartbeat.ip_address.clone(),
            app_version: heartbeat.app_version.clone(),
            environment: heartbeat.environment.clone(),
            payload: heartbeat.payload.clone(),
            received_at: Utc::now(),
        };
        self.state.write().await.heartbeats.push(hb.clone());
        Ok(hb)
    }

    async fn latest_heartbeat(&self, installation_id: Uuid) -> Result<Option<Heartbeat>> {
        Ok(self
            .state
            .read()
            .await
            .heartbeats
            .iter()
            .filter(|hb| hb.installation_id == installation_id)
            .max_by_key(|hb| hb.received_at)
            .cloned())
    }

    async fn list_heartbeats(&self, installation_id: Uuid, limit: i64) -> Result<Vec<Heartbeat>> {
        let state = self.state.read().await;
        let mut found: Vec<Heartbeat> = state
            .heartbeats
            .iter()
            .filter(|hb| hb.installation_id == installation_id)
            .cloned()
            .collect();
        found.sort_by(|a, b| b.received_at.cmp(&a.received_at));
        found.truncate(limit.max(0) as usize);
        Ok(found)
    }

    async fn overview(&self, window: OverviewWindow) -> Result<Overview> {
        let state = self.state.read().await;
        let all = state.installations.values();
        let mut overview = Overview::default();
        for inst in all {
            overview.installs_total += 1;
            if inst.last_seen_at.is_some_and(|seen| seen >= window.online_since) {
                overview.installs_online += 1;
            }
            if inst.license_tier == LicenseTier::Trial
                && inst
                    .trial_ends_at
                    .is_some_and(|end| end <= window.trial_ends_before)
            {
                overview.trials_expiring += 1;
            }
        }
        Ok(overview)
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }
}
