// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Per-installation serialization of lifecycle operations.
//!
//! Provision, start, stop, delete, status changes, seat updates, backup and
//! restore for one installation run one at a time. Different installations
//! never wait on each other.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

/// Async mutex per installation id.
#[derive(Debug, Clone, Default)]
pub struct InstallationLocks {
    locks: Arc<DashMap<Uuid, Arc<Mutex<()>>>>,
}

impl InstallationLocks {
    /// Empty lock table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `installation_id`.
    pub async fn acquire(&self, installation_id: Uuid) -> OwnedMutexGuard<()> {
        let lock = self
            .locks
            .entry(installation_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        lock.lock_owned().await
    }

    /// Drop the entry for an installation that no longer exists.
    pub fn forget(&self, installation_id: Uuid) {
        // Keep entries someone is still holding or waiting on.
        self.locks
            .remove_if(&installation_id, |_, lock| Arc::strong_count(lock) == 1);
    }

    /// Number of tracked installations.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    /// Whether no installation is tracked.
    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_installation_is_serialized() {
        let locks = InstallationLocks::new();
        let id = Uuid::new_v4();
        let active = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let locks = locks.clone();
            let active = active.clone();
            let max_seen = max_seen.clone();
            handles.push(tokio::spawn(async move {
                let _guard = locks.acquire(id).await;
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                max_seen.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                active.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_different_installations_do_not_block() {
        let locks = InstallationLocks::new();
        let _a = locks.acquire(Uuid::new_v4()).await;
        let b = tokio::time::timeout(Duration::from_millis(100), locks.acquire(Uuid::new_v4())).await;
        assert!(b.is_ok());
        assert_eq!(locks.len(), 2);
    }

    #[tokio::test]
    async fn test_forget_keeps_held_locks() {
        let locks = InstallationLocks::new();
        let id = Uuid::new_v4();
        let guard = locks.acquire(id).await;
        locks.forget(id);
        assert_eq!(locks.len(), 1);
        drop(guard);
        locks.forget(id);
        assert!(locks.is_empty());
    }
}
