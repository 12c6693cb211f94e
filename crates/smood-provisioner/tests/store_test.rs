// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Integration tests for the PostgreSQL installation store.
//!
//! These tests require a PostgreSQL database. Set TEST_SMOOD_DATABASE_URL
//! to run them.

use chrono::{Duration, Utc};
use serde_json::json;
use smood_provisioner::migrations::MIGRATOR;
use smood_provisioner::model::{AppStatus, Installation, LicenseTier, NewHeartbeat};
use smood_provisioner::store::{InstallationStore, OverviewWindow, PostgresStore};
use sqlx::PgPool;
use uuid::Uuid;

/// Helper macro to skip tests if no database URL is set.
macro_rules! skip_if_no_db {
    () => {
        if std::env::var("TEST_SMOOD_DATABASE_URL").is_err() {
            eprintln!("Skipping test: TEST_SMOOD_DATABASE_URL not set");
            return;
        }
    };
}

async fn get_test_store() -> Option<PostgresStore> {
    let database_url = std::env::var("TEST_SMOOD_DATABASE_URL").ok()?;
    let pool = PgPool::connect(&database_url).await.ok()?;
    MIGRATOR.run(&pool).await.ok()?;
    Some(PostgresStore::new(pool))
}

fn create_test_installation() -> Installation {
    let mut inst = Installation::new(Uuid::new_v4());
    inst.studio_name = Some("Moon Studio".to_string());
    inst.contact_email = Some(format!("{}@moon.test", inst.id));
    inst.license_key = Some(format!("LIC-{}", inst.id));
    inst.primary_ip = Some(format!("10.{}", inst.id.simple()));
    inst.app_status = AppStatus::Pending;
    inst.metadata.db_name = Some("smood_abc123".to_string());
    inst.metadata.host_port = Some(9001);
    inst.seats = Some(5);
    inst
}

#[tokio::test]
async fn test_insert_get_update_delete() {
    skip_if_no_db!();
    let Some(store) = get_test_store().await else {
        eprintln!("Skipping test: could not connect to database");
        return;
    };

    let mut inst = create_test_installation();
    store.insert(&inst).await.expect("Failed to insert");

    let loaded = store.get(inst.id).await.unwrap().expect("Installation should exist");
    assert_eq!(loaded.studio_name.as_deref(), Some("Moon Studio"));
    assert_eq!(loaded.app_status, AppStatus::Pending);
    assert_eq!(loaded.license_tier, LicenseTier::Trial);
    assert_eq!(loaded.metadata.db_name.as_deref(), Some("smood_abc123"));
    assert_eq!(loaded.metadata.host_port, Some(9001));
    assert_eq!(loaded.seats, Some(5));

    inst.app_status = AppStatus::Running;
    inst.license_tier = LicenseTier::Pro;
    inst.city = Some("Jakarta".to_string());
    assert!(store.update(&inst).await.unwrap());

    let loaded = store.get(inst.id).await.unwrap().unwrap();
    assert_eq!(loaded.app_status, AppStatus::Running);
    assert_eq!(loaded.license_tier, LicenseTier::Pro);
    assert_eq!(loaded.city.as_deref(), Some("Jakarta"));
    assert!(loaded.updated_at >= loaded.created_at);

    assert!(store.delete(inst.id).await.unwrap());
    assert!(store.get(inst.id).await.unwrap().is_none());
    assert!(!store.delete(inst.id).await.unwrap());
    assert!(!store.update(&inst).await.unwrap());
}

#[tokio::test]
async fn test_lookups() {
    skip_if_no_db!();
    let Some(store) = get_test_store().await else {
        eprintln!("Skipping test: could not connect to database");
        return;
    };

    let mut inst = create_test_installation();
    let booking = format!("BK-{}", inst.id);
    inst.metadata.booking_id = Some(booking.clone());
    store.insert(&inst).await.unwrap();

    let key = inst.license_key.clone().unwrap();
    let ip = inst.primary_ip.clone().unwrap();
    let email = inst.contact_email.clone().unwrap();

    let by_key = store.find_by_license_key(&key).await.unwrap().unwrap();
    assert_eq!(by_key.id, inst.id);
    let by_ip = store.find_by_primary_ip(&ip).await.unwrap().unwrap();
    assert_eq!(by_ip.id, inst.id);
    let by_contact = store.find_by_contact(&email, "Moon Studio").await.unwrap().unwrap();
    assert_eq!(by_contact.id, inst.id);
    let by_booking = store.find_by_booking_id(&booking).await.unwrap().unwrap();
    assert_eq!(by_booking.id, inst.id);

    assert!(store.find_by_contact(&email, "Other Studio").await.unwrap().is_none());
    assert!(store.find_by_license_key("LIC-none").await.unwrap().is_none());

    store.delete(inst.id).await.unwrap();
}

#[tokio::test]
async fn test_list_after_pages_by_id() {
    skip_if_no_db!();
    let Some(store) = get_test_store().await else {
        eprintln!("Skipping test: could not connect to database");
        return;
    };

    let mut ids = Vec::new();
    for _ in 0..3 {
        let inst = create_test_installation();
        store.insert(&inst).await.unwrap();
        ids.push(inst.id);
    }
    ids.sort();

    // Other rows may share the database; only ours are checked.
    let mut seen = Vec::new();
    let mut after = None;
    loop {
        let page = store.list_after(after, 2).await.unwrap();
        assert!(page.len() <= 2);
        let Some(last) = page.last() else {
            break;
        };
        if let Some(prev) = after {
            assert!(page.iter().all(|i| i.id > prev));
        }
        after = Some(last.id);
        seen.extend(page.into_iter().map(|i| i.id).filter(|id| ids.contains(id)));
    }
    assert_eq!(seen, ids);

    for id in ids {
        store.delete(id).await.unwrap();
    }
}

#[tokio::test]
async fn test_heartbeats_cascade_on_delete() {
    skip_if_no_db!();
    let Some(store) = get_test_store().await else {
        eprintln!("Skipping test: could not connect to database");
        return;
    };

    let inst = create_test_installation();
    store.insert(&inst).await.unwrap();

    store
        .insert_heartbeat(
            inst.id,
            &NewHeartbeat {
                ip_address: Some("10.0.0.1".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    let latest = store
        .insert_heartbeat(
            inst.id,
            &NewHeartbeat {
                app_version: Some("2.4.0".to_string()),
                payload: Some(json!({ "metrics": { "users": 2 } })),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let found = store.latest_heartbeat(inst.id).await.unwrap().unwrap();
    assert_eq!(found.id, latest.id);
    assert_eq!(found.payload, Some(json!({ "metrics": { "users": 2 } })));
    assert_eq!(store.list_heartbeats(inst.id, 10).await.unwrap().len(), 2);

    store.delete(inst.id).await.unwrap();
    assert!(store.list_heartbeats(inst.id, 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_overview_counts_new_rows() {
    skip_if_no_db!();
    let Some(store) = get_test_store().await else {
        eprintln!("Skipping test: could not connect to database");
        return;
    };

    let now = Utc::now();
    let window = OverviewWindow {
        online_since: now - Duration::minutes(5),
        trial_ends_before: now + Duration::days(3),
    };
    let before = store.overview(window).await.unwrap();

    let mut inst = create_test_installation();
    inst.last_seen_at = Some(now);
    inst.trial_ends_at = Some(now + Duration::days(1));
    store.insert(&inst).await.unwrap();

    let after = store.overview(window).await.unwrap();
    assert!(after.installs_total >= 1);
    assert_eq!(after.installs_online, before.installs_online + 1);
    assert_eq!(after.trials_expiring, before.trials_expiring + 1);

    store.delete(inst.id).await.unwrap();
}

#[tokio::test]
async fn test_health_check() {
    skip_if_no_db!();
    let Some(store) = get_test_store().await else {
        eprintln!("Skipping test: could not connect to database");
        return;
    };
    assert!(store.health_check().await.unwrap());
}
