// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Tests for status drift detection.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::TestHarness;
use smood_provisioner::model::AppStatus;
use smood_provisioner::reconciler::{ReconcileMode, ReconcileReport, Reconciler, ReconcilerConfig};
use smood_provisioner::runner::MockResponse;
use smood_provisioner::store::InstallationStore;

fn reconciler(h: &TestHarness, mode: ReconcileMode) -> Reconciler {
    paged_reconciler(h, mode, 500)
}

fn paged_reconciler(h: &TestHarness, mode: ReconcileMode, batch_size: i64) -> Reconciler {
    Reconciler::new(
        h.state.store.clone(),
        h.state.containers.clone(),
        h.state.locks.clone(),
        ReconcilerConfig {
            poll_interval: Duration::from_millis(10),
            mode,
            batch_size,
        },
    )
}

#[tokio::test]
async fn test_observe_mode_never_writes() {
    let h = TestHarness::new();
    let running = h.provisioned_installation(AppStatus::Running).await;

    // No container at all.
    let report = reconciler(&h, ReconcileMode::Observe)
        .reconcile_once()
        .await
        .unwrap();

    assert_eq!(
        report,
        ReconcileReport {
            checked: 1,
            drifted: 1,
            corrected: 0,
            errors: 0,
        }
    );
    let stored = h.store.get(running.id).await.unwrap().unwrap();
    assert_eq!(stored.app_status, AppStatus::Running);
}

#[tokio::test]
async fn test_correct_mode_rewrites_status() {
    let h = TestHarness::new();
    let died = h.provisioned_installation(AppStatus::Running).await;
    let revived = h.provisioned_installation(AppStatus::Stopped).await;
    let healthy = h.provisioned_installation(AppStatus::Running).await;

    let ps = format!(
        "smood-app-{}\texited\nsmood-app-{}\trunning\nsmood-app-{}\trunning\n",
        died.id, revived.id, healthy.id
    );
    h.runner
        .respond(&["docker", "ps"], MockResponse::stdout(ps))
        .await;

    let report = reconciler(&h, ReconcileMode::Correct)
        .reconcile_once()
        .await
        .unwrap();
    assert_eq!(report.checked, 3);
    assert_eq!(report.drifted, 2);
    assert_eq!(report.corrected, 2);

    let status = |id| {
        let store = h.store.clone();
        async move { store.get(id).await.unwrap().unwrap().app_status }
    };
    assert_eq!(status(died.id).await, AppStatus::Stopped);
    assert_eq!(status(revived.id).await, AppStatus::Running);
    assert_eq!(status(healthy.id).await, AppStatus::Running);
}

#[tokio::test]
async fn test_pass_covers_every_page() {
    let h = TestHarness::new();
    let mut ids = Vec::new();
    for _ in 0..5 {
        ids.push(h.provisioned_installation(AppStatus::Running).await.id);
    }

    // All containers are gone; every record drifts.
    let report = paged_reconciler(&h, ReconcileMode::Correct, 2)
        .reconcile_once()
        .await
        .unwrap();
    assert_eq!(report.checked, 5);
    assert_eq!(report.corrected, 5);

    for id in ids {
        assert_eq!(
            h.store.get(id).await.unwrap().unwrap().app_status,
            AppStatus::Stopped
        );
    }
}

#[tokio::test]
async fn test_in_flight_records_are_skipped() {
    let h = TestHarness::new();
    h.provisioned_installation(AppStatus::Pending).await;
    h.provisioned_installation(AppStatus::Provisioning).await;

    let mut registered = h.provisioned_installation(AppStatus::Running).await;
    registered.metadata.container_name = None;
    h.store.update(&registered).await.unwrap();

    let report = reconciler(&h, ReconcileMode::Correct)
        .reconcile_once()
        .await
        .unwrap();
    assert_eq!(report, ReconcileReport::default());
    assert!(h.runner.calls().await.is_empty());
}

#[tokio::test]
async fn test_inspect_failure_is_counted() {
    let h = TestHarness::new();
    let inst = h.provisioned_installation(AppStatus::Running).await;
    h.runner
        .respond(&["docker", "ps"], MockResponse::fail(1, "Cannot connect to the Docker daemon"))
        .await;

    let report = reconciler(&h, ReconcileMode::Correct)
        .reconcile_once()
        .await
        .unwrap();
    assert_eq!(report.errors, 1);
    assert_eq!(report.checked, 0);
    assert_eq!(
        h.store.get(inst.id).await.unwrap().unwrap().app_status,
        AppStatus::Running
    );
}

#[tokio::test]
async fn test_run_stops_on_shutdown() {
    let h = TestHarness::new();
    let reconciler = Arc::new(reconciler(&h, ReconcileMode::Observe));
    let shutdown = reconciler.shutdown_handle();

    let worker = reconciler.clone();
    let handle = tokio::spawn(async move { worker.run().await });

    tokio::time::sleep(Duration::from_millis(30)).await;
    shutdown.notify_one();

    tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .expect("reconciler should stop")
        .unwrap();
}
