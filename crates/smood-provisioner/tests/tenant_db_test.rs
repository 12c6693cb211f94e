// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Tests for tenant database provisioning.

use std::time::Duration;

use smood_provisioner::error::ErrorKind;
use smood_provisioner::tenant_db::{
    PgTenantDatabases, TenantDatabases, TenantDbConfig, generate_db_name,
};

/// Helper macro to skip tests if no admin database is configured.
macro_rules! skip_if_no_db {
    () => {
        if std::env::var("TEST_SMOOD_PG_ADMIN_PASSWORD").is_err() {
            eprintln!("Skipping test: TEST_SMOOD_PG_ADMIN_PASSWORD not set");
            return;
        }
    };
}

fn configured() -> TenantDbConfig {
    TenantDbConfig {
        host: Some("127.0.0.1".to_string()),
        port: 5432,
        admin_user: Some("postgres".to_string()),
        admin_password: Some("secret".to_string()),
        owner: None,
        connect_timeout: Duration::from_millis(200),
    }
}

#[tokio::test]
async fn test_missing_password_is_configuration_error() {
    let databases = PgTenantDatabases::new(TenantDbConfig {
        admin_password: None,
        ..configured()
    });

    let err = databases
        .create_database_if_not_exists("smood_abc123")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);
    assert!(err.to_string().contains("PG_ADMIN_PASSWORD"));
}

#[tokio::test]
async fn test_missing_user_is_configuration_error() {
    let databases = PgTenantDatabases::new(TenantDbConfig {
        admin_user: Some(String::new()),
        ..configured()
    });

    let err = databases.connect_options().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);
    assert!(err.to_string().contains("PG_ADMIN_USER"));
}

#[tokio::test]
async fn test_silent_server_times_out() {
    // Accepts connections and never answers the startup handshake.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let server = tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            held.push(socket);
        }
    });

    let databases = PgTenantDatabases::new(TenantDbConfig {
        port,
        ..configured()
    });
    let err = tokio::time::timeout(
        Duration::from_secs(5),
        databases.create_database_if_not_exists("smood_abc123"),
    )
    .await
    .expect("connect timeout should fire")
    .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Timeout);
    assert!(err.to_string().contains("admin database"));

    server.abort();
}

#[tokio::test]
async fn test_empty_name_is_rejected() {
    let databases = PgTenantDatabases::new(configured());
    let err = databases.create_database_if_not_exists("").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);
}

#[tokio::test]
async fn test_unsafe_name_never_reaches_the_server() {
    let databases = PgTenantDatabases::new(configured());
    let err = databases
        .create_database_if_not_exists("x\"; DROP DATABASE postgres; --")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidRequest);
}

#[tokio::test]
async fn test_unsafe_owner_is_rejected() {
    let databases = PgTenantDatabases::new(TenantDbConfig {
        owner: Some("owner\" SUPERUSER".to_string()),
        ..configured()
    });
    let err = databases
        .create_database_if_not_exists("smood_abc123")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);
}

#[tokio::test]
async fn test_create_is_idempotent() {
    skip_if_no_db!();

    let env = |name: &str, default: &str| std::env::var(name).unwrap_or_else(|_| default.to_string());
    let databases = PgTenantDatabases::new(TenantDbConfig {
        host: Some(env("TEST_SMOOD_PG_ADMIN_HOST", "localhost")),
        port: env("TEST_SMOOD_PG_ADMIN_PORT", "5432").parse().unwrap(),
        admin_user: Some(env("TEST_SMOOD_PG_ADMIN_USER", "postgres")),
        admin_password: std::env::var("TEST_SMOOD_PG_ADMIN_PASSWORD").ok(),
        owner: None,
        connect_timeout: Duration::from_secs(10),
    });

    let name = generate_db_name();
    assert!(databases.create_database_if_not_exists(&name).await.unwrap());
    assert!(!databases.create_database_if_not_exists(&name).await.unwrap());
}
