// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common test infrastructure for smood-provisioner integration tests.
//!
//! Provides a [`TestHarness`] wiring handler state to an in-memory store, a
//! scripted command runner and a fake tenant database provisioner.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use uuid::Uuid;

use smood_provisioner::config::Config;
use smood_provisioner::handlers::ProvisionerState;
use smood_provisioner::model::{AppStatus, Installation};
use smood_provisioner::runner::{CommandSpec, MockResponse, MockRunner};
use smood_provisioner::store::{InstallationStore, MemoryStore};
use smood_provisioner::tenant_db::TenantDatabases;

/// Records database names instead of connecting to PostgreSQL.
#[derive(Default)]
pub struct FakeDatabases {
    created: Mutex<Vec<String>>,
}

impl FakeDatabases {
    pub fn created(&self) -> Vec<String> {
        self.created.lock().unwrap().clone()
    }
}

#[async_trait]
impl TenantDatabases for FakeDatabases {
    async fn create_database_if_not_exists(
        &self,
        db_name: &str,
    ) -> smood_provisioner::Result<bool> {
        smood_provisioner::tenant_db::validate_db_name(db_name)?;
        let mut created = self.created.lock().unwrap();
        if created.iter().any(|d| d == db_name) {
            return Ok(false);
        }
        created.push(db_name.to_string());
        Ok(true)
    }
}

/// Build a config from `vars` on top of test defaults.
pub fn test_config(backup_dir: &Path, vars: &[(&str, &str)]) -> Config {
    let mut map: HashMap<String, String> = [
        ("DATABASE_URL", "postgres://localhost/smood_test"),
        ("APPS_IMAGE", "app:latest"),
        ("APPS_BASE_HOST", "apps.test"),
        ("BASE_DOMAIN", "smood.test"),
        ("APPS_PORT_RANGE_START", "41000"),
        ("APPS_PORT_RANGE_END", "41999"),
        ("PG_ADMIN_USER", "postgres"),
        ("PG_ADMIN_PASSWORD", "secret"),
        ("NGINX_CONF_DIR", "/tmp/nginx-test"),
    ]
    .iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect();
    map.insert(
        "BACKUP_DIR".to_string(),
        backup_dir.display().to_string(),
    );
    for (k, v) in vars {
        map.insert(k.to_string(), v.to_string());
    }
    Config::from_lookup(|name| map.get(name).cloned()).expect("test config")
}

/// Handler state over in-memory collaborators.
pub struct TestHarness {
    pub state: Arc<ProvisionerState>,
    pub store: MemoryStore,
    pub runner: MockRunner,
    pub databases: Arc<FakeDatabases>,
    pub backup_dir: PathBuf,
    _temp_dir: tempfile::TempDir,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_vars(&[])
    }

    pub fn with_vars(vars: &[(&str, &str)]) -> Self {
        let temp_dir = tempfile::TempDir::new().expect("temp dir");
        let backup_dir = temp_dir.path().join("backups");
        let config = test_config(&backup_dir, vars);

        let store = MemoryStore::new();
        let runner = MockRunner::new().with_hook(write_dump_files);
        let databases = Arc::new(FakeDatabases::default());

        let state = ProvisionerState::new(
            Arc::new(store.clone()),
            Arc::new(runner.clone()),
            databases.clone(),
            &config,
        )
        .expect("handler state");

        Self {
            state: Arc::new(state),
            store,
            runner,
            databases,
            backup_dir,
            _temp_dir: temp_dir,
        }
    }

    /// Store an installation that already went through provisioning.
    pub async fn provisioned_installation(&self, status: AppStatus) -> Installation {
        let mut inst = Installation::new(Uuid::new_v4());
        inst.studio_name = Some("Moon Studio".to_string());
        inst.contact_email = Some("ops@moon.test".to_string());
        inst.app_status = status;
        inst.metadata.db_name = Some("smood_abc123".to_string());
        inst.metadata.container_name = Some(format!("smood-app-{}", inst.id));
        inst.metadata.endpoint_url = Some("http://apps.test:41000".to_string());
        self.store.insert(&inst).await.expect("insert");
        inst
    }

    /// Make `docker ps` report the installation's container as `state`.
    pub async fn container_state(&self, installation_id: Uuid, state: &str) {
        let line = format!("smood-app-{}\t{}\n", installation_id, state);
        self.runner
            .respond(&["docker", "ps"], MockResponse::stdout(line))
            .await;
    }
}

/// Write a small file wherever a mocked `pg_dump` was asked to write.
///
/// Handles both local invocations (`-f <path>`) and the client container
/// (`-v <dir>:/out ... -f /out/<file>`).
pub fn write_dump_files(spec: &CommandSpec) {
    let is_dump = spec.program == "pg_dump"
        || (spec.program == "docker" && spec.args.iter().any(|a| a == "pg_dump"));
    if !is_dump {
        return;
    }
    let Some(target) = spec
        .args
        .iter()
        .position(|a| a == "-f")
        .and_then(|i| spec.args.get(i + 1))
    else {
        return;
    };

    let mut path = PathBuf::from(target);
    if let Some(mount) = spec
        .args
        .iter()
        .position(|a| a == "-v")
        .and_then(|i| spec.args.get(i + 1))
        && let Some((host_dir, container_dir)) = mount.rsplit_once(':')
        && let Ok(rest) = path.strip_prefix(container_dir)
    {
        path = Path::new(host_dir).join(rest);
    }
    std::fs::write(&path, b"PGDMP-test").expect("write dump");
}
