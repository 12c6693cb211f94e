// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Tests for the backup/restore service.

mod common;

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use smood_provisioner::backup::{BackupConfig, BackupService, MISSING_CREDENTIALS, MISSING_DB_NAME};
use smood_provisioner::error::{Error, ErrorKind};
use smood_provisioner::model::Installation;
use smood_provisioner::runner::MockRunner;
use uuid::Uuid;

fn config(root: &Path) -> BackupConfig {
    BackupConfig {
        root_dir: root.to_path_buf(),
        db_host: "localhost".to_string(),
        db_user: Some("postgres".to_string()),
        db_password: Some("pw".to_string()),
        ..BackupConfig::default()
    }
}

fn service(runner: &MockRunner, config: BackupConfig) -> BackupService {
    BackupService::new(Arc::new(runner.clone()), config)
}

fn installation(db_name: Option<&str>) -> Installation {
    let mut inst = Installation::new(Uuid::new_v4());
    inst.metadata.db_name = db_name.map(str::to_string);
    inst
}

fn write_dump(dir: &Path, name: &str, age: Duration) {
    std::fs::create_dir_all(dir).unwrap();
    let path = dir.join(name);
    std::fs::write(&path, b"PGDMP").unwrap();
    let file = std::fs::File::options().write(true).open(&path).unwrap();
    file.set_modified(SystemTime::now() - age).unwrap();
}

#[tokio::test]
async fn test_create_backup_with_local_tools() {
    let dir = tempfile::tempdir().unwrap();
    let runner = MockRunner::new().with_hook(common::write_dump_files);
    let backups = service(&runner, config(dir.path()));
    let inst = installation(Some("smood_abc123"));

    let file = backups.create_backup(&inst).await.unwrap();

    assert!(file.file_name.starts_with(&format!("{}-smood_abc123-", inst.id)));
    assert!(file.file_name.ends_with(".dump"));
    assert!(file.size > 0);
    assert!(file.path.exists());

    let dumps = runner.calls_matching(&["pg_dump"]).await;
    let dump = dumps.iter().find(|c| c.args.contains(&"-Fc".to_string())).unwrap();
    assert_eq!(dump.env_value("PGPASSWORD"), Some("pw"));
    assert!(dump.args.iter().all(|a| a != "pw"));
    assert!(dump.args.windows(2).any(|w| w[0] == "-d" && w[1] == "smood_abc123"));
    assert!(runner.calls_matching(&["docker"]).await.is_empty());
}

#[tokio::test]
async fn test_create_backup_falls_back_to_docker() {
    let dir = tempfile::tempdir().unwrap();
    let runner = MockRunner::new().with_hook(common::write_dump_files);
    runner.set_missing("pg_dump").await;
    let backups = service(
        &runner,
        BackupConfig {
            network: Some("smood-net".to_string()),
            ..config(dir.path())
        },
    );
    let inst = installation(Some("smood_abc123"));

    let file = backups.create_backup(&inst).await.unwrap();
    assert!(file.path.exists());

    let runs = runner.calls_matching(&["docker", "run", "--rm"]).await;
    assert_eq!(runs.len(), 1);
    let run = &runs[0];
    assert!(run.args.windows(2).any(|w| w[0] == "--network" && w[1] == "smood-net"));
    assert!(run.args.contains(&"postgres:14".to_string()));
    // Loopback hosts are rewritten for the client container.
    assert!(run.args.windows(2).any(|w| w[0] == "-h" && w[1] == "host.docker.internal"));
    assert!(run.args.contains(&format!("/out/{}", file.file_name)));
    assert_eq!(run.env_value("PGPASSWORD"), Some("pw"));
}

#[tokio::test]
async fn test_forced_docker_client() {
    let dir = tempfile::tempdir().unwrap();
    let runner = MockRunner::new().with_hook(common::write_dump_files);
    let backups = service(
        &runner,
        BackupConfig {
            force_docker: true,
            ..config(dir.path())
        },
    );

    backups
        .create_backup(&installation(Some("smood_abc123")))
        .await
        .unwrap();
    assert_eq!(runner.calls_matching(&["docker", "run"]).await.len(), 1);
    assert!(
        runner
            .calls_matching(&["pg_dump"])
            .await
            .iter()
            .all(|c| c.args == ["--version"])
    );
}

#[tokio::test]
async fn test_no_tools_is_tool_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let runner = MockRunner::new();
    runner.set_missing("pg_dump").await;
    runner.set_missing("docker").await;
    let backups = service(&runner, config(dir.path()));

    let err = backups
        .create_backup(&installation(Some("smood_abc123")))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ToolNotFound);
    assert!(err.to_string().contains("pg_dump"));
    assert!(err.to_string().contains("Docker"));
}

#[tokio::test]
async fn test_missing_db_name_runs_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let runner = MockRunner::new();
    let backups = service(&runner, config(dir.path()));

    let err = backups.create_backup(&installation(None)).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);
    assert!(err.to_string().contains(MISSING_DB_NAME));

    let err = backups
        .restore_backup(&installation(None), "x.dump")
        .await
        .unwrap_err();
    assert!(err.to_string().contains(MISSING_DB_NAME));
    assert!(runner.calls().await.is_empty());
}

#[tokio::test]
async fn test_missing_credentials() {
    let dir = tempfile::tempdir().unwrap();
    let runner = MockRunner::new();
    let backups = service(
        &runner,
        BackupConfig {
            db_password: None,
            ..config(dir.path())
        },
    );

    let err = backups
        .create_backup(&installation(Some("smood_abc123")))
        .await
        .unwrap_err();
    assert!(err.to_string().contains(MISSING_CREDENTIALS));
    assert!(runner.calls().await.is_empty());
}

#[tokio::test]
async fn test_restore_rejects_path_traversal() {
    let dir = tempfile::tempdir().unwrap();
    let runner = MockRunner::new();
    let backups = service(&runner, config(dir.path()));
    let inst = installation(Some("smood_abc123"));

    for bad in ["../other/x.dump", "/etc/passwd", "..", "a\\b.dump"] {
        let err = backups.restore_backup(&inst, bad).await.unwrap_err();
        assert!(matches!(err, Error::PathTraversal(_)), "{bad}");
    }
    assert!(runner.calls().await.is_empty());
}

#[tokio::test]
async fn test_restore_missing_file_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let runner = MockRunner::new();
    let backups = service(&runner, config(dir.path()));

    let err = backups
        .restore_backup(&installation(Some("smood_abc123")), "nope.dump")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert_eq!(err.to_string(), "Not found: Backup file not found: nope.dump");
}

#[tokio::test]
async fn test_restore_existing_file() {
    let dir = tempfile::tempdir().unwrap();
    let runner = MockRunner::new();
    let backups = service(&runner, config(dir.path()));
    let inst = installation(Some("smood_abc123"));
    write_dump(&backups.installation_dir(inst.id), "a.dump", Duration::ZERO);

    let out = backups.restore_backup(&inst, "a.dump").await.unwrap();
    assert!(out.restored);
    assert_eq!(out.file_name, "a.dump");

    let restores = runner.calls_matching(&["pg_restore", "-h"]).await;
    assert_eq!(restores.len(), 1);
    let args = &restores[0].args;
    assert!(args.contains(&"--clean".to_string()));
    assert!(args.contains(&"--if-exists".to_string()));
    assert!(args.last().unwrap().ends_with("/a.dump"));
}

#[tokio::test]
async fn test_list_backups_newest_first() {
    let dir = tempfile::tempdir().unwrap();
    let runner = MockRunner::new();
    let backups = service(&runner, config(dir.path()));
    let id = Uuid::new_v4();
    let inst_dir = backups.installation_dir(id);

    write_dump(&inst_dir, "old.dump", Duration::from_secs(3600));
    write_dump(&inst_dir, "new.dump", Duration::from_secs(10));
    write_dump(&inst_dir, "mid.dump", Duration::from_secs(600));
    std::fs::write(inst_dir.join("notes.txt"), b"ignored").unwrap();

    let names: Vec<String> = backups
        .list_backups(id)
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.file_name)
        .collect();
    assert_eq!(names, ["new.dump", "mid.dump", "old.dump"]);
}

#[tokio::test]
async fn test_list_backups_creates_empty_dir() {
    let dir = tempfile::tempdir().unwrap();
    let backups = service(&MockRunner::new(), config(dir.path()));
    let id = Uuid::new_v4();

    assert!(backups.list_backups(id).await.unwrap().is_empty());
    assert!(backups.installation_dir(id).is_dir());
}

#[tokio::test]
async fn test_check_prereq_never_fails() {
    let dir = tempfile::tempdir().unwrap();
    let runner = MockRunner::new();
    runner.set_missing("pg_restore").await;
    let backups = service(
        &runner,
        BackupConfig {
            db_user: None,
            ..config(dir.path())
        },
    );

    let prereq = backups.check_prereq(&installation(None)).await;
    assert!(!prereq.db_name_present);
    assert!(prereq.db.is_none());
    assert_eq!(prereq.db_error.as_deref(), Some(MISSING_CREDENTIALS));
    assert!(prereq.tools.has_pg_dump);
    assert!(!prereq.tools.has_pg_restore);
    assert!(prereq.tools.has_docker);
}

#[tokio::test]
async fn test_import_and_resolve() {
    let dir = tempfile::tempdir().unwrap();
    let backups = service(&MockRunner::new(), config(dir.path()));
    let id = Uuid::new_v4();

    let stored = backups
        .import_backup(id, "studio backup.dump", b"PGDMP-upload")
        .await
        .unwrap();
    assert!(stored.file_name.ends_with("-studio_backup.dump"));
    assert_eq!(stored.size, 12);

    let path = backups.resolve_backup(id, &stored.file_name).await.unwrap();
    assert_eq!(std::fs::read(path).unwrap(), b"PGDMP-upload");

    let err = backups.import_backup(id, "dump.sql", b"x").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidRequest);

    let err = backups.resolve_backup(id, "../secret.dump").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PathTraversal);
}

#[tokio::test]
async fn test_copy_from_picks_newest() {
    let dir = tempfile::tempdir().unwrap();
    let backups = service(&MockRunner::new(), config(dir.path()));
    let source = Uuid::new_v4();
    let target = Uuid::new_v4();

    let err = backups.copy_from(source, target, None).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    write_dump(&backups.installation_dir(source), "old.dump", Duration::from_secs(900));
    write_dump(&backups.installation_dir(source), "new.dump", Duration::from_secs(5));

    let copied = backups.copy_from(source, target, None).await.unwrap();
    assert_eq!(copied, "new.dump");
    assert!(backups.installation_dir(target).join("new.dump").exists());

    let copied = backups
        .copy_from(source, target, Some("old.dump"))
        .await
        .unwrap();
    assert_eq!(copied, "old.dump");
}

#[tokio::test]
async fn test_copy_from_same_installation_keeps_file() {
    let dir = tempfile::tempdir().unwrap();
    let backups = service(&MockRunner::new(), config(dir.path()));
    let id = Uuid::new_v4();
    let path = backups.installation_dir(id).join("a.dump");
    std::fs::create_dir_all(backups.installation_dir(id)).unwrap();
    std::fs::write(&path, b"PGDMP-twenty-three-byte").unwrap();

    let copied = backups.copy_from(id, id, Some("a.dump")).await.unwrap();
    assert_eq!(copied, "a.dump");
    assert_eq!(std::fs::read(&path).unwrap(), b"PGDMP-twenty-three-byte");

    let copied = backups.copy_from(id, id, None).await.unwrap();
    assert_eq!(copied, "a.dump");
    assert_eq!(std::fs::metadata(&path).unwrap().len(), 23);
}

#[tokio::test]
async fn test_uploaded_uppercase_suffix_is_listed() {
    let dir = tempfile::tempdir().unwrap();
    let backups = service(&MockRunner::new(), config(dir.path()));
    let id = Uuid::new_v4();

    let stored = backups.import_backup(id, "NIGHTLY.DUMP", b"PGDMP").await.unwrap();

    let listed = backups.list_backups(id).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].file_name, stored.file_name);

    let target = Uuid::new_v4();
    let copied = backups.copy_from(id, target, None).await.unwrap();
    assert_eq!(copied, stored.file_name);
}
