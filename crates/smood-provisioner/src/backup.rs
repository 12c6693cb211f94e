// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Tenant database backup and restore.
//!
//! Dumps use the PostgreSQL custom format (`pg_dump -Fc`) and live under
//! `<root>/<installationId>/`. The local client tools are used when present;
//! otherwise (or when `FORCE_PG_CLIENT=docker`) the same tool runs inside a
//! throwaway client container with the backup directory bind-mounted.
//!
//! The admin password always travels as `PGPASSWORD` in the child process
//! environment. File names coming from callers must be bare names; anything
//! that could leave the installation's directory is rejected before any file
//! system access.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::model::Installation;
use crate::runner::{CommandRunner, CommandSpec};

/// Error text when an installation has no tenant database recorded.
pub const MISSING_DB_NAME: &str = "Installation does not have dbName in notes";
/// Error text when no database credentials are configured.
pub const MISSING_CREDENTIALS: &str =
    "PG admin credential is not configured (set TENANT_DB_* or PG_ADMIN_* env)";

/// Backup settings.
#[derive(Debug, Clone)]
pub struct BackupConfig {
    /// Root of the backup tree.
    pub root_dir: PathBuf,
    /// Database host as configured.
    pub db_host: String,
    /// Database port.
    pub db_port: u16,
    /// Admin role.
    pub db_user: Option<String>,
    /// Admin password.
    pub db_password: Option<String>,
    /// Always use the client container.
    pub force_docker: bool,
    /// Client container image.
    pub client_image: String,
    /// Docker network for the client container.
    pub network: Option<String>,
    /// Timeout for `pg_dump` / `pg_restore`.
    pub command_timeout: Duration,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            root_dir: PathBuf::from("uploads/backups"),
            db_host: "localhost".to_string(),
            db_port: 5432,
            db_user: None,
            db_password: None,
            force_docker: false,
            client_image: "postgres:14".to_string(),
            network: None,
            command_timeout: Duration::from_secs(1800),
        }
    }
}

/// A freshly written dump.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupFile {
    /// File name inside the installation's directory.
    pub file_name: String,
    /// Full path.
    pub path: PathBuf,
    /// Size in bytes.
    pub size: u64,
}

/// A dump found on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupEntry {
    /// File name.
    pub file_name: String,
    /// Size in bytes.
    pub size: u64,
    /// Modification time.
    pub modified_at: DateTime<Utc>,
}

/// Result of a restore.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreOutcome {
    /// Always `true` on success.
    pub restored: bool,
    /// Restored file.
    pub file_name: String,
}

/// Admin connection details without secrets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DbPrereq {
    /// Host.
    pub host: String,
    /// Port.
    pub port: u16,
    /// Admin role configured.
    pub user_set: bool,
    /// Admin password configured.
    pub password_set: bool,
}

/// Which client tools are installed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolAvailability {
    /// `pg_dump` on PATH.
    pub has_pg_dump: bool,
    /// `pg_restore` on PATH.
    pub has_pg_restore: bool,
    /// `docker` on PATH.
    pub has_docker: bool,
}

/// Read-only readiness report for backups.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupPrereq {
    /// Installation metadata names its database.
    pub db_name_present: bool,
    /// Why admin credentials are unusable, if they are.
    pub db_error: Option<String>,
    /// Admin connection details, when credentials are configured.
    pub db: Option<DbPrereq>,
    /// Installed tools.
    pub tools: ToolAvailability,
}

/// An uploaded dump.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportedBackup {
    /// Stored file name.
    pub file_name: String,
    /// Size in bytes.
    pub size: u64,
}

#[derive(Debug, Clone)]
struct Credentials {
    user: String,
    password: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ClientMode {
    Local,
    Container,
}

/// Reject anything but a bare file name.
pub fn validate_file_name(name: &str) -> Result<()> {
    let bad = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains(['/', '\\', '\0']);
    if bad {
        return Err(Error::PathTraversal(name.to_string()));
    }
    Ok(())
}

/// `<installationId>-<dbName>-<timestamp>.dump`, with `:` and `.` in the
/// timestamp replaced by `-`.
pub fn backup_file_name(installation_id: Uuid, db_name: &str, at: DateTime<Utc>) -> String {
    let ts = at
        .to_rfc3339_opts(SecondsFormat::Millis, true)
        .replace([':', '.'], "-");
    format!("{}-{}-{}.dump", installation_id, db_name, ts)
}

/// Replace everything outside `[a-zA-Z0-9_.-]` with `_`; the name must end in `.dump`.
pub fn sanitize_upload_name(name: &str) -> Result<String> {
    let safe: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if !is_dump_name(&safe) {
        return Err(Error::InvalidRequest(
            "Only .dump files are supported".to_string(),
        ));
    }
    Ok(safe)
}

/// Whether `name` has a `.dump` suffix, in any case.
pub fn is_dump_name(name: &str) -> bool {
    name.to_ascii_lowercase().ends_with(".dump")
}

/// Host for locally installed client tools.
pub fn host_for_local_tools(host: &str) -> String {
    match host.to_ascii_lowercase().as_str() {
        "host.docker.internal" | "docker.for.mac.localhost" | "docker.for.win.localhost" => {
            "127.0.0.1".to_string()
        }
        _ => host.to_string(),
    }
}

/// Host as seen from inside the client container.
pub fn host_for_client_container(host: &str) -> String {
    match host {
        "localhost" | "127.0.0.1" => "host.docker.internal".to_string(),
        _ => host.to_string(),
    }
}

fn require_db_name(inst: &Installation) -> Result<&str> {
    inst.db_name()
        .ok_or_else(|| Error::Configuration(MISSING_DB_NAME.to_string()))
}

/// Creates, lists and restores tenant database dumps.
pub struct BackupService {
    runner: Arc<dyn CommandRunner>,
    config: BackupConfig,
}

impl BackupService {
    /// Create a service.
    pub fn new(runner: Arc<dyn CommandRunner>, config: BackupConfig) -> Self {
        Self { runner, config }
    }

    /// The configuration in use.
    pub fn config(&self) -> &BackupConfig {
        &self.config
    }

    /// Directory holding an installation's dumps.
    pub fn installation_dir(&self, installation_id: Uuid) -> PathBuf {
        self.config.root_dir.join(installation_id.to_string())
    }

    fn credentials(&self) -> Result<Credentials> {
        let user = self.config.db_user.as_deref().filter(|v| !v.is_empty());
        let password = self.config.db_password.as_deref().filter(|v| !v.is_empty());
        match (user, password) {
            (Some(user), Some(password)) => Ok(Credentials {
                user: user.to_string(),
                password: password.to_string(),
            }),
            _ => Err(Error::Configuration(MISSING_CREDENTIALS.to_string())),
        }
    }

    async fn ensure_dir(&self, installation_id: Uuid) -> Result<PathBuf> {
        let dir = self.installation_dir(installation_id);
        tokio::fs::create_dir_all(&dir).await?;
        // Bind mounts need an absolute path.
        Ok(tokio::fs::canonicalize(&dir).await?)
    }

    async fn client_mode(&self, tool: &str) -> Result<ClientMode> {
        if !self.config.force_docker && self.runner.is_available(tool).await {
            return Ok(ClientMode::Local);
        }
        if self.runner.is_available("docker").await {
            return Ok(ClientMode::Container);
        }
        Err(Error::ToolNotFound(format!(
            "{} not found and Docker not available. Install PostgreSQL client or Docker.",
            tool
        )))
    }

    /// Build the client invocation. `target` is the local path for local
    /// tools; inside the container the directory is mounted at `mount`.
    fn client_command(
        &self,
        mode: ClientMode,
        tool: &str,
        creds: &Credentials,
        dir: &Path,
        mount: &str,
    ) -> (CommandSpec, String) {
        let port = self.config.db_port.to_string();
        match mode {
            ClientMode::Local => {
                let host = host_for_local_tools(&self.config.db_host);
                let spec = CommandSpec::new(tool)
                    .args(["-h", host.as_str(), "-p", port.as_str()])
                    .args(["-U", creds.user.as_str()])
                    .env("PGPASSWORD", creds.password.as_str())
                    .timeout(self.config.command_timeout);
                (spec, dir.display().to_string())
            }
            ClientMode::Container => {
                let host = host_for_client_container(&self.config.db_host);
                let mut spec = CommandSpec::new("docker").args(["run", "--rm"]);
                if let Some(network) = self.config.network.as_deref().filter(|n| !n.is_empty()) {
                    spec = spec.args(["--network", network]);
                }
                let spec = spec
                    .args(["-e", "PGPASSWORD"])
                    .env("PGPASSWORD", creds.password.as_str())
                    .arg("-v")
                    .arg(format!("{}:{}", dir.display(), mount))
                    .arg(self.config.client_image.as_str())
                    .arg(tool)
                    .args(["-h", host.as_str(), "-p", port.as_str()])
                    .args(["-U", creds.user.as_str()])
                    .timeout(self.config.command_timeout);
                (spec, mount.to_string())
            }
        }
    }

    /// Dump the installation's database into a new file.
    pub async fn create_backup(&self, inst: &Installation) -> Result<BackupFile> {
        let db_name = require_db_name(inst)?;
        let creds = self.credentials()?;

        let dir = self.ensure_dir(inst.id).await?;
        let file_name = backup_file_name(inst.id, db_name, Utc::now());
        let path = dir.join(&file_name);

        let mode = self.client_mode("pg_dump").await?;
        let (spec, base) = self.client_command(mode, "pg_dump", &creds, &dir, "/out");
        let spec = spec
            .args(["-d", db_name, "-Fc", "-f"])
            .arg(format!("{}/{}", base, file_name));

        debug!(installation_id = %inst.id, mode = ?mode, "Running pg_dump");
        self.runner.run(&spec).await?;

        let size = tokio::fs::metadata(&path).await?.len();
        info!(
            installation_id = %inst.id,
            db_name,
            file_name = %file_name,
            size,
            "Backup created"
        );

        Ok(BackupFile {
            file_name,
            path,
            size,
        })
    }

    /// Dumps for an installation, newest first.
    pub async fn list_backups(&self, installation_id: Uuid) -> Result<Vec<BackupEntry>> {
        let dir = self.installation_dir(installation_id);
        tokio::fs::create_dir_all(&dir).await?;
        list_dumps(&dir).await
    }

    /// Restore `file_name` into the installation's database.
    pub async fn restore_backup(&self, inst: &Installation, file_name: &str) -> Result<RestoreOutcome> {
        let db_name = require_db_name(inst)?;
        validate_file_name(file_name)?;
        let creds = self.credentials()?;

        let dir = self.ensure_dir(inst.id).await?;
        let path = dir.join(file_name);
        if !tokio::fs::try_exists(&path).await? {
            return Err(Error::NotFound(format!("Backup file not found: {}", file_name)));
        }

        let mode = self.client_mode("pg_restore").await?;
        let (spec, base) = self.client_command(mode, "pg_restore", &creds, &dir, "/in");
        let spec = spec
            .args(["-d", db_name, "--clean", "--if-exists"])
            .arg(format!("{}/{}", base, file_name));

        debug!(installation_id = %inst.id, mode = ?mode, "Running pg_restore");
        self.runner.run(&spec).await?;

        info!(installation_id = %inst.id, db_name, file_name, "Backup restored");
        Ok(RestoreOutcome {
            restored: true,
            file_name: file_name.to_string(),
        })
    }

    /// What is in place for backups. Never fails.
    pub async fn check_prereq(&self, inst: &Installation) -> BackupPrereq {
        let (db, db_error) = match self.credentials() {
            Ok(creds) => (
                Some(DbPrereq {
                    host: self.config.db_host.clone(),
                    port: self.config.db_port,
                    user_set: !creds.user.is_empty(),
                    password_set: !creds.password.is_empty(),
                }),
                None,
            ),
            Err(_) => (None, Some(MISSING_CREDENTIALS.to_string())),
        };

        let tools = ToolAvailability {
            has_pg_dump: self.runner.is_available("pg_dump").await,
            has_pg_restore: self.runner.is_available("pg_restore").await,
            has_docker: self.runner.is_available("docker").await,
        };

        BackupPrereq {
            db_name_present: inst.db_name().is_some(),
            db_error,
            db,
            tools,
        }
    }

    /// Store an uploaded dump as `<epochMillis>-<sanitizedName>`.
    pub async fn import_backup(
        &self,
        installation_id: Uuid,
        file_name: &str,
        data: &[u8],
    ) -> Result<ImportedBackup> {
        let safe = sanitize_upload_name(file_name)?;
        let stored = format!("{}-{}", Utc::now().timestamp_millis(), safe);
        let dir = self.ensure_dir(installation_id).await?;
        tokio::fs::write(dir.join(&stored), data).await?;

        info!(installation_id = %installation_id, file_name = %stored, size = data.len(), "Backup uploaded");
        Ok(ImportedBackup {
            file_name: stored,
            size: data.len() as u64,
        })
    }

    /// Path of an existing dump, for downloads.
    pub async fn resolve_backup(&self, installation_id: Uuid, file_name: &str) -> Result<PathBuf> {
        validate_file_name(file_name)?;
        let path = self.installation_dir(installation_id).join(file_name);
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => Ok(path),
            _ => Err(Error::NotFound(format!("Backup file not found: {}", file_name))),
        }
    }

    /// Copy a dump from `source` into `target`'s directory.
    ///
    /// Without a file name the newest dump of `source` is used. Returns the
    /// copied file name; restoring it is up to the caller.
    pub async fn copy_from(
        &self,
        source: Uuid,
        target: Uuid,
        file_name: Option<&str>,
    ) -> Result<String> {
        let source_dir = self.installation_dir(source);
        if !tokio::fs::try_exists(&source_dir).await? {
            return Err(Error::NotFound(format!(
                "No backups found for installation {}",
                source
            )));
        }

        let file_name = match file_name.filter(|f| !f.is_empty()) {
            Some(name) => {
                validate_file_name(name)?;
                name.to_string()
            }
            None => list_dumps(&source_dir)
                .await?
                .into_iter()
                .next()
                .map(|entry| entry.file_name)
                .ok_or_else(|| {
                    Error::NotFound(format!("No backups found for installation {}", source))
                })?,
        };

        let from = source_dir.join(&file_name);
        if !tokio::fs::try_exists(&from).await? {
            return Err(Error::NotFound(format!("Backup file not found: {}", file_name)));
        }

        let target_dir = self.ensure_dir(target).await?;
        let to = target_dir.join(&file_name);
        // Copying a file onto itself truncates it.
        if source == target || to == from {
            debug!(installation_id = %target, file_name = %file_name, "Backup already in place");
            return Ok(file_name);
        }
        tokio::fs::copy(&from, &to).await?;

        info!(source = %source, target = %target, file_name = %file_name, "Backup copied");
        Ok(file_name)
    }
}

async fn list_dumps(dir: &Path) -> Result<Vec<BackupEntry>> {
    let mut entries = Vec::new();
    let mut read_dir = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = read_dir.next_entry().await? {
        let meta = entry.metadata().await?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if !meta.is_file() || !is_dump_name(&name) {
            continue;
        }
        entries.push(BackupEntry {
            file_name: name,
            size: meta.len(),
            modified_at: meta.modified().map(DateTime::<Utc>::from)?,
        });
    }
    entries.sort_by(|a, b| b.modified_at.cmp(&a.modified_at));
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_backup_file_name() {
        let id = Uuid::nil();
        let at = Utc.with_ymd_and_hms(2025, 10, 20, 12, 30, 5).unwrap();
        assert_eq!(
            backup_file_name(id, "smood_abc123", at),
            "00000000-0000-0000-0000-000000000000-smood_abc123-2025-10-20T12-30-05-000Z.dump"
        );
    }

    #[test]
    fn test_validate_file_name() {
        assert!(validate_file_name("a.dump").is_ok());
        for bad in ["", ".", "..", "../x.dump", "a/b.dump", "a\\b.dump", "/etc/passwd"] {
            assert!(matches!(
                validate_file_name(bad),
                Err(Error::PathTraversal(_))
            ));
        }
    }

    #[test]
    fn test_sanitize_upload_name() {
        assert_eq!(
            sanitize_upload_name("my backup (1).DUMP").unwrap(),
            "my_backup__1_.DUMP"
        );
        assert_eq!(sanitize_upload_name("../../x.dump").unwrap(), ".._.._x.dump");
        assert!(sanitize_upload_name("notes.txt").is_err());
    }

    #[test]
    fn test_host_normalization() {
        assert_eq!(host_for_local_tools("host.docker.internal"), "127.0.0.1");
        assert_eq!(host_for_local_tools("Docker.For.Mac.Localhost"), "127.0.0.1");
        assert_eq!(host_for_local_tools("db.internal"), "db.internal");
        assert_eq!(host_for_client_container("localhost"), "host.docker.internal");
        assert_eq!(host_for_client_container("127.0.0.1"), "host.docker.internal");
        assert_eq!(host_for_client_container("db.internal"), "db.internal");
    }
}
