// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Docker container lifecycle for tenant applications.
//!
//! Every installation owns at most one container, addressed by the
//! deterministic name `<prefix>-<installationId>`. Provisioning allocates a
//! host port, assembles the tenant environment and runs the image detached
//! with `--restart unless-stopped`.
//!
//! Environment values are handed to `docker run` through the child process
//! environment (`-e KEY` without a value), so secrets such as the database
//! password and JWT secret never appear on a command line.
//!
//! `stop` and `remove` look at the container first (`docker ps -a`) and are
//! no-ops when there is nothing to do. Failures of the actual `docker stop` or
//! `docker rm` are always reported.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::model::Installation;
use crate::ports::PortAllocator;
use crate::runner::{CommandRunner, CommandSpec};

/// Port the tenant application listens on inside the container.
pub const CONTAINER_PORT: u16 = 8000;

/// Database coordinates handed to tenant containers.
#[derive(Debug, Clone)]
pub struct TenantDbCoordinates {
    /// Host as seen from inside the container.
    pub host: String,
    /// Port.
    pub port: u16,
    /// Role the tenant application connects as.
    pub user: Option<String>,
    /// Password for `user`.
    pub password: Option<String>,
}

impl Default for TenantDbCoordinates {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            user: None,
            password: None,
        }
    }
}

/// Settings for tenant containers.
#[derive(Debug, Clone)]
pub struct ContainerConfig {
    /// Tenant application image (`APPS_IMAGE`).
    pub image: Option<String>,
    /// Host name tenants are reached on directly (`APPS_BASE_HOST`).
    pub base_host: String,
    /// Domain under which tenant subdomains live (`BASE_DOMAIN`).
    pub base_domain: Option<String>,
    /// Docker network to attach to.
    pub network: Option<String>,
    /// Back-office URL tenants report to.
    pub backend_url: String,
    /// JWT secret for the tenant application.
    pub jwt_secret: String,
    /// Whether the tenant seeds its database on first start.
    pub db_seed_on_start: String,
    /// Container name prefix.
    pub name_prefix: String,
    /// Tenant database coordinates.
    pub tenant_db: TenantDbCoordinates,
    /// Timeout for `docker run/start/stop/rm/ps`.
    pub command_timeout: Duration,
    /// Timeout for the best-effort removal before provisioning.
    pub pre_remove_timeout: Duration,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            image: None,
            base_host: "localhost".to_string(),
            base_domain: None,
            network: None,
            backend_url: "http://localhost:5055".to_string(),
            jwt_secret: "smood_secret".to_string(),
            db_seed_on_start: "true".to_string(),
            name_prefix: "smood-app".to_string(),
            tenant_db: TenantDbCoordinates::default(),
            command_timeout: Duration::from_secs(120),
            pre_remove_timeout: Duration::from_secs(5),
        }
    }
}

/// Result of provisioning a tenant container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvisionOutcome {
    /// `http://<baseHost>:<hostPort>`.
    pub endpoint_url: String,
    /// Host port mapped to the container.
    pub host_port: u16,
    /// Container name.
    pub container_name: String,
}

/// Result of start/stop/remove.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerRef {
    /// Container name.
    pub container_name: String,
}

/// Observed container state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerState {
    /// Running, restarting or paused.
    Running,
    /// Exists but not running.
    Stopped,
    /// No container with that name.
    Missing,
}

/// Container name for an installation.
pub fn container_name(prefix: &str, installation_id: Uuid) -> String {
    format!("{}-{}", prefix, installation_id)
}

/// Lowercase slug: runs of non-alphanumerics become `-`, edges trimmed, `app` if empty.
pub fn studio_slug(s: &str) -> String {
    let mut slug = String::with_capacity(s.len());
    let mut pending_dash = false;
    for c in s.trim().chars().flat_map(char::to_lowercase) {
        if c.is_ascii_lowercase() || c.is_ascii_digit() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(c);
        } else {
            pending_dash = true;
        }
    }
    if slug.is_empty() {
        "app".to_string()
    } else {
        slug
    }
}

/// Point loopback URLs at the Docker host so containers can reach them.
pub fn rewrite_loopback_for_container(url: &str) -> String {
    url.replacen("://localhost", "://host.docker.internal", 1)
        .replacen("://127.0.0.1", "://host.docker.internal", 1)
}

/// CORS allow-list for a tenant, deduplicated in order and comma-joined.
pub fn allowed_origins(base_host: &str, host_port: u16, subdomain: Option<&str>) -> String {
    let mut origins: Vec<String> = vec![
        format!("http://{}:{}", base_host, host_port),
        format!("http://{}:3000", base_host),
        "http://localhost:3000".to_string(),
    ];
    if let Some(sub) = subdomain {
        origins.push(format!("https://{}", sub));
        origins.push(format!("http://{}", sub));
    }

    let mut seen = std::collections::HashSet::new();
    origins.retain(|o| seen.insert(o.clone()));
    origins.join(",")
}

/// Drives `docker` for tenant containers.
pub struct ContainerManager {
    runner: Arc<dyn CommandRunner>,
    ports: PortAllocator,
    config: ContainerConfig,
}

impl ContainerManager {
    /// Create a manager.
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        ports: PortAllocator,
        config: ContainerConfig,
    ) -> Self {
        Self {
            runner,
            ports,
            config,
        }
    }

    /// The configuration in use.
    pub fn config(&self) -> &ContainerConfig {
        &self.config
    }

    /// Container name for `installation_id`.
    pub fn container_name(&self, installation_id: Uuid) -> String {
        container_name(&self.config.name_prefix, installation_id)
    }

    /// Subdomain host for an installation.
    ///
    /// The stored subdomain wins; otherwise it is derived from the studio or
    /// company name under `BASE_DOMAIN` (or the base host).
    pub fn subdomain_host(&self, inst: &Installation) -> String {
        if let Some(sub) = inst.subdomain.as_deref().filter(|s| !s.is_empty()) {
            return sub.to_string();
        }
        let source = inst
            .display_name()
            .map(str::to_string)
            .unwrap_or_else(|| inst.id.to_string());
        let domain = self
            .config
            .base_domain
            .as_deref()
            .filter(|d| !d.is_empty())
            .unwrap_or(&self.config.base_host);
        format!("{}.{}", studio_slug(&source), domain)
    }

    /// Environment for the tenant container, in a stable order.
    pub fn build_env(
        &self,
        inst: &Installation,
        db_name: &str,
        host_port: u16,
    ) -> Vec<(String, String)> {
        let cfg = &self.config;
        let subdomain = self.subdomain_host(inst);
        let db = &cfg.tenant_db;

        let entries: Vec<(&str, Option<String>)> = vec![
            ("PORT", Some(CONTAINER_PORT.to_string())),
            (
                "WEBSITE_BACKEND_URL",
                Some(rewrite_loopback_for_container(&cfg.backend_url)),
            ),
            ("INSTALLATION_REPORTING", Some("true".to_string())),
            ("JWT_SECRET", Some(cfg.jwt_secret.clone())),
            ("INSTALLATION_ID", Some(inst.id.to_string())),
            ("REACT_APP_HOST", Some(cfg.base_host.clone())),
            ("REACT_APP_CLIENT_PORT", Some("3000".to_string())),
            ("REACT_APP_PROTOCOL", Some("http".to_string())),
            (
                "ALLOWED_ORIGINS",
                Some(allowed_origins(&cfg.base_host, host_port, Some(&subdomain))),
            ),
            ("DB_HOST", Some(db.host.clone())),
            ("DB_PORT", Some(db.port.to_string())),
            ("DB_USER", db.user.clone()),
            ("DB_PASSWORD", db.password.clone()),
            ("DB_NAME", Some(db_name.to_string())),
            ("COMPANY_NAME", inst.company_name.clone()),
            ("STUDIO_NAME", inst.studio_name.clone()),
            ("CONTACT_NAME", inst.contact_name.clone()),
            ("CONTACT_EMAIL", inst.contact_email.clone()),
            ("APP_ENV", Some("production".to_string())),
            ("DB_SEED_ON_START", Some(cfg.db_seed_on_start.clone())),
        ];

        entries
            .into_iter()
            .filter_map(|(k, v)| v.filter(|v| !v.is_empty()).map(|v| (k.to_string(), v)))
            .collect()
    }

    /// Provision a container for `inst` against `db_name`.
    pub async fn provision(&self, inst: &Installation, db_name: &str) -> Result<ProvisionOutcome> {
        let image = self
            .config
            .image
            .as_deref()
            .filter(|i| !i.is_empty())
            .ok_or_else(|| Error::Configuration("APPS_IMAGE is not configured".to_string()))?;

        let name = self.container_name(inst.id);
        let host_port = self.ports.find_free_port().await?;
        let env = self.build_env(inst, db_name, host_port);

        // Clear out a leftover container with the same name.
        let cleanup = CommandSpec::new("docker")
            .args(["rm", "-f", name.as_str()])
            .timeout(self.config.pre_remove_timeout);
        if let Err(e) = self.runner.run(&cleanup).await {
            debug!(container = %name, error = %e, "Pre-provision removal failed");
        }

        let mut run = CommandSpec::new("docker")
            .args(["run", "-d", "--restart", "unless-stopped", "--name", name.as_str()])
            .args(["-p".to_string(), format!("{}:{}", host_port, CONTAINER_PORT)])
            .timeout(self.config.command_timeout);
        if let Some(network) = self.config.network.as_deref().filter(|n| !n.is_empty()) {
            run = run.args(["--network", network]);
        }
        for (key, value) in &env {
            run = run.args(["-e", key.as_str()]).env(key.as_str(), value.as_str());
        }
        run = run.arg(image);

        self.runner.run(&run).await?;

        let endpoint_url = format!("http://{}:{}", self.config.base_host, host_port);
        info!(
            installation_id = %inst.id,
            container = %name,
            host_port,
            endpoint = %endpoint_url,
            "Tenant container provisioned"
        );

        Ok(ProvisionOutcome {
            endpoint_url,
            host_port,
            container_name: name,
        })
    }

    /// Observe the container for `installation_id`.
    pub async fn inspect(&self, installation_id: Uuid) -> Result<ContainerState> {
        let name = self.container_name(installation_id);
        let ps = CommandSpec::new("docker")
            .args(["ps", "-a", "--filter"])
            .arg(format!("name=^{}$", name))
            .args(["--format", "{{.Names}}\t{{.State}}"])
            .timeout(self.config.command_timeout);
        let out = self.runner.run(&ps).await?;
        Ok(parse_ps_state(&out.stdout, &name))
    }

    /// `docker start`.
    pub async fn start(&self, installation_id: Uuid) -> Result<ContainerRef> {
        let name = self.container_name(installation_id);
        let start = CommandSpec::new("docker")
            .args(["start", name.as_str()])
            .timeout(self.config.command_timeout);
        self.runner.run(&start).await?;
        info!(installation_id = %installation_id, container = %name, "Tenant container started");
        Ok(ContainerRef {
            container_name: name,
        })
    }

    /// `docker stop`, skipped when the container is missing or not running.
    pub async fn stop(&self, installation_id: Uuid) -> Result<ContainerRef> {
        let name = self.container_name(installation_id);
        match self.inspect(installation_id).await? {
            ContainerState::Running => {
                let stop = CommandSpec::new("docker")
                    .args(["stop", name.as_str()])
                    .timeout(self.config.command_timeout);
                self.runner.run(&stop).await?;
                info!(installation_id = %installation_id, container = %name, "Tenant container stopped");
            }
            state => {
                debug!(container = %name, state = ?state, "Container not running, nothing to stop");
            }
        }
        Ok(ContainerRef {
            container_name: name,
        })
    }

    /// `docker rm -f`, skipped when the container is missing.
    pub async fn remove(&self, installation_id: Uuid) -> Result<ContainerRef> {
        let name = self.container_name(installation_id);
        if self.inspect(installation_id).await? == ContainerState::Missing {
            debug!(container = %name, "Container missing, nothing to remove");
        } else {
            let rm = CommandSpec::new("docker")
                .args(["rm", "-f", name.as_str()])
                .timeout(self.config.command_timeout);
            self.runner.run(&rm).await?;
            info!(installation_id = %installation_id, container = %name, "Tenant container removed");
        }
        Ok(ContainerRef {
            container_name: name,
        })
    }

    /// Best-effort removal used when deleting an installation.
    pub async fn remove_best_effort(&self, installation_id: Uuid) {
        if let Err(e) = self.remove(installation_id).await {
            warn!(installation_id = %installation_id, error = %e, "Failed to remove tenant container");
        }
    }
}

/// Find `name` in `docker ps --format '{{.Names}}\t{{.State}}'` output.
fn parse_ps_state(stdout: &str, name: &str) -> ContainerState {
    for line in stdout.lines() {
        let mut parts = line.trim().splitn(2, '\t');
        let (Some(found), state) = (parts.next(), parts.next()) else {
            continue;
        };
        if found != name {
            continue;
        }
        return match state.map(str::trim).unwrap_or_default() {
            "running" | "restarting" | "paused" => ContainerState::Running,
            _ => ContainerState::Stopped,
        };
    }
    ContainerState::Missing
}
