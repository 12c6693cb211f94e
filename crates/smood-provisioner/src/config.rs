// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration for smood-provisioner.
//!
//! Everything comes from environment variables (optionally via `.env`).
//! Most settings have defaults; only the database URL is required at startup.
//! Settings needed by a single operation (image, admin credentials) are
//! checked when that operation runs, so a partially configured deployment
//! still serves the rest of the API.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use smood_apps_client::{AppsClientConfig, DEFAULT_APPS_API_URL};

use crate::backup::BackupConfig;
use crate::container::{ContainerConfig, TenantDbCoordinates};
use crate::ports::PortRange;
use crate::proxy::ProxyConfig;
use crate::reconciler::{ReconcileMode, ReconcilerConfig};
use crate::tenant_db::TenantDbConfig;

/// Provisioner configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Database holding installations and heartbeats.
    pub database_url: String,
    /// HTTP listen address.
    pub http_addr: SocketAddr,
    /// Host ports handed to tenant containers.
    pub port_range: PortRange,
    /// Tenant container settings.
    pub container: ContainerConfig,
    /// Admin connection used to create tenant databases.
    pub tenant_db: TenantDbConfig,
    /// Backup settings.
    pub backup: BackupConfig,
    /// Reverse proxy settings.
    pub proxy: ProxyConfig,
    /// Configure Nginx + Certbot during provisioning.
    pub auto_nginx: bool,
    /// Tenant application API client settings.
    pub apps: AppsClientConfig,
    /// Drift reconciler, when enabled.
    pub reconciler: Option<ReconcilerConfig>,
    /// How recent `lastSeenAt` must be to count as online.
    pub online_window: Duration,
    /// Environment label stored on provisioned installations.
    pub environment: String,
    /// Application version stored on provisioned installations.
    pub app_version: Option<String>,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through `lookup`. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let first = |names: &[&str]| names.iter().find_map(|n| var(*n));

        let database_url = first(&["SMOOD_DATABASE_URL", "DATABASE_URL"])
            .ok_or(ConfigError::MissingEnvVar("SMOOD_DATABASE_URL or DATABASE_URL"))?;

        let port: u16 = var("PORT")
            .unwrap_or_else(|| "5055".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidPort)?;
        let http_addr = SocketAddr::from(([0, 0, 0, 0], port));

        let range_start = parse_or(&var, "APPS_PORT_RANGE_START", 9000u16)?;
        let range_end = parse_or(&var, "APPS_PORT_RANGE_END", 9999u16)?;
        let port_range =
            PortRange::new(range_start, range_end).map_err(|_| ConfigError::InvalidValue {
                name: "APPS_PORT_RANGE_START/APPS_PORT_RANGE_END",
                value: format!("{}-{}", range_start, range_end),
            })?;

        // Admin endpoint used to create databases.
        let admin_host = var("PG_ADMIN_HOST").unwrap_or_else(|| "localhost".to_string());
        let admin_port = parse_or(&var, "PG_ADMIN_PORT", 5432u16)?;
        let admin_user = var("PG_ADMIN_USER");
        let admin_password = var("PG_ADMIN_PASSWORD");

        // Coordinates tenants (and backups) use, falling back to the admin ones.
        let tenant_host = var("TENANT_DB_HOST").unwrap_or_else(|| admin_host.clone());
        let tenant_port = match var("TENANT_DB_PORT") {
            Some(v) => v.parse().map_err(|_| ConfigError::InvalidValue {
                name: "TENANT_DB_PORT",
                value: v,
            })?,
            None => admin_port,
        };
        let tenant_user = var("TENANT_DB_USER").or_else(|| admin_user.clone());
        let tenant_password = var("TENANT_DB_PASSWORD").or_else(|| admin_password.clone());

        let command_timeout = Duration::from_secs(parse_or(&var, "DOCKER_COMMAND_TIMEOUT_SECS", 120u64)?);

        let container = ContainerConfig {
            image: var("APPS_IMAGE"),
            base_host: var("APPS_BASE_HOST").unwrap_or_else(|| "localhost".to_string()),
            base_domain: var("BASE_DOMAIN"),
            network: var("DOCKER_NETWORK"),
            backend_url: first(&["WEBSITE_PUBLIC_URL", "WEBSITE_BACKEND_URL"])
                .unwrap_or_else(|| "http://localhost:5055".to_string()),
            jwt_secret: var("JWT_SECRET").unwrap_or_else(|| "smood_secret".to_string()),
            db_seed_on_start: var("DB_SEED_ON_START").unwrap_or_else(|| "true".to_string()),
            name_prefix: var("APPS_CONTAINER_PREFIX").unwrap_or_else(|| "smood-app".to_string()),
            tenant_db: TenantDbCoordinates {
                host: tenant_host.clone(),
                port: tenant_port,
                user: tenant_user.clone(),
                password: tenant_password.clone(),
            },
            command_timeout,
            ..ContainerConfig::default()
        };

        let tenant_db = TenantDbConfig {
            host: Some(admin_host),
            port: admin_port,
            admin_user: admin_user.clone(),
            admin_password: admin_password.clone(),
            owner: tenant_user.clone(),
            ..TenantDbConfig::default()
        };

        let backup = BackupConfig {
            root_dir: PathBuf::from(var("BACKUP_DIR").unwrap_or_else(|| "uploads/backups".to_string())),
            db_host: tenant_host,
            db_port: tenant_port,
            db_user: tenant_user.or_else(|| var("DB_USER")),
            db_password: tenant_password.or_else(|| var("DB_PASSWORD")),
            force_docker: var("FORCE_PG_CLIENT").is_some_and(|v| v.eq_ignore_ascii_case("docker")),
            client_image: var("PG_CLIENT_IMAGE").unwrap_or_else(|| "postgres:14".to_string()),
            network: var("DOCKER_NETWORK"),
            command_timeout: Duration::from_secs(parse_or(&var, "BACKUP_TIMEOUT_SECS", 1800u64)?),
        };

        let proxy = ProxyConfig {
            conf_dir: PathBuf::from(var("NGINX_CONF_DIR").unwrap_or_else(|| "/etc/nginx/conf.d".to_string())),
            use_sudo: var("NGINX_USE_SUDO").is_none_or(|v| parse_bool(&v)),
            command_timeout: Duration::from_secs(parse_or(&var, "PROXY_TIMEOUT_SECS", 300u64)?),
        };

        let mut apps = AppsClientConfig::new()
            .with_default_base_url(var("APPS_API_URL").unwrap_or_else(|| DEFAULT_APPS_API_URL.to_string()))
            .with_request_timeout(Duration::from_millis(parse_or(&var, "APPS_REQUEST_TIMEOUT_MS", 30_000u64)?));
        apps.username = first(&["APPS_SERVICE_USERNAME", "APPS_USERNAME"]);
        apps.password = first(&["APPS_SERVICE_PASSWORD", "APPS_PASSWORD"]);

        let reconcile_secs = parse_or(&var, "RECONCILE_INTERVAL_SECS", 0u64)?;
        let reconciler = if reconcile_secs == 0 {
            None
        } else {
            let mode = match var("RECONCILE_MODE") {
                Some(v) => v.parse().map_err(|_| ConfigError::InvalidValue {
                    name: "RECONCILE_MODE",
                    value: v,
                })?,
                None => ReconcileMode::Observe,
            };
            Some(ReconcilerConfig {
                poll_interval: Duration::from_secs(reconcile_secs),
                mode,
                batch_size: parse_or(&var, "RECONCILE_BATCH_SIZE", 500i64)?.max(1),
            })
        };

        Ok(Self {
            database_url,
            http_addr,
            port_range,
            container,
            tenant_db,
            backup,
            proxy,
            auto_nginx: var("AUTO_NGINX").is_some_and(|v| v == "true"),
            apps,
            reconciler,
            online_window: Duration::from_secs(parse_or(&var, "HEARTBEAT_ONLINE_WINDOW_SECS", 300u64)?),
            environment: var("NODE_ENV").unwrap_or_else(|| "production".to_string()),
            app_version: var("APPS_VERSION"),
        })
    }
}

fn parse_or<T, F>(var: &F, name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    match var(name) {
        Some(v) => v.trim().parse().map_err(|_| ConfigError::InvalidValue { name, value: v }),
        None => Ok(default),
    }
}

/// Parse a boolean flag: `1`, `true`, `yes` and `on` are true.
pub fn parse_bool(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(&'static str),
    /// The port number is invalid.
    #[error("Invalid port number")]
    InvalidPort,
    /// A variable could not be parsed.
    #[error("Invalid value for {name}: {value}")]
    InvalidValue {
        /// Variable name.
        name: &'static str,
        /// Offending value.
        value: String,
    },
}
