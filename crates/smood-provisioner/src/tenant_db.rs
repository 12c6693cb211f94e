// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Per-tenant PostgreSQL database creation.
//!
//! Connects to the admin endpoint's `postgres` database, checks
//! `pg_database`, and creates the tenant database only when it is absent.
//! Identifiers cannot be bound as query parameters, so database and owner
//! names are checked against strict patterns and double-quoted before they
//! reach `CREATE DATABASE`.

use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use sqlx::postgres::PgConnectOptions;
use sqlx::Connection;
use tracing::{debug, info};

use crate::error::{Error, Result};

static DB_NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z][a-z0-9_]{2,40}$").expect("db name pattern is valid")
});

static ROLE_NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]{0,62}$").expect("role name pattern is valid")
});

/// Check a tenant database name.
pub fn validate_db_name(name: &str) -> Result<()> {
    if DB_NAME_RE.is_match(name) {
        Ok(())
    } else {
        Err(Error::InvalidRequest(format!(
            "invalid database name '{}': must match ^[a-z][a-z0-9_]{{2,40}}$",
            name
        )))
    }
}

/// Check a role name used as database owner.
pub fn validate_role_name(name: &str) -> Result<()> {
    if ROLE_NAME_RE.is_match(name) {
        Ok(())
    } else {
        Err(Error::Configuration(format!("invalid owner role name '{}'", name)))
    }
}

/// New tenant database name: `smood_` followed by six lowercase alphanumerics.
pub fn generate_db_name() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("smood_{}", &id[..6])
}

/// Admin connection settings.
#[derive(Debug, Clone)]
pub struct TenantDbConfig {
    /// Admin host.
    pub host: Option<String>,
    /// Admin port.
    pub port: u16,
    /// Admin role.
    pub admin_user: Option<String>,
    /// Admin password.
    pub admin_password: Option<String>,
    /// Owner of created databases, if any.
    pub owner: Option<String>,
    /// Connection timeout.
    pub connect_timeout: Duration,
}

impl Default for TenantDbConfig {
    fn default() -> Self {
        Self {
            host: Some("localhost".to_string()),
            port: 5432,
            admin_user: None,
            admin_password: None,
            owner: None,
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// Creates tenant databases.
#[async_trait]
pub trait TenantDatabases: Send + Sync {
    /// Create `db_name` unless it exists. Returns `true` when it was created.
    async fn create_database_if_not_exists(&self, db_name: &str) -> Result<bool>;
}

/// [`TenantDatabases`] backed by a PostgreSQL admin connection.
#[derive(Debug, Clone)]
pub struct PgTenantDatabases {
    config: TenantDbConfig,
}

impl PgTenantDatabases {
    /// Create a provisioner for the given admin endpoint.
    pub fn new(config: TenantDbConfig) -> Self {
        Self { config }
    }

    /// Admin connection options for the `postgres` database.
    ///
    /// Fails without touching the network when host or credentials are missing.
    pub fn connect_options(&self) -> Result<PgConnectOptions> {
        let host = required(self.config.host.as_deref(), "PG_ADMIN_HOST")?;
        let user = required(self.config.admin_user.as_deref(), "PG_ADMIN_USER")?;
        let password = required(self.config.admin_password.as_deref(), "PG_ADMIN_PASSWORD")?;

        Ok(PgConnectOptions::new()
            .host(host)
            .port(self.config.port)
            .username(user)
            .password(password)
            .database("postgres"))
    }
}

fn required<'a>(value: Option<&'a str>, name: &str) -> Result<&'a str> {
    value
        .filter(|v| !v.is_empty())
        .ok_or_else(|| Error::Configuration(format!("{} is not configured", name)))
}

#[async_trait]
impl TenantDatabases for PgTenantDatabases {
    async fn create_database_if_not_exists(&self, db_name: &str) -> Result<bool> {
        if db_name.is_empty() {
            return Err(Error::Configuration("database name is required".to_string()));
        }
        validate_db_name(db_name)?;
        let owner = self.config.owner.as_deref().filter(|o| !o.is_empty());
        if let Some(owner) = owner {
            validate_role_name(owner)?;
        }
        let options = self.connect_options()?;

        let mut conn = tokio::time::timeout(
            self.config.connect_timeout,
            sqlx::PgConnection::connect_with(&options),
        )
        .await
        .map_err(|_| Error::Timeout("connecting to the admin database".to_string()))??;

        let exists: Option<i32> =
            sqlx::query_scalar("SELECT 1 FROM pg_database WHERE datname = $1")
                .bind(db_name)
                .fetch_optional(&mut conn)
                .await?;

        if exists.is_some() {
            debug!(db_name, "Tenant database already exists");
            conn.close().await?;
            return Ok(false);
        }

        let statement = match owner {
            Some(owner) => format!("CREATE DATABASE \"{}\" OWNER \"{}\"", db_name, owner),
            None => format!("CREATE DATABASE \"{}\"", db_name),
        };
        sqlx::Executor::execute(&mut conn, sqlx::raw_sql(&statement)).await?;
        conn.close().await?;

        info!(db_name, owner = ?owner, "Created tenant database");
        Ok(true)
    }
}
