// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Smood Provisioner - Tenant Provisioning and Lifecycle
//!
//! This crate stands up and manages one isolated application instance per
//! studio: a PostgreSQL database, a Docker container on a free host port, an
//! optional Nginx + Certbot subdomain, and `pg_dump`/`pg_restore` backups.
//! Tenants report back through registration and heartbeat endpoints.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────┐        ┌───────────────────────────┐
//! │      Admin dashboard      │        │     Tenant containers     │
//! └───────────────────────────┘        └───────────────────────────┘
//!               │ /api/admin/...                    │ /api/installations/...
//!               ▼                                   ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                   smood-provisioner (This Crate)                 │
//! │  ┌──────────┐ ┌───────────┐ ┌─────────┐ ┌────────┐ ┌──────────┐ │
//! │  │  Ports   │ │ Container │ │Tenant DB│ │ Proxy  │ │  Backup  │ │
//! │  └──────────┘ └───────────┘ └─────────┘ └────────┘ └──────────┘ │
//! │                      CommandRunner (docker, pg_*, nginx)         │
//! └─────────────────────────────────────────────────────────────────┘
//!               │                                   │
//!               ▼                                   ▼
//! ┌───────────────────────────┐        ┌───────────────────────────┐
//! │ PostgreSQL (installations,│        │ Tenant API (seat sync via │
//! │ heartbeats, tenant DBs)   │        │ smood-apps-client)        │
//! └───────────────────────────┘        └───────────────────────────┘
//! ```
//!
//! # Status lifecycle
//!
//! `provisioning` → `pending` (container running, waiting for the tenant) →
//! `running` (first heartbeat or explicit run) ⇄ `stopped`. The stored status
//! is the last commanded state; the optional [`reconciler`] compares it with
//! what Docker reports.
//!
//! # Configuration
//!
//! | Variable | Default | Purpose |
//! |----------|---------|---------|
//! | `SMOOD_DATABASE_URL` / `DATABASE_URL` | required | Installation records |
//! | `PORT` | `5055` | HTTP listen port |
//! | `APPS_PORT_RANGE_START` / `_END` | `9000` / `9999` | Host ports for tenants |
//! | `APPS_IMAGE` | unset | Tenant image; provisioning fails without it |
//! | `APPS_BASE_HOST` | `localhost` | Host in endpoint URLs |
//! | `BASE_DOMAIN` | unset | Subdomain suffix (`localhost` when unset) |
//! | `DOCKER_NETWORK` | unset | Network for tenant and client containers |
//! | `WEBSITE_PUBLIC_URL` / `WEBSITE_BACKEND_URL` | `http://localhost:5055` | Reporting URL for tenants |
//! | `JWT_SECRET` | `smood_secret` | Passed to tenants |
//! | `DB_SEED_ON_START` | `true` | Passed to tenants |
//! | `PG_ADMIN_HOST` / `_PORT` / `_USER` / `_PASSWORD` | `localhost` / `5432` | Admin connection |
//! | `TENANT_DB_HOST` / `_PORT` / `_USER` / `_PASSWORD` | admin values | Tenant credentials |
//! | `BACKUP_DIR` | `uploads/backups` | Dump root |
//! | `FORCE_PG_CLIENT` | unset | `docker` forces containerized pg tools |
//! | `PG_CLIENT_IMAGE` | `postgres:14` | Image for containerized pg tools |
//! | `AUTO_NGINX` | `false` | Configure Nginx + Certbot on provision |
//! | `NGINX_CONF_DIR` | `/etc/nginx/conf.d` | Server block directory |
//! | `APPS_SERVICE_USERNAME` / `_PASSWORD` | unset | Tenant API service account |
//! | `RECONCILE_INTERVAL_SECS` | `0` (off) | Drift reconciler interval |
//! | `RECONCILE_MODE` | `observe` | `observe` or `correct` |
//! | `HEARTBEAT_ONLINE_WINDOW_SECS` | `300` | Online freshness window |
//!
//! See [`config::Config`] for the full list.

pub mod backup;
pub mod config;
pub mod container;
pub mod error;
pub mod handlers;
pub mod locks;
pub mod migrations;
pub mod model;
pub mod ports;
pub mod proxy;
pub mod reconciler;
pub mod runner;
pub mod runtime;
pub mod server;
pub mod store;
pub mod tenant_db;

pub use error::{Error, ErrorKind, Result};
pub use runtime::ProvisionerRuntime;
