// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Provisioner request handlers.
//!
//! Each handler takes the shared [`ProvisionerState`] and a typed request and
//! returns a typed response. The HTTP layer in [`crate::server`] only does
//! extraction and status codes.

use std::sync::Arc;

use base64::Engine;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use smood_apps_client::{AppsClient, AppsClientConfig};
use tracing::{info, warn};
use uuid::Uuid;

use crate::backup::{BackupEntry, BackupPrereq, BackupService};
use crate::config::Config;
use crate::container::{ContainerManager, studio_slug};
use crate::error::{Error, Result};
use crate::locks::InstallationLocks;
use crate::model::{
    AppStatus, Installation, InstallationInsight, LicenseStatus, LicenseTier, NewHeartbeat,
    Overview, non_empty,
};
use crate::ports::PortAllocator;
use crate::proxy::ReverseProxy;
use crate::runner::CommandRunner;
use crate::store::{DEFAULT_LIST_LIMIT, InstallationStore, OverviewWindow};
use crate::tenant_db::{TenantDatabases, generate_db_name};

/// Largest page the insights listing returns.
const MAX_INSIGHTS_LIMIT: i64 = 200;

/// Trials ending within this many days count as expiring.
const TRIAL_EXPIRY_DAYS: i64 = 3;

/// Shared state for provisioner handlers.
pub struct ProvisionerState {
    /// Installation and heartbeat records.
    pub store: Arc<dyn InstallationStore>,
    /// Tenant container lifecycle.
    pub containers: Arc<ContainerManager>,
    /// Tenant database creation.
    pub databases: Arc<dyn TenantDatabases>,
    /// Nginx + Certbot configuration.
    pub proxy: ReverseProxy,
    /// Dumps and restores.
    pub backups: BackupService,
    /// Tenant application API.
    pub apps: AppsClient,
    /// Per-installation serialization.
    pub locks: InstallationLocks,
    /// Configure the reverse proxy during provisioning.
    pub auto_nginx: bool,
    /// Domain appended to provisioned subdomains.
    pub base_domain: Option<String>,
    /// Environment label for provisioned installations.
    pub environment: String,
    /// Application version for provisioned installations.
    pub app_version: Option<String>,
    /// How recent `lastSeenAt` must be to count as online.
    pub online_window: chrono::Duration,
    /// When the server started (for uptime calculation).
    pub start_time: std::time::Instant,
    /// Server version string.
    pub version: String,
}

impl ProvisionerState {
    /// Wire up every service from `config`.
    ///
    /// # Arguments
    ///
    /// * `store` - installation records
    /// * `runner` - executes docker, pg_dump, nginx and friends
    /// * `databases` - creates tenant databases
    /// * `config` - loaded provisioner configuration
    pub fn new(
        store: Arc<dyn InstallationStore>,
        runner: Arc<dyn CommandRunner>,
        databases: Arc<dyn TenantDatabases>,
        config: &Config,
    ) -> Result<Self> {
        let containers = ContainerManager::new(
            runner.clone(),
            PortAllocator::new(config.port_range),
            config.container.clone(),
        );

        Ok(Self {
            store,
            containers: Arc::new(containers),
            databases,
            proxy: ReverseProxy::new(runner.clone(), config.proxy.clone()),
            backups: BackupService::new(runner, config.backup.clone()),
            apps: AppsClient::new(config.apps.clone())?,
            locks: InstallationLocks::new(),
            auto_nginx: config.auto_nginx,
            base_domain: config.container.base_domain.clone(),
            environment: config.environment.clone(),
            app_version: config.app_version.clone(),
            online_window: chrono::Duration::from_std(config.online_window)
                .unwrap_or_else(|_| chrono::Duration::minutes(5)),
            start_time: std::time::Instant::now(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        })
    }

    /// Replace the tenant API client.
    pub fn with_apps_config(mut self, config: AppsClientConfig) -> Result<Self> {
        self.apps = AppsClient::new(config)?;
        Ok(self)
    }

    /// Get the server uptime in milliseconds.
    pub fn uptime_ms(&self) -> i64 {
        self.start_time.elapsed().as_millis() as i64
    }

    async fn require(&self, id: Uuid) -> Result<Installation> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Installation {} not found", id)))
    }

    /// Push the seat limit to the tenant application; failures are logged.
    async fn sync_seats(&self, endpoint_url: &str, seats: i32) {
        let Ok(seats) = u32::try_from(seats) else {
            return;
        };
        if let Err(e) = self.apps.update_max_users(endpoint_url, seats).await {
            warn!(endpoint = %endpoint_url, seats, error = %e, "Seat sync failed");
        }
    }
}

/// Acknowledgement with the container touched.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerActionResponse {
    /// Always true.
    pub ok: bool,
    /// Container name.
    pub container_name: String,
}

/// Acknowledgement carrying the updated record.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallationResponse {
    /// Always true.
    pub ok: bool,
    /// Updated installation.
    pub installation: Installation,
}

/// Read a positive count from a JSON number or numeric string, floored.
fn positive_count(value: Option<&Value>) -> Option<i32> {
    let n = match value? {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    (n.is_finite() && n >= 1.0 && n <= i32::MAX as f64).then(|| n.floor() as i32)
}

fn optional(s: Option<String>) -> Option<String> {
    s.filter(|v| !v.trim().is_empty())
}

// ============================================================================
// Health Check
// ============================================================================

/// Handle health check request.
pub async fn handle_health_check(state: &ProvisionerState) -> Result<HealthCheckResponse> {
    let healthy = state.store.health_check().await.unwrap_or(false);

    Ok(HealthCheckResponse {
        healthy,
        version: state.version.clone(),
        uptime_ms: state.uptime_ms(),
    })
}

/// Health check response.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthCheckResponse {
    /// Whether the store is reachable.
    pub healthy: bool,
    /// Server version.
    pub version: String,
    /// Server uptime in milliseconds.
    pub uptime_ms: i64,
}

// ============================================================================
// Provisioning
// ============================================================================

/// Request to provision a new installation.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvisionRequest {
    /// Company name.
    pub company_name: Option<String>,
    /// Studio name.
    pub studio_name: Option<String>,
    /// Contact email (required).
    pub contact_email: Option<String>,
    /// License tier, case-insensitive. Unknown values mean trial.
    pub tier: Option<String>,
    /// Provisioning driver. Only `docker` is supported.
    pub driver: Option<String>,
    /// Initial seat limit.
    pub seats: Option<Value>,
}

/// Provision response.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvisionResponse {
    /// Always true.
    pub ok: bool,
    /// New installation id.
    pub id: Uuid,
    /// Public subdomain host.
    pub subdomain: String,
    /// Direct endpoint of the tenant container.
    pub endpoint_url: String,
}

/// Create the installation, its database and its container.
///
/// The record is stored as `provisioning` first and moves to `pending` once
/// the container runs; the first heartbeat moves it to `running`. If the
/// database or container step fails the record stays `provisioning`.
pub async fn handle_provision(
    state: &ProvisionerState,
    request: ProvisionRequest,
) -> Result<ProvisionResponse> {
    let company_name = optional(request.company_name);
    let studio_name = optional(request.studio_name);
    if company_name.is_none() && studio_name.is_none() {
        return Err(Error::InvalidRequest(
            "companyName or studioName is required".to_string(),
        ));
    }
    let contact_email = optional(request.contact_email)
        .ok_or_else(|| Error::InvalidRequest("contactEmail is required".to_string()))?;
    let driver = optional(request.driver).unwrap_or_else(|| "docker".to_string());
    if driver != "docker" {
        return Err(Error::InvalidRequest(format!(
            "Unsupported driver: {}",
            driver
        )));
    }
    let seats = positive_count(request.seats.as_ref());

    let name_base = studio_name
        .as_deref()
        .or(company_name.as_deref())
        .unwrap_or("studio");
    let domain = state
        .base_domain
        .as_deref()
        .filter(|d| !d.is_empty())
        .unwrap_or("localhost");
    let subdomain = format!("{}.{}", studio_slug(name_base), domain);

    let mut inst = Installation::new(Uuid::new_v4());
    inst.company_name = company_name;
    inst.studio_name = studio_name;
    inst.contact_email = Some(contact_email);
    inst.subdomain = Some(subdomain.clone());
    inst.app_status = AppStatus::Provisioning;
    inst.license_tier = request
        .tier
        .as_deref()
        .map(LicenseTier::parse_lenient)
        .unwrap_or_default();
    inst.license_status = LicenseStatus::Active;
    inst.environment = Some(state.environment.clone());
    inst.app_version = state.app_version.clone();

    let _guard = state.locks.acquire(inst.id).await;
    state.store.insert(&inst).await?;
    info!(installation_id = %inst.id, subdomain = %subdomain, "Provisioning installation");

    let db_name = generate_db_name();
    state.databases.create_database_if_not_exists(&db_name).await?;
    let out = state.containers.provision(&inst, &db_name).await?;

    if state.auto_nginx {
        let proxy = state.proxy.setup(&subdomain, out.host_port).await;
        if !proxy.ok {
            warn!(
                installation_id = %inst.id,
                subdomain = %subdomain,
                error = proxy.error.as_deref().unwrap_or_default(),
                "Reverse proxy setup failed"
            );
        }
    }

    inst.metadata.driver = Some(driver);
    inst.metadata.endpoint_url = Some(out.endpoint_url.clone());
    inst.metadata.subdomain_url = Some(format!("https://{}", subdomain));
    inst.metadata.container_name = Some(out.container_name.clone());
    inst.metadata.db_name = Some(db_name);
    inst.metadata.host_port = Some(out.host_port);
    inst.metadata.seats = seats;
    inst.seats = seats;
    inst.app_status = AppStatus::Pending;
    inst.primary_ip = None;
    state.store.update(&inst).await?;

    if let Some(seats) = seats {
        state.sync_seats(&out.endpoint_url, seats).await;
    }

    info!(
        installation_id = %inst.id,
        container = %out.container_name,
        endpoint = %out.endpoint_url,
        "Installation provisioned"
    );

    Ok(ProvisionResponse {
        ok: true,
        id: inst.id,
        subdomain,
        endpoint_url: out.endpoint_url,
    })
}

// ============================================================================
// Tenant Reporting
// ============================================================================

/// Profile sent by a tenant when it registers or updates itself.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    /// Id handed to the container at provisioning time.
    pub installation_id: Option<String>,
    /// Company name.
    pub company_name: Option<String>,
    /// Studio name.
    pub studio_name: Option<String>,
    /// Primary IP.
    pub primary_ip: Option<String>,
    /// Country.
    pub country: Option<String>,
    /// City.
    pub city: Option<String>,
    /// Postal address.
    pub address: Option<String>,
    /// Contact person.
    pub contact_name: Option<String>,
    /// Contact email.
    pub contact_email: Option<String>,
    /// License key.
    pub license_key: Option<String>,
    /// Application version.
    pub app_version: Option<String>,
    /// Environment label.
    pub environment: Option<String>,
}

impl RegisterRequest {
    /// Overwrite only the fields that were provided.
    fn merge_into(self, inst: &mut Installation) {
        fn set(field: &mut Option<String>, value: Option<String>) {
            if let Some(v) = value {
                *field = Some(v);
            }
        }
        set(&mut inst.company_name, self.company_name);
        set(&mut inst.studio_name, self.studio_name);
        set(&mut inst.primary_ip, self.primary_ip);
        set(&mut inst.country, self.country);
        set(&mut inst.city, self.city);
        set(&mut inst.address, self.address);
        set(&mut inst.contact_name, self.contact_name);
        set(&mut inst.contact_email, self.contact_email);
        set(&mut inst.license_key, self.license_key);
        set(&mut inst.app_version, self.app_version);
        set(&mut inst.environment, self.environment);
    }
}

/// Registration response.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterResponse {
    /// Id of the created or updated installation.
    pub id: Uuid,
}

/// Upsert a tenant profile.
///
/// Matching order: installation id, license key, primary IP, then contact
/// email with studio or company name. Without a match a record is created.
pub async fn handle_register(
    state: &ProvisionerState,
    request: RegisterRequest,
) -> Result<RegisterResponse> {
    let direct_id = match optional(request.installation_id.clone()) {
        Some(raw) => Some(Uuid::parse_str(raw.trim()).map_err(|_| {
            Error::InvalidRequest(format!("invalid installationId: {}", raw))
        })?),
        None => None,
    };

    let mut existing = match direct_id {
        Some(id) => state.store.get(id).await?,
        None => None,
    };

    if existing.is_none() {
        if let Some(key) = non_empty(request.license_key.as_deref()) {
            existing = state.store.find_by_license_key(key).await?;
        } else if let Some(ip) = non_empty(request.primary_ip.as_deref()) {
            existing = state.store.find_by_primary_ip(ip).await?;
        }
    }

    if existing.is_none()
        && let Some(email) = non_empty(request.contact_email.as_deref())
    {
        for name in [request.studio_name.as_deref(), request.company_name.as_deref()]
            .into_iter()
            .filter_map(non_empty)
        {
            existing = state.store.find_by_contact(email, name).await?;
            if existing.is_some() {
                break;
            }
        }
    }

    let now = Utc::now();
    match existing {
        Some(found) => {
            // Re-read under the lock so concurrent admin changes are kept.
            let _guard = state.locks.acquire(found.id).await;
            let mut inst = state.require(found.id).await?;
            request.merge_into(&mut inst);
            inst.last_seen_at = Some(now);
            state.store.update(&inst).await?;
            info!(installation_id = %inst.id, "Installation profile updated");
            Ok(RegisterResponse { id: inst.id })
        }
        None => {
            let mut inst = Installation::new(Uuid::new_v4());
            request.merge_into(&mut inst);
            inst.last_seen_at = Some(now);
            state.store.insert(&inst).await?;
            info!(installation_id = %inst.id, "Installation registered");
            Ok(RegisterResponse { id: inst.id })
        }
    }
}

/// Liveness report from a tenant.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatRequest {
    /// Reporting address.
    pub ip_address: Option<String>,
    /// Fallback for `ipAddress`.
    pub primary_ip: Option<String>,
    /// Application version.
    pub app_version: Option<String>,
    /// Environment label.
    pub environment: Option<String>,
    /// Free-form report.
    pub payload: Option<Value>,
}

/// Heartbeat response.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatResponse {
    /// Stored heartbeat id.
    pub heartbeat_id: Uuid,
}

/// Record a heartbeat. A `pending` installation becomes `running`.
pub async fn handle_heartbeat(
    state: &ProvisionerState,
    id: Uuid,
    request: HeartbeatRequest,
) -> Result<HeartbeatResponse> {
    let _guard = state.locks.acquire(id).await;
    let mut inst = state.require(id).await?;

    let app_version = optional(request.app_version);
    inst.last_seen_at = Some(Utc::now());
    if let Some(v) = &app_version {
        inst.app_version = Some(v.clone());
    }
    if inst.app_status == AppStatus::Pending {
        inst.app_status = AppStatus::Running;
        info!(installation_id = %id, "First heartbeat received, installation running");
    }
    state.store.update(&inst).await?;

    let hb = state
        .store
        .insert_heartbeat(
            id,
            &NewHeartbeat {
                ip_address: optional(request.ip_address).or(optional(request.primary_ip)),
                app_version,
                environment: optional(request.environment),
                payload: request.payload.filter(|p| !p.is_null()),
            },
        )
        .await?;

    Ok(HeartbeatResponse {
        heartbeat_id: hb.id,
    })
}

/// Payload upload response.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PayloadResponse {
    /// Stored heartbeat id.
    pub receipt_id: Uuid,
}

/// Store an offline payload upload as a heartbeat carrying the whole body.
pub async fn handle_payload(
    state: &ProvisionerState,
    id: Uuid,
    body: Value,
) -> Result<PayloadResponse> {
    let _guard = state.locks.acquire(id).await;
    let mut inst = state.require(id).await?;
    inst.last_seen_at = Some(Utc::now());
    state.store.update(&inst).await?;

    let field = |key: &str| {
        body.get(key)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };
    let hb = state
        .store
        .insert_heartbeat(
            id,
            &NewHeartbeat {
                ip_address: field("ipAddress"),
                app_version: field("appVersion"),
                environment: field("environment"),
                payload: Some(body.clone()),
            },
        )
        .await?;

    Ok(PayloadResponse { receipt_id: hb.id })
}

// ============================================================================
// Fleet Views
// ============================================================================

/// Installation listing.
#[derive(Debug, Clone, Serialize)]
pub struct InstallationsResponse {
    /// Most recently updated first.
    pub installations: Vec<Installation>,
}

/// Latest installations, most recently updated first.
pub async fn handle_list_installations(state: &ProvisionerState) -> Result<InstallationsResponse> {
    Ok(InstallationsResponse {
        installations: state.store.list_recent(DEFAULT_LIST_LIMIT).await?,
    })
}

/// Single insight.
#[derive(Debug, Clone, Serialize)]
pub struct InsightResponse {
    /// Installation joined with its latest heartbeat.
    pub installation: InstallationInsight,
}

/// Insight for one installation.
pub async fn handle_insight(state: &ProvisionerState, id: Uuid) -> Result<InsightResponse> {
    let inst = state.require(id).await?;
    let latest = state.store.latest_heartbeat(id).await?;
    Ok(InsightResponse {
        installation: InstallationInsight::build(
            &inst,
            latest.as_ref(),
            Utc::now(),
            state.online_window,
        ),
    })
}

/// Insight listing.
#[derive(Debug, Clone, Serialize)]
pub struct InsightsResponse {
    /// One entry per installation.
    pub insights: Vec<InstallationInsight>,
}

/// Insights for the latest installations. `limit` is clamped to 1..=200.
pub async fn handle_list_insights(
    state: &ProvisionerState,
    limit: Option<i64>,
) -> Result<InsightsResponse> {
    let limit = limit
        .unwrap_or(DEFAULT_LIST_LIMIT)
        .clamp(1, MAX_INSIGHTS_LIMIT);
    let now = Utc::now();

    let mut insights = Vec::new();
    for inst in state.store.list_recent(limit).await? {
        let latest = state.store.latest_heartbeat(inst.id).await?;
        insights.push(InstallationInsight::build(
            &inst,
            latest.as_ref(),
            now,
            state.online_window,
        ));
    }
    Ok(InsightsResponse { insights })
}

/// Fleet counters.
pub async fn handle_overview(state: &ProvisionerState) -> Result<Overview> {
    let now = Utc::now();
    state
        .store
        .overview(OverviewWindow {
            online_since: now - state.online_window,
            trial_ends_before: now + chrono::Duration::days(TRIAL_EXPIRY_DAYS),
        })
        .await
}

// ============================================================================
// Lifecycle
// ============================================================================

/// Start the tenant container and record `running`.
pub async fn handle_run(state: &ProvisionerState, id: Uuid) -> Result<ContainerActionResponse> {
    let _guard = state.locks.acquire(id).await;
    let mut inst = state.require(id).await?;
    let out = state.containers.start(id).await?;
    inst.app_status = AppStatus::Running;
    state.store.update(&inst).await?;
    Ok(ContainerActionResponse {
        ok: true,
        container_name: out.container_name,
    })
}

/// Stop the tenant container and record `stopped`.
pub async fn handle_pause(state: &ProvisionerState, id: Uuid) -> Result<ContainerActionResponse> {
    let _guard = state.locks.acquire(id).await;
    let mut inst = state.require(id).await?;
    let out = state.containers.stop(id).await?;
    inst.app_status = AppStatus::Stopped;
    state.store.update(&inst).await?;
    Ok(ContainerActionResponse {
        ok: true,
        container_name: out.container_name,
    })
}

/// Delete response.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteResponse {
    /// Always true.
    pub ok: bool,
    /// Removed installation.
    pub deleted_id: Uuid,
}

/// Remove the container (best effort), then the record and its heartbeats.
pub async fn handle_delete(state: &ProvisionerState, id: Uuid) -> Result<DeleteResponse> {
    {
        let _guard = state.locks.acquire(id).await;
        state.require(id).await?;
        state.containers.remove_best_effort(id).await;
        state.store.delete(id).await?;
    }
    state.locks.forget(id);
    info!(installation_id = %id, "Installation deleted");

    Ok(DeleteResponse {
        ok: true,
        deleted_id: id,
    })
}

/// Explicit status change.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppStatusRequest {
    /// `provisioning`, `pending`, `running` or `stopped`.
    pub app_status: Option<String>,
}

/// Set the app status, driving the container for `running` and `stopped`.
///
/// `running` also starts a new license period from now.
pub async fn handle_set_app_status(
    state: &ProvisionerState,
    id: Uuid,
    request: AppStatusRequest,
) -> Result<InstallationResponse> {
    let status: AppStatus = request
        .app_status
        .as_deref()
        .ok_or_else(|| Error::InvalidRequest("appStatus is required".to_string()))?
        .parse()?;

    let _guard = state.locks.acquire(id).await;
    let mut inst = state.require(id).await?;

    match status {
        AppStatus::Running => {
            state.containers.start(id).await?;
            let now = Utc::now();
            inst.trial_started_at = Some(now);
            inst.trial_ends_at = Some(now + inst.license_tier.period());
        }
        AppStatus::Stopped => {
            state.containers.stop(id).await?;
        }
        AppStatus::Provisioning | AppStatus::Pending => {}
    }
    inst.app_status = status;
    state.store.update(&inst).await?;
    info!(installation_id = %id, app_status = %status, "App status changed");

    let installation = state.require(id).await?;
    Ok(InstallationResponse {
        ok: true,
        installation,
    })
}

/// License change.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LicenseRequest {
    /// `starter`, `pro` or `enterprise`.
    pub tier: Option<String>,
}

/// Move an installation to a paid tier and mark its license active.
pub async fn handle_set_license(
    state: &ProvisionerState,
    id: Uuid,
    request: LicenseRequest,
) -> Result<InstallationResponse> {
    let tier = match request.tier.as_deref().map(str::parse::<LicenseTier>) {
        Some(Ok(tier)) if tier != LicenseTier::Trial => tier,
        _ => {
            return Err(Error::InvalidRequest(
                "tier must be one of starter, pro, enterprise".to_string(),
            ));
        }
    };

    let _guard = state.locks.acquire(id).await;
    let mut inst = state.require(id).await?;
    inst.license_tier = tier;
    inst.license_status = LicenseStatus::Active;
    state.store.update(&inst).await?;
    info!(installation_id = %id, tier = tier.as_str(), "License updated");

    let installation = state.require(id).await?;
    Ok(InstallationResponse {
        ok: true,
        installation,
    })
}

/// Seat limit change.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SeatsRequest {
    /// Number or numeric string, at least 1.
    pub seats: Option<Value>,
}

/// Seats response.
#[derive(Debug, Clone, Serialize)]
pub struct SeatsResponse {
    /// Always true.
    pub ok: bool,
    /// Stored seat limit.
    pub seats: i32,
}

/// Store a seat limit and push it to the tenant application.
pub async fn handle_update_seats(
    state: &ProvisionerState,
    id: Uuid,
    request: SeatsRequest,
) -> Result<SeatsResponse> {
    let seats = positive_count(request.seats.as_ref())
        .ok_or_else(|| Error::InvalidRequest("seats must be a number >= 1".to_string()))?;

    let _guard = state.locks.acquire(id).await;
    let mut inst = state.require(id).await?;
    inst.metadata.seats = Some(seats);
    inst.seats = Some(seats);
    state.store.update(&inst).await?;

    if let Some(endpoint) = non_empty(inst.metadata.endpoint_url.as_deref()) {
        state.sync_seats(endpoint, seats).await;
    }

    Ok(SeatsResponse { ok: true, seats })
}

/// Booking link.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkBookingRequest {
    /// Booking id (required).
    pub booking_id: Option<String>,
    /// Email on the booking.
    pub booking_email: Option<String>,
}

/// Link-booking response.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkBookingResponse {
    /// Always true.
    pub ok: bool,
    /// Linked installation.
    pub installation_id: Uuid,
    /// Linked booking.
    pub booking_id: String,
}

/// Record which booking an installation belongs to.
///
/// A booking links to at most one installation.
pub async fn handle_link_booking(
    state: &ProvisionerState,
    id: Uuid,
    request: LinkBookingRequest,
) -> Result<LinkBookingResponse> {
    let booking_id = optional(request.booking_id)
        .ok_or_else(|| Error::InvalidRequest("bookingId is required".to_string()))?;

    let _guard = state.locks.acquire(id).await;
    let mut inst = state.require(id).await?;

    if let Some(other) = state.store.find_by_booking_id(&booking_id).await?
        && other.id != id
    {
        return Err(Error::InvalidRequest(format!(
            "Booking {} is already linked to installation {}",
            booking_id, other.id
        )));
    }

    inst.metadata.booking_id = Some(booking_id.clone());
    if let Some(email) = optional(request.booking_email) {
        inst.metadata.booking_email = Some(email);
    }
    state.store.update(&inst).await?;

    Ok(LinkBookingResponse {
        ok: true,
        installation_id: id,
        booking_id,
    })
}

// ============================================================================
// Backups
// ============================================================================

/// Download path for a stored dump.
pub fn backup_url(installation_id: Uuid, file_name: &str) -> String {
    format!(
        "/api/admin/installations/{}/backups/{}/download",
        installation_id, file_name
    )
}

/// Created dump.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupFileView {
    /// Dump file name.
    pub file_name: String,
    /// Absolute path on the provisioner host.
    pub path: String,
    /// Size in bytes.
    pub size: u64,
    /// Download path.
    pub url: String,
}

/// Create-backup response.
#[derive(Debug, Clone, Serialize)]
pub struct CreateBackupResponse {
    /// Always true.
    pub ok: bool,
    /// The new dump.
    pub file: BackupFileView,
}

/// Dump the tenant database.
pub async fn handle_create_backup(
    state: &ProvisionerState,
    id: Uuid,
) -> Result<CreateBackupResponse> {
    let _guard = state.locks.acquire(id).await;
    let inst = state.require(id).await?;
    let file = state.backups.create_backup(&inst).await?;
    Ok(CreateBackupResponse {
        ok: true,
        file: BackupFileView {
            url: backup_url(id, &file.file_name),
            path: file.path.display().to_string(),
            file_name: file.file_name,
            size: file.size,
        },
    })
}

/// Listed dump.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupListItem {
    /// Dump details.
    #[serde(flatten)]
    pub entry: BackupEntry,
    /// Download path.
    pub url: String,
}

/// Backup listing.
#[derive(Debug, Clone, Serialize)]
pub struct BackupsResponse {
    /// Newest first.
    pub backups: Vec<BackupListItem>,
}

/// Dumps stored for an installation, newest first.
pub async fn handle_list_backups(state: &ProvisionerState, id: Uuid) -> Result<BackupsResponse> {
    state.require(id).await?;
    let backups = state
        .backups
        .list_backups(id)
        .await?
        .into_iter()
        .map(|entry| BackupListItem {
            url: backup_url(id, &entry.file_name),
            entry,
        })
        .collect();
    Ok(BackupsResponse { backups })
}

/// Base64 dump upload.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadRequest {
    /// File content, optionally as a `data:...;base64,` URL.
    pub file_base64: Option<String>,
    /// Original file name; must end in `.dump`.
    pub filename: Option<String>,
}

/// Uploaded dump.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadedFileView {
    /// Stored file name.
    pub file_name: String,
    /// Size in bytes.
    pub size: u64,
    /// Download path.
    pub url: String,
}

/// Upload response.
#[derive(Debug, Clone, Serialize)]
pub struct UploadResponse {
    /// Always true.
    pub ok: bool,
    /// The stored dump.
    pub file: UploadedFileView,
}

/// Store an uploaded dump.
pub async fn handle_upload_backup(
    state: &ProvisionerState,
    id: Uuid,
    request: UploadRequest,
) -> Result<UploadResponse> {
    let (Some(encoded), Some(filename)) =
        (optional(request.file_base64), optional(request.filename))
    else {
        return Err(Error::InvalidRequest(
            "fileBase64 and filename are required".to_string(),
        ));
    };
    let encoded = match encoded.split_once("base64,") {
        Some((_, data)) => data,
        None => encoded.as_str(),
    };
    let data = base64::engine::general_purpose::STANDARD
        .decode(encoded.trim())
        .map_err(|e| Error::InvalidRequest(format!("invalid base64 content: {}", e)))?;

    let _guard = state.locks.acquire(id).await;
    state.require(id).await?;
    let stored = state.backups.import_backup(id, &filename, &data).await?;

    Ok(UploadResponse {
        ok: true,
        file: UploadedFileView {
            url: backup_url(id, &stored.file_name),
            file_name: stored.file_name,
            size: stored.size,
        },
    })
}

/// Open dump for a streamed download.
#[derive(Debug)]
pub struct BackupDownload {
    /// File name for `Content-Disposition`.
    pub file_name: String,
    /// Size in bytes.
    pub size: u64,
    /// Handle positioned at the start of the dump.
    pub file: tokio::fs::File,
}

/// Open a stored dump of a known installation.
pub async fn handle_download_backup(
    state: &ProvisionerState,
    id: Uuid,
    file_name: &str,
) -> Result<BackupDownload> {
    state.require(id).await?;
    let path = state.backups.resolve_backup(id, file_name).await?;
    let file = tokio::fs::File::open(&path).await?;
    let size = file.metadata().await?.len();
    Ok(BackupDownload {
        file_name: file_name.to_string(),
        size,
        file,
    })
}

/// Prerequisite report.
#[derive(Debug, Clone, Serialize)]
pub struct PrereqResponse {
    /// Always true.
    pub ok: bool,
    /// What is and isn't in place.
    pub prereq: BackupPrereq,
}

/// Report whether backups can run for an installation.
pub async fn handle_backup_prereq(state: &ProvisionerState, id: Uuid) -> Result<PrereqResponse> {
    let inst = state.require(id).await?;
    Ok(PrereqResponse {
        ok: true,
        prereq: state.backups.check_prereq(&inst).await,
    })
}

/// Restore request.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreRequest {
    /// Dump in the installation's own directory.
    pub file_name: Option<String>,
}

/// Restore response.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreResponse {
    /// Always true.
    pub ok: bool,
    /// Always true.
    pub restored: bool,
    /// Restored dump.
    pub file_name: String,
}

/// Restore one of the installation's dumps into its database.
pub async fn handle_restore(
    state: &ProvisionerState,
    id: Uuid,
    request: RestoreRequest,
) -> Result<RestoreResponse> {
    let file_name = optional(request.file_name)
        .ok_or_else(|| Error::InvalidRequest("fileName is required".to_string()))?;

    let _guard = state.locks.acquire(id).await;
    let inst = state.require(id).await?;
    let out = state.backups.restore_backup(&inst, &file_name).await?;
    Ok(RestoreResponse {
        ok: true,
        restored: out.restored,
        file_name: out.file_name,
    })
}

/// Cross-installation restore request.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreFromRequest {
    /// Installation whose dump is copied.
    pub source_installation_id: Option<String>,
    /// Dump to copy; the newest one when absent.
    pub file_name: Option<String>,
}

/// Copy a dump from another installation, then restore it here.
pub async fn handle_restore_from(
    state: &ProvisionerState,
    id: Uuid,
    request: RestoreFromRequest,
) -> Result<RestoreResponse> {
    let source_raw = optional(request.source_installation_id)
        .ok_or_else(|| Error::InvalidRequest("sourceInstallationId is required".to_string()))?;
    let source = Uuid::parse_str(source_raw.trim()).map_err(|_| {
        Error::InvalidRequest(format!("invalid sourceInstallationId: {}", source_raw))
    })?;

    let _guard = state.locks.acquire(id).await;
    let target = state.require(id).await?;
    state.require(source).await?;

    let file_name = state
        .backups
        .copy_from(source, id, request.file_name.as_deref())
        .await?;
    let out = state.backups.restore_backup(&target, &file_name).await?;
    info!(source = %source, target = %id, file_name = %out.file_name, "Restored from another installation");

    Ok(RestoreResponse {
        ok: true,
        restored: out.restored,
        file_name: out.file_name,
    })
}
