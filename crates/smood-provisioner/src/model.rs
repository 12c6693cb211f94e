// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Installation and heartbeat records.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::Error;

/// Runtime state of a tenant application.
///
/// `Running` records that a start was requested. It says nothing about
/// whether the container is healthy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppStatus {
    /// Record created, resources being allocated.
    #[default]
    Provisioning,
    /// Container launched, waiting for the first heartbeat.
    Pending,
    /// Start requested (or heartbeat received).
    Running,
    /// Stop requested.
    Stopped,
}

impl AppStatus {
    /// Lowercase name as stored in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            AppStatus::Provisioning => "provisioning",
            AppStatus::Pending => "pending",
            AppStatus::Running => "running",
            AppStatus::Stopped => "stopped",
        }
    }
}

impl fmt::Display for AppStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AppStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "provisioning" => Ok(AppStatus::Provisioning),
            "pending" => Ok(AppStatus::Pending),
            "running" => Ok(AppStatus::Running),
            "stopped" => Ok(AppStatus::Stopped),
            other => Err(Error::InvalidRequest(format!("invalid appStatus: {}", other))),
        }
    }
}

/// License tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LicenseTier {
    /// Free trial.
    #[default]
    Trial,
    /// Starter plan.
    Starter,
    /// Pro plan.
    Pro,
    /// Enterprise plan.
    Enterprise,
}

impl LicenseTier {
    /// Lowercase name as stored in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            LicenseTier::Trial => "trial",
            LicenseTier::Starter => "starter",
            LicenseTier::Pro => "pro",
            LicenseTier::Enterprise => "enterprise",
        }
    }

    /// Case-insensitive parse; anything unknown is a trial.
    pub fn parse_lenient(s: &str) -> Self {
        s.to_ascii_lowercase().parse().unwrap_or_default()
    }

    /// Length of the period started when the app is set running.
    pub fn period(&self) -> Duration {
        match self {
            LicenseTier::Trial => Duration::days(14),
            _ => Duration::days(30),
        }
    }
}

impl FromStr for LicenseTier {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "trial" => Ok(LicenseTier::Trial),
            "starter" => Ok(LicenseTier::Starter),
            "pro" => Ok(LicenseTier::Pro),
            "enterprise" => Ok(LicenseTier::Enterprise),
            other => Err(Error::InvalidRequest(format!("invalid license tier: {}", other))),
        }
    }
}

/// License status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LicenseStatus {
    /// Not yet activated.
    Inactive,
    /// In good standing.
    #[default]
    Active,
    /// Suspended by an admin.
    Suspended,
}

impl LicenseStatus {
    /// Lowercase name as stored in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            LicenseStatus::Inactive => "inactive",
            LicenseStatus::Active => "active",
            LicenseStatus::Suspended => "suspended",
        }
    }
}

impl FromStr for LicenseStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "inactive" => Ok(LicenseStatus::Inactive),
            "active" => Ok(LicenseStatus::Active),
            "suspended" => Ok(LicenseStatus::Suspended),
            other => Err(Error::InvalidRequest(format!(
                "invalid license status: {}",
                other
            ))),
        }
    }
}

/// What provisioning produced for an installation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvisioningMetadata {
    /// Provisioning driver, always `docker` today.
    pub driver: Option<String>,
    /// Tenant database name.
    pub db_name: Option<String>,
    /// Container name.
    pub container_name: Option<String>,
    /// Host port mapped to the container.
    pub host_port: Option<u16>,
    /// Direct endpoint (`http://<baseHost>:<port>`).
    pub endpoint_url: Option<String>,
    /// Public subdomain URL.
    pub subdomain_url: Option<String>,
    /// Linked booking id.
    pub booking_id: Option<String>,
    /// Email of the linked booking.
    pub booking_email: Option<String>,
    /// Seat limit pushed to the tenant application.
    pub seats: Option<i32>,
}

/// One tenant's application instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Installation {
    /// Installation id.
    pub id: Uuid,
    /// Company name.
    pub company_name: Option<String>,
    /// Studio name.
    pub studio_name: Option<String>,
    /// Primary IP reported by the tenant.
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
    /// Public subdomain host (no scheme).
    pub subdomain: Option<String>,
    /// Runtime state.
    pub app_status: AppStatus,
    /// License tier.
    pub license_tier: LicenseTier,
    /// License status.
    pub license_status: LicenseStatus,
    /// Start of the current license period.
    pub trial_started_at: Option<DateTime<Utc>>,
    /// End of the current license period.
    pub trial_ends_at: Option<DateTime<Utc>>,
    /// Seat limit.
    pub seats: Option<i32>,
    /// Provisioning output.
    pub metadata: ProvisioningMetadata,
    /// Last heartbeat or registration.
    pub last_seen_at: Option<DateTime<Utc>>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last modification time.
    pub updated_at: DateTime<Utc>,
}

impl Installation {
    /// A fresh record with default state and the given id.
    pub fn new(id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            id,
            company_name: None,
            studio_name: None,
            primary_ip: None,
            country: None,
            city: None,
            address: None,
            contact_name: None,
            contact_email: None,
            license_key: None,
            app_version: None,
            environment: None,
            subdomain: None,
            app_status: AppStatus::default(),
            license_tier: LicenseTier::default(),
            license_status: LicenseStatus::default(),
            trial_started_at: None,
            trial_ends_at: None,
            seats: None,
            metadata: ProvisioningMetadata::default(),
            last_seen_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Studio name, else company name.
    pub fn display_name(&self) -> Option<&str> {
        non_empty(self.studio_name.as_deref()).or(non_empty(self.company_name.as_deref()))
    }

    /// Tenant database name from the provisioning metadata.
    pub fn db_name(&self) -> Option<&str> {
        non_empty(self.metadata.db_name.as_deref())
    }

    /// Seat limit, preferring the column over the metadata copy.
    pub fn effective_seats(&self) -> Option<i32> {
        self.seats.or(self.metadata.seats)
    }
}

pub(crate) fn non_empty(s: Option<&str>) -> Option<&str> {
    s.filter(|v| !v.trim().is_empty())
}

/// Immutable liveness report from a tenant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Heartbeat {
    /// Heartbeat id.
    pub id: Uuid,
    /// Owning installation.
    pub installation_id: Uuid,
    /// Reporting address.
    pub ip_address: Option<String>,
    /// Reported application version.
    pub app_version: Option<String>,
    /// Reported environment label.
    pub environment: Option<String>,
    /// Free-form report (metrics, hostname, instance name).
    pub payload: Option<Value>,
    /// When the report arrived.
    pub received_at: DateTime<Utc>,
}

/// Fields of a heartbeat supplied by the tenant.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewHeartbeat {
    /// Reporting address.
    pub ip_address: Option<String>,
    /// Reported application version.
    pub app_version: Option<String>,
    /// Reported environment label.
    pub environment: Option<String>,
    /// Free-form report.
    pub payload: Option<Value>,
}

/// Usage numbers reported under `payload.metrics`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageMetrics {
    /// Number of users.
    pub users: i64,
    /// Number of projects.
    pub projects: i64,
    /// Storage used, in bytes.
    pub storage_used_bytes: i64,
    /// Storage used, in GiB rounded to two decimals.
    #[serde(rename = "storageUsedGB")]
    pub storage_used_gb: f64,
}

impl UsageMetrics {
    /// Read metrics from a heartbeat payload. Missing or non-numeric values are zero.
    pub fn from_payload(payload: Option<&Value>) -> Self {
        let metrics = payload.and_then(|p| p.get("metrics"));
        let number = |key: &str| -> i64 {
            metrics
                .and_then(|m| m.get(key))
                .and_then(|v| match v {
                    Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
                    Value::String(s) => s.trim().parse::<f64>().ok().map(|f| f as i64),
                    _ => None,
                })
                .unwrap_or(0)
        };

        let storage_used_bytes = number("storageUsedBytes");
        let gib = storage_used_bytes as f64 / (1024.0 * 1024.0 * 1024.0);

        Self {
            users: number("users"),
            projects: number("projects"),
            storage_used_bytes,
            storage_used_gb: (gib * 100.0).round() / 100.0,
        }
    }
}

/// Installation joined with its latest heartbeat.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallationInsight {
    /// Installation id.
    pub id: Uuid,
    /// Studio name, else company name.
    pub studio_name: Option<String>,
    /// Company name.
    pub company_name: Option<String>,
    /// Runtime state.
    pub app_status: AppStatus,
    /// License tier.
    pub license_tier: LicenseTier,
    /// License status.
    pub license_status: LicenseStatus,
    /// Version from the record, else the latest heartbeat.
    pub app_version: Option<String>,
    /// Environment from the record, else the latest heartbeat.
    pub environment: Option<String>,
    /// Primary IP.
    pub primary_ip: Option<String>,
    /// `payload.instanceName`, else the display name.
    pub instance_name: Option<String>,
    /// `payload.hostname`.
    pub hostname: Option<String>,
    /// Last seen, else the latest heartbeat time.
    pub last_seen_at: Option<DateTime<Utc>>,
    /// Seen within the freshness window.
    pub online: bool,
    /// Self-reported usage.
    pub metrics: UsageMetrics,
    /// Direct endpoint.
    pub endpoint_url: Option<String>,
    /// Linked booking id.
    pub booking_id: Option<String>,
    /// Linked booking email.
    pub booking_email: Option<String>,
    /// Seat limit.
    pub seats: Option<i32>,
}

impl InstallationInsight {
    /// Combine an installation with its latest heartbeat.
    pub fn build(
        inst: &Installation,
        latest: Option<&Heartbeat>,
        now: DateTime<Utc>,
        online_window: Duration,
    ) -> Self {
        let payload = latest.and_then(|hb| hb.payload.as_ref());
        let payload_str = |key: &str| {
            payload
                .and_then(|p| p.get(key))
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };

        let last_seen_at = inst.last_seen_at.or(latest.map(|hb| hb.received_at));
        let online = last_seen_at.is_some_and(|seen| now - seen <= online_window);

        Self {
            id: inst.id,
            studio_name: inst.display_name().map(str::to_string),
            company_name: non_empty(inst.company_name.as_deref()).map(str::to_string),
            app_status: inst.app_status,
            license_tier: inst.license_tier,
            license_status: inst.license_status,
            app_version: inst
                .app_version
                .clone()
                .or_else(|| latest.and_then(|hb| hb.app_version.clone())),
            environment: inst
                .environment
                .clone()
                .or_else(|| latest.and_then(|hb| hb.environment.clone())),
            primary_ip: inst.primary_ip.clone(),
            instance_name: payload_str("instanceName")
                .or_else(|| inst.display_name().map(str::to_string)),
            hostname: payload_str("hostname"),
            last_seen_at,
            online,
            metrics: UsageMetrics::from_payload(payload),
            endpoint_url: inst.metadata.endpoint_url.clone(),
            booking_id: inst.metadata.booking_id.clone(),
            booking_email: inst.metadata.booking_email.clone(),
            seats: inst.effective_seats(),
        }
    }
}

/// Fleet-wide counters for the admin dashboard.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Overview {
    /// All installations.
    pub installs_total: i64,
    /// Seen within the freshness window.
    pub installs_online: i64,
    /// Trials ending within three days (or already ended).
    pub trials_expiring: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_tier_period() {
        assert_eq!(LicenseTier::Trial.period(), Duration::days(14));
        assert_eq!(LicenseTier::Pro.period(), Duration::days(30));
        assert_eq!(LicenseTier::parse_lenient("PRO"), LicenseTier::Pro);
        assert_eq!(LicenseTier::parse_lenient("gold"), LicenseTier::Trial);
    }

    #[test]
    fn test_app_status_round_trip_names() {
        for status in [
            AppStatus::Provisioning,
            AppStatus::Pending,
            AppStatus::Running,
            AppStatus::Stopped,
        ] {
            assert_eq!(status.as_str().parse::<AppStatus>().unwrap(), status);
        }
        assert!("paused".parse::<AppStatus>().is_err());
    }

    #[test]
    fn test_usage_metrics_from_payload() {
        let payload = json!({
            "metrics": {"users": 4, "projects": "7", "storageUsedBytes": 1610612736u64}
        });
        let m = UsageMetrics::from_payload(Some(&payload));
        assert_eq!(m.users, 4);
        assert_eq!(m.projects, 7);
        assert_eq!(m.storage_used_gb, 1.5);

        let empty = UsageMetrics::from_payload(None);
        assert_eq!(empty, UsageMetrics::default());
    }

    #[test]
    fn test_insight_falls_back_to_heartbeat() {
        let mut inst = Installation::new(Uuid::new_v4());
        inst.company_name = Some("Acme".into());
        let now = Utc::now();
        let hb = Heartbeat {
            id: Uuid::new_v4(),
            installation_id: inst.id,
            ip_address: None,
            app_version: Some("1.2.0".into()),
            environment: Some("production".into()),
            payload: Some(json!({"hostname": "render-01"})),
            received_at: now - Duration::minutes(2),
        };

        let insight = InstallationInsight::build(&inst, Some(&hb), now, Duration::minutes(5));
        assert_eq!(insight.studio_name.as_deref(), Some("Acme"));
        assert_eq!(insight.instance_name.as_deref(), Some("Acme"));
        assert_eq!(insight.app_version.as_deref(), Some("1.2.0"));
        assert_eq!(insight.hostname.as_deref(), Some("render-01"));
        assert!(insight.online);

        let stale = InstallationInsight::build(&inst, Some(&hb), now, Duration::seconds(30));
        assert!(!stale.online);
    }

    #[test]
    fn test_insight_online_uses_record_last_seen() {
        let mut inst = Installation::new(Uuid::new_v4());
        let now = Utc::now();
        let window = Duration::minutes(5);

        assert!(!InstallationInsight::build(&inst, None, now, window).online);

        inst.last_seen_at = Some(now - window);
        assert!(InstallationInsight::build(&inst, None, now, window).online);

        inst.last_seen_at = Some(now - window - Duration::seconds(1));
        assert!(!InstallationInsight::build(&inst, None, now, window).online);
    }

    #[test]
    fn test_metadata_serializes_camel_case() {
        let meta = ProvisioningMetadata {
            db_name: Some("smood_abc123".into()),
            ..Default::default()
        };
        let v = serde_json::to_value(&meta).unwrap();
        assert_eq!(v["dbName"], "smood_abc123");
    }
}
