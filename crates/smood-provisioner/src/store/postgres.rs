// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! PostgreSQL-backed [`InstallationStore`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::PgPool;
use sqlx::types::Json;
use uuid::Uuid;

use super::{InstallationStore, OverviewWindow};
use crate::error::{Error, Result};
use crate::model::{
    Heartbeat, Installation, LicenseTier, NewHeartbeat, Overview, ProvisioningMetadata,
};

const INSTALLATION_COLUMNS: &str = r#"
    id, company_name, studio_name, primary_ip, country, city, address,
    contact_name, contact_email, license_key, app_version, environment,
    subdomain, app_status, license_tier, license_status, trial_started_at,
    trial_ends_at, seats, metadata, last_seen_at, created_at, updated_at
"#;

#[derive(Debug, Clone, sqlx::FromRow)]
struct InstallationRow {
    id: Uuid,
    company_name: Option<String>,
    studio_name: Option<String>,
    primary_ip: Option<String>,
    country: Option<String>,
    city: Option<String>,
    address: Option<String>,
    contact_name: Option<String>,
    contact_email: Option<String>,
    license_key: Option<String>,
    app_version: Option<String>,
    environment: Option<String>,
    subdomain: Option<String>,
    app_status: String,
    license_tier: String,
    license_status: String,
    trial_started_at: Option<DateTime<Utc>>,
    trial_ends_at: Option<DateTime<Utc>>,
    seats: Option<i32>,
    metadata: Json<ProvisioningMetadata>,
    last_seen_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<InstallationRow> for Installation {
    type Error = Error;

    fn try_from(row: InstallationRow) -> Result<Self> {
        Ok(Installation {
            id: row.id,
            company_name: row.company_name,
            studio_name: row.studio_name,
            primary_ip: row.primary_ip,
            country: row.country,
            city: row.city,
            address: row.address,
            contact_name: row.contact_name,
            contact_email: row.contact_email,
            license_key: row.license_key,
            app_version: row.app_version,
            environment: row.environment,
            subdomain: row.subdomain,
            app_status: row.app_status.parse()?,
            license_tier: LicenseTier::parse_lenient(&row.license_tier),
            license_status: row.license_status.parse()?,
            trial_started_at: row.trial_started_at,
            trial_ends_at: row.trial_ends_at,
            seats: row.seats,
            metadata: row.metadata.0,
            last_seen_at: row.last_seen_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct HeartbeatRow {
    id: Uuid,
    installation_id: Uuid,
    ip_address: Option<String>,
    app_version: Option<String>,
    environment: Option<String>,
    payload: Option<Json<Value>>,
    received_at: DateTime<Utc>,
}

impl From<HeartbeatRow> for Heartbeat {
    fn from(row: HeartbeatRow) -> Self {
        Heartbeat {
            id: row.id,
            installation_id: row.installation_id,
            ip_address: row.ip_address,
            app_version: row.app_version,
            environment: row.environment,
            payload: row.payload.map(|p| p.0),
            received_at: row.received_at,
        }
    }
}

/// [`InstallationStore`] over a PostgreSQL pool.
#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Create a store. Run [`crate::migrations::run`] first.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// The underlying pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn fetch_one_where(&self, clause: &str, value: &str) -> Result<Option<Installation>> {
        let sql = format!(
            "SELECT {} FROM installations WHERE {} ORDER BY created_at DESC LIMIT 1",
            INSTALLATION_COLUMNS, clause
        );
        let row: Option<InstallationRow> = sqlx::query_as(&sql)
            .bind(value)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Installation::try_from).transpose()
    }
}

#[async_trait]
impl InstallationStore for PostgresStore {
    async fn insert(&self, inst: &Installation) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO installations (
                id, company_name, studio_name, primary_ip, country, city, address,
                contact_name, contact_email, license_key, app_version, environment,
                subdomain, app_status, license_tier, license_status, trial_started_at,
                trial_ends_at, seats, metadata, last_seen_at, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15,
                    $16, $17, $18, $19, $20, $21, $22, $23)
            "#,
        )
        .bind(inst.id)
        .bind(&inst.company_name)
        .bind(&inst.studio_name)
        .bind(&inst.primary_ip)
        .bind(&inst.country)
        .bind(&inst.city)
        .bind(&inst.address)
        .bind(&inst.contact_name)
        .bind(&inst.contact_email)
        .bind(&inst.license_key)
        .bind(&inst.app_version)
        .bind(&inst.environment)
        .bind(&inst.subdomain)
        .bind(inst.app_status.as_str())
        .bind(inst.license_tier.as_str())
        .bind(inst.license_status.as_str())
        .bind(inst.trial_started_at)
        .bind(inst.trial_ends_at)
        .bind(inst.seats)
        .bind(Json(&inst.metadata))
        .bind(inst.last_seen_at)
        .bind(inst.created_at)
        .bind(inst.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Installation>> {
        let sql = format!("SELECT {} FROM installations WHERE id = $1", INSTALLATION_COLUMNS);
        let row: Option<InstallationRow> = sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Installation::try_from).transpose()
    }

    async fn update(&self, inst: &Installation) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE installations SET
                company_name = $2, studio_name = $3, primary_ip = $4, country = $5,
                city = $6, address = $7, contact_name = $8, contact_email = $9,
                license_key = $10, app_version = $11, environment = $12, subdomain = $13,
                app_status = $14, license_tier = $15, license_status = $16,
                trial_started_at = $17, trial_ends_at = $18, seats = $19, metadata = $20,
                last_seen_at = $21, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(inst.id)
        .bind(&inst.company_name)
        .bind(&inst.studio_name)
        .bind(&inst.primary_ip)
        .bind(&inst.country)
        .bind(&inst.city)
        .bind(&inst.address)
        .bind(&inst.contact_name)
        .bind(&inst.contact_email)
        .bind(&inst.license_key)
        .bind(&inst.app_version)
        .bind(&inst.environment)
        .bind(&inst.subdomain)
        .bind(inst.app_status.as_str())
        .bind(inst.license_tier.as_str())
        .bind(inst.license_status.as_str())
        .bind(inst.trial_started_at)
        .bind(inst.trial_ends_at)
        .bind(inst.seats)
        .bind(Json(&inst.metadata))
        .bind(inst.last_seen_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete(&self, id: Uuid) -> Result<bool> {
        // Heartbeats go with the row (ON DELETE CASCADE).
        let result = sqlx::query("DELETE FROM installations WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_recent(&self, limit: i64) -> Result<Vec<Installation>> {
        let sql = format!(
            "SELECT {} FROM installations ORDER BY updated_at DESC LIMIT $1",
            INSTALLATION_COLUMNS
        );
        let rows: Vec<InstallationRow> = sqlx::query_as(&sql)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(Installation::try_from).collect()
    }

    async fn list_after(&self, after: Option<Uuid>, limit: i64) -> Result<Vec<Installation>> {
        let sql = format!(
            r#"
            SELECT {} FROM installations
            WHERE $1::uuid IS NULL OR id > $1
            ORDER BY id
            LIMIT $2
            "#,
            INSTALLATION_COLUMNS
        );
        let rows: Vec<InstallationRow> = sqlx::query_as(&sql)
            .bind(after)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(Installation::try_from).collect()
    }

    async fn find_by_license_key(&self, license_key: &str) -> Result<Option<Installation>> {
        self.fetch_one_where("license_key = $1", license_key).await
    }

    async fn find_by_primary_ip(&self, primary_ip: &str) -> Result<Option<Installation>> {
        self.fetch_one_where("primary_ip = $1", primary_ip).await
    }

    async fn find_by_contact(&self, contact_email: &str, name: &str) -> Result<Option<Installation>> {
        let sql = format!(
            r#"
            SELECT {} FROM installations
            WHERE contact_email = $1 AND (studio_name = $2 OR company_name = $2)
            ORDER BY created_at DESC
            LIMIT 1
            "#,
            INSTALLATION_COLUMNS
        );
        let row: Option<InstallationRow> = sqlx::query_as(&sql)
            .bind(contact_email)
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Installation::try_from).transpose()
    }

    async fn find_by_booking_id(&self, booking_id: &str) -> Result<Option<Installation>> {
        self.fetch_one_where("metadata->>'bookingId' = $1", booking_id).await
    }

    async fn insert_heartbeat(&self, installation_id: Uuid, heartbeat: &NewHeartbeat) -> Result<Heartbeat> {
        let row: HeartbeatRow = sqlx::query_as(
            r#"
            INSERT INTO installation_heartbeats
                (id, installation_id, ip_address, app_version, environment, payload, received_at)
            VALUES ($1, $2, $3, $4, $5, $6, NOW())
            RETURNING id, installation_id, ip_address, app_version, environment, payload, received_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(installation_id)
        .bind(&heartbeat.ip_address)
        .bind(&heartbeat.app_version)
        .bind(&heartbeat.environment)
        .bind(heartbeat.payload.as_ref().map(Json))
        .fetch_one(&self.pool)
        .await?;
        Ok(row.into())
    }

    async fn latest_heartbeat(&self, installation_id: Uuid) -> Result<Option<Heartbeat>> {
        let row: Option<HeartbeatRow> = sqlx::query_as(
            r#"
            SELECT id, installation_id, ip_address, app_version, environment, payload, received_at
            FROM installation_heartbeats
            WHERE installation_id = $1
            ORDER BY received_at DESC
            LIMIT 1
            "#,
        )
        .bind(installation_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Heartbeat::from))
    }

    async fn list_heartbeats(&self, installation_id: Uuid, limit: i64) -> Result<Vec<Heartbeat>> {
        let rows: Vec<HeartbeatRow> = sqlx::query_as(
            r#"
            SELECT id, installation_id, ip_address, app_version, environment, payload, received_at
            FROM installation_heartbeats
            WHERE installation_id = $1
            ORDER BY received_at DESC
            LIMIT $2
            "#,
        )
        .bind(installation_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Heartbeat::from).collect())
    }

    async fn overview(&self, window: OverviewWindow) -> Result<Overview> {
        let (installs_total, installs_online, trials_expiring): (i64, i64, i64) = sqlx::query_as(
            r#"
            SELECT
                COUNT(*),
                COUNT(*) FILTER (WHERE last_seen_at >= $1),
                COUNT(*) FILTER (WHERE license_tier = 'trial' AND trial_ends_at <= $2)
            FROM installations
            "#,
        )
        .bind(window.online_since)
        .bind(window.trial_ends_before)
        .fetch_one(&self.pool)
        .await?;

        Ok(Overview {
            installs_total,
            installs_online,
            trials_expiring,
        })
    }

    async fn health_check(&self) -> Result<bool> {
        let one: i32 = sqlx::query_scalar("SELECT 1").fetch_one(&self.pool).await?;
        Ok(one == 1)
    }
}
