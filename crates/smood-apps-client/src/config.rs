// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration for the apps client.

use std::time::Duration;

use crate::error::{AppsClientError, Result};

/// Default tenant API base URL.
pub const DEFAULT_APPS_API_URL: &str = "http://localhost:8000";

/// Configuration for the [`AppsClient`](crate::AppsClient).
#[derive(Debug, Clone)]
pub struct AppsClientConfig {
    /// Base URL used by [`AppsClient::request`](crate::AppsClient::request).
    pub default_base_url: String,
    /// Service account username.
    pub username: Option<String>,
    /// Service account password.
    pub password: Option<String>,
    /// Per-request timeout.
    pub request_timeout: Duration,
}

impl Default for AppsClientConfig {
    fn default() -> Self {
        Self {
            default_base_url: DEFAULT_APPS_API_URL.to_string(),
            username: None,
            password: None,
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl AppsClientConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a configuration from environment variables.
    ///
    /// Environment variables:
    /// - `APPS_API_URL`: default tenant API base URL (default: "http://localhost:8000")
    /// - `APPS_SERVICE_USERNAME` or `APPS_USERNAME`: service account username
    /// - `APPS_SERVICE_PASSWORD` or `APPS_PASSWORD`: service account password
    /// - `APPS_REQUEST_TIMEOUT_MS`: request timeout in milliseconds (default: 30000)
    pub fn from_env() -> Result<Self> {
        let default_base_url = std::env::var("APPS_API_URL")
            .ok()
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_APPS_API_URL.to_string());

        let username = std::env::var("APPS_SERVICE_USERNAME")
            .or_else(|_| std::env::var("APPS_USERNAME"))
            .ok()
            .filter(|v| !v.is_empty());

        let password = std::env::var("APPS_SERVICE_PASSWORD")
            .or_else(|_| std::env::var("APPS_PASSWORD"))
            .ok()
            .filter(|v| !v.is_empty());

        let request_timeout_ms: u64 = std::env::var("APPS_REQUEST_TIMEOUT_MS")
            .unwrap_or_else(|_| "30000".to_string())
            .parse()
            .map_err(|e| AppsClientError::Config(format!("invalid APPS_REQUEST_TIMEOUT_MS: {}", e)))?;

        Ok(Self {
            default_base_url: normalize_base_url(&default_base_url),
            username,
            password,
            request_timeout: Duration::from_millis(request_timeout_ms),
        })
    }

    /// Set the default base URL.
    pub fn with_default_base_url(mut self, url: impl AsRef<str>) -> Self {
        self.default_base_url = normalize_base_url(url.as_ref());
        self
    }

    /// Set the service account credentials.
    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    /// Set the request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Whether both username and password are present.
    pub fn has_credentials(&self) -> bool {
        self.username.is_some() && self.password.is_some()
    }
}

/// Strip a single trailing slash so cache keys are stable.
pub(crate) fn normalize_base_url(url: &str) -> String {
    url.strip_suffix('/').unwrap_or(url).to_string()
}
