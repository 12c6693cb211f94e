// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Tenant application HTTP client.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use reqwest::{Method, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::config::{AppsClientConfig, normalize_base_url};
use crate::error::{AppsClientError, Result};

/// A cached bearer token for one tenant base URL.
#[derive(Debug, Clone)]
pub struct CachedToken {
    /// Bearer token.
    pub token: String,
    /// When the token was obtained.
    pub obtained_at: DateTime<Utc>,
}

/// Bearer tokens keyed by normalized base URL.
///
/// Owned by a single [`AppsClient`]; two clients never share entries.
#[derive(Debug, Default)]
pub struct TokenCache {
    entries: RwLock<HashMap<String, CachedToken>>,
}

impl TokenCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached token for `base_url`, if any.
    pub async fn get(&self, base_url: &str) -> Option<CachedToken> {
        self.entries.read().await.get(base_url).cloned()
    }

    /// Store a token for `base_url`, replacing any previous one.
    pub async fn insert(&self, base_url: &str, token: String) {
        self.entries.write().await.insert(
            base_url.to_string(),
            CachedToken {
                token,
                obtained_at: Utc::now(),
            },
        );
    }

    /// Drop the token for `base_url`.
    pub async fn invalidate(&self, base_url: &str) {
        self.entries.write().await.remove(base_url);
    }

    /// Number of cached tokens.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Whether the cache is empty.
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[derive(Serialize)]
struct LoginRequest<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Deserialize)]
struct LoginResponse {
    token: Option<String>,
}

/// Client for tenant application APIs.
///
/// Logs in with the service account on first use per base URL, caches the
/// token, and retries exactly once with a fresh login when a request is
/// rejected with 401.
pub struct AppsClient {
    http: reqwest::Client,
    config: AppsClientConfig,
    tokens: TokenCache,
}

impl AppsClient {
    /// Create a client from an explicit configuration.
    pub fn new(config: AppsClientConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| AppsClientError::Config(format!("failed to build http client: {}", e)))?;

        Ok(Self {
            http,
            config,
            tokens: TokenCache::new(),
        })
    }

    /// Create a client configured from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::new(AppsClientConfig::from_env()?)
    }

    /// The configuration this client was built with.
    pub fn config(&self) -> &AppsClientConfig {
        &self.config
    }

    /// The token cache owned by this client.
    pub fn token_cache(&self) -> &TokenCache {
        &self.tokens
    }

    /// Log in against `base_url` and cache the returned token.
    pub async fn login(&self, base_url: &str) -> Result<String> {
        let base = normalize_base_url(base_url);
        let (Some(username), Some(password)) =
            (self.config.username.as_deref(), self.config.password.as_deref())
        else {
            warn!(
                username_set = self.config.username.is_some(),
                password_set = self.config.password.is_some(),
                "Apps service credentials not configured"
            );
            return Err(AppsClientError::MissingCredentials);
        };

        let url = format!("{}/api/auth/login", base);
        debug!(base_url = %base, username = %username, "Logging in to tenant application");

        let resp = self
            .http
            .post(&url)
            .json(&LoginRequest { username, password })
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            warn!(base_url = %base, status = status.as_u16(), "Tenant application login failed");
            return Err(AppsClientError::Status {
                status: status.as_u16(),
                url,
                body,
            });
        }

        let login: LoginResponse = resp.json().await?;
        let token = login
            .token
            .filter(|t| !t.is_empty())
            .ok_or(AppsClientError::TokenMissing)?;

        self.tokens.insert(&base, token.clone()).await;
        Ok(token)
    }

    async fn ensure_token(&self, base: &str) -> Result<String> {
        match self.tokens.get(base).await {
            Some(cached) => Ok(cached.token),
            None => self.login(base).await,
        }
    }

    /// Send an authenticated request to `path` on the default base URL.
    pub async fn request(&self, method: Method, path: &str, body: Option<&Value>) -> Result<Value> {
        let base = self.config.default_base_url.clone();
        self.request_to(&base, method, path, body).await
    }

    /// Send an authenticated request to `path` on a specific tenant.
    ///
    /// An empty `base_url` falls back to the default base URL.
    pub async fn request_to(
        &self,
        base_url: &str,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<Value> {
        let base = if base_url.is_empty() {
            self.config.default_base_url.clone()
        } else {
            normalize_base_url(base_url)
        };
        let url = if path.starts_with('/') {
            format!("{}{}", base, path)
        } else {
            format!("{}/{}", base, path)
        };

        let token = self.ensure_token(&base).await?;
        let resp = self.send(method.clone(), &url, &token, body).await?;

        let resp = if resp.status() == StatusCode::UNAUTHORIZED {
            debug!(base_url = %base, "Token rejected, logging in again");
            self.tokens.invalidate(&base).await;
            let token = self.login(&base).await?;
            self.send(method, &url, &token, body).await?
        } else {
            resp
        };

        read_json(resp, url).await
    }

    /// Push the seat limit to a tenant (`PATCH /api/settings {maxUsers}`).
    pub async fn update_max_users(&self, base_url: &str, seats: u32) -> Result<Value> {
        let body = serde_json::json!({ "maxUsers": seats });
        self.request_to(base_url, Method::PATCH, "/api/settings", Some(&body))
            .await
    }

    async fn send(
        &self,
        method: Method,
        url: &str,
        token: &str,
        body: Option<&Value>,
    ) -> Result<reqwest::Response> {
        let mut req = self.http.request(method, url).bearer_auth(token);
        if let Some(body) = body {
            req = req.json(body);
        }
        Ok(req.send().await?)
    }
}

async fn read_json(resp: reqwest::Response, url: String) -> Result<Value> {
    let status = resp.status();
    let text = resp.text().await?;

    if !status.is_success() {
        return Err(AppsClientError::Status {
            status: status.as_u16(),
            url,
            body: text,
        });
    }

    if text.trim().is_empty() {
        return Ok(Value::Null);
    }
    Ok(serde_json::from_str(&text)?)
}
