// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Smood Apps Client
//!
//! HTTP client for the API exposed by each provisioned tenant application.
//!
//! Every tenant runs its own application instance with its own users, so the
//! client authenticates per base URL with a service account and keeps the
//! resulting bearer tokens in a [`TokenCache`] owned by the client instance.
//! A request rejected with 401 triggers one fresh login and one retry.
//!
//! # Example
//!
//! ```no_run
//! use smood_apps_client::{AppsClient, AppsClientConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = AppsClientConfig::new().with_credentials("svc", "secret");
//! let client = AppsClient::new(config)?;
//!
//! client.update_max_users("http://apps.example.com:9001", 25).await?;
//! # Ok(())
//! # }
//! ```

mod client;
mod config;
mod error;

pub use client::{AppsClient, CachedToken, TokenCache};
pub use config::{AppsClientConfig, DEFAULT_APPS_API_URL};
pub use error::{AppsClientError, Result};
pub use reqwest::Method;
