// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for smood-apps-client.

use thiserror::Error;

/// Result type using AppsClientError.
pub type Result<T> = std::result::Result<T, AppsClientError>;

/// Errors that can occur when talking to a tenant application.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AppsClientError {
    /// Configuration error (missing or invalid values).
    #[error("configuration error: {0}")]
    Config(String),

    /// Service credentials are not configured.
    #[error("apps service credentials are not configured")]
    MissingCredentials,

    /// Login succeeded at the HTTP level but returned no token.
    #[error("apps login failed: token missing")]
    TokenMissing,

    /// Transport failure (connect, timeout, body read).
    #[error("http error: {0}")]
    Http(String),

    /// Tenant application answered with a non-success status.
    #[error("unexpected status {status} from {url}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Request URL.
        url: String,
        /// Response body, as text.
        body: String,
    },

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl AppsClientError {
    /// Status code carried by this error, if the server answered.
    pub fn status(&self) -> Option<u16> {
        match self {
            AppsClientError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for AppsClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            AppsClientError::Serialization(err.to_string())
        } else {
            AppsClientError::Http(err.to_string())
        }
    }
}

impl From<serde_json::Error> for AppsClientError {
    fn from(err: serde_json::Error) -> Self {
        AppsClientError::Serialization(err.to_string())
    }
}
