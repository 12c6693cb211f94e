// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for smood-provisioner.

use serde::Serialize;
use thiserror::Error;

use crate::runner::RunnerError;

/// Provisioner errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Required configuration is missing or invalid for this operation.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// No free port left in the allocation range.
    #[error("No free port in range {start}-{end}")]
    Capacity {
        /// First port of the range.
        start: u16,
        /// Last port of the range.
        end: u16,
    },

    /// None of the tool chains needed for the operation is installed.
    #[error("{0}")]
    ToolNotFound(String),

    /// External command failed, timed out, or could not be spawned.
    #[error("Command error: {0}")]
    Command(#[from] RunnerError),

    /// A network operation did not finish in time.
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Installation or file was not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// A file name tried to escape its backup directory.
    #[error("Invalid file name: {0}")]
    PathTraversal(String),

    /// Request validation failed.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Schema migration failed.
    #[error("Migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    /// I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Tenant application API call failed.
    #[error("Apps API error: {0}")]
    Apps(#[from] smood_apps_client::AppsClientError),
}

/// Closed set of error categories callers can branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Missing or invalid configuration.
    Configuration,
    /// Port range exhausted.
    Capacity,
    /// Required tool missing.
    ToolNotFound,
    /// External command exited non-zero.
    ExternalCommand,
    /// External command or connection timed out.
    Timeout,
    /// Installation or file not found.
    NotFound,
    /// File name escaped its directory.
    PathTraversal,
    /// Caller sent an invalid request.
    InvalidRequest,
    /// Anything else (database, I/O, tenant API).
    Internal,
}

impl Error {
    /// Category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Configuration(_) => ErrorKind::Configuration,
            Error::Capacity { .. } => ErrorKind::Capacity,
            Error::ToolNotFound(_) | Error::Command(RunnerError::NotFound(_)) => {
                ErrorKind::ToolNotFound
            }
            Error::Command(RunnerError::Timeout { .. }) | Error::Timeout(_) => {
                ErrorKind::Timeout
            }
            Error::Command(_) => ErrorKind::ExternalCommand,
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::PathTraversal(_) => ErrorKind::PathTraversal,
            Error::InvalidRequest(_) => ErrorKind::InvalidRequest,
            Error::Database(_)
            | Error::Migrate(_)
            | Error::Io(_)
            | Error::Json(_)
            | Error::Apps(_) => ErrorKind::Internal,
        }
    }
}

/// Result type using provisioner Error.
pub type Result<T> = std::result::Result<T, Error>;
