// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Host port allocation for tenant containers.
//!
//! A port is "free" if a listening socket can be bound to it right now. The
//! socket is released immediately, so nothing stops another process from
//! claiming the port before the container runtime binds it. That window is
//! accepted; there is no reservation and no re-check before `docker run`.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use serde::Serialize;
use tokio::net::TcpListener;
use tracing::debug;

use crate::error::{Error, Result};

/// Inclusive port range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PortRange {
    /// First port.
    pub start: u16,
    /// Last port (inclusive).
    pub end: u16,
}

impl Default for PortRange {
    fn default() -> Self {
        Self {
            start: 9000,
            end: 9999,
        }
    }
}

impl PortRange {
    /// Create a range, rejecting empty or zero-based ranges.
    pub fn new(start: u16, end: u16) -> Result<Self> {
        if start == 0 || start > end {
            return Err(Error::Configuration(format!(
                "invalid port range {}-{}",
                start, end
            )));
        }
        Ok(Self { start, end })
    }

    /// Whether `port` is inside the range.
    pub fn contains(&self, port: u16) -> bool {
        (self.start..=self.end).contains(&port)
    }
}

/// Finds free TCP ports on the host.
#[derive(Debug, Clone)]
pub struct PortAllocator {
    range: PortRange,
    bind_host: IpAddr,
}

impl PortAllocator {
    /// Allocator probing `range` on all interfaces.
    pub fn new(range: PortRange) -> Self {
        Self {
            range,
            bind_host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        }
    }

    /// Probe on a specific address instead of `0.0.0.0`.
    pub fn with_bind_host(mut self, host: IpAddr) -> Self {
        self.bind_host = host;
        self
    }

    /// The configured range.
    pub fn range(&self) -> PortRange {
        self.range
    }

    /// Whether `port` can be bound right now.
    pub async fn is_port_free(&self, port: u16) -> bool {
        match TcpListener::bind(SocketAddr::new(self.bind_host, port)).await {
            Ok(listener) => {
                drop(listener);
                true
            }
            Err(_) => false,
        }
    }

    /// First free port in ascending order.
    pub async fn find_free_port(&self) -> Result<u16> {
        for port in self.range.start..=self.range.end {
            if self.is_port_free(port).await {
                debug!(port, "Allocated host port");
                return Ok(port);
            }
        }
        Err(Error::Capacity {
            start: self.range.start,
            end: self.range.end,
        })
    }
}
