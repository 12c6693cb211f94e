// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Nginx + Certbot reverse proxy for tenant subdomains.
//!
//! The server block is piped to `sudo tee` on stdin, then Nginx is validated
//! and reloaded. A certificate is requested afterwards; a Certbot failure is
//! reported inside the outcome and does not fail the setup. Nothing here
//! returns an error: callers get a [`ProxySetupOutcome`] with `ok: false`.
//!
//! Requires passwordless sudo for `tee`, `nginx`, `systemctl` and `certbot`
//! on the host.

use std::path::PathBuf;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use regex::Regex;
use serde::Serialize;
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::runner::{CommandRunner, CommandSpec};

static SUBDOMAIN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9]([a-z0-9-]{0,61}[a-z0-9])?(\.[a-z0-9]([a-z0-9-]{0,61}[a-z0-9])?)+$")
        .expect("subdomain pattern is valid")
});

/// Check that `subdomain` is a lowercase DNS name with at least two labels.
pub fn validate_subdomain(subdomain: &str) -> Result<()> {
    if subdomain.len() <= 253 && SUBDOMAIN_RE.is_match(subdomain) {
        Ok(())
    } else {
        Err(Error::InvalidRequest(format!(
            "invalid subdomain '{}'",
            subdomain
        )))
    }
}

/// Nginx server block proxying `subdomain` to `127.0.0.1:<host_port>`.
pub fn render_server_block(subdomain: &str, host_port: u16) -> String {
    [
        "server {".to_string(),
        "  listen 80;".to_string(),
        format!("  server_name {};", subdomain),
        "  client_max_body_size 20m;".to_string(),
        String::new(),
        "  location / {".to_string(),
        format!("    proxy_pass http://127.0.0.1:{};", host_port),
        "    proxy_set_header Host $host;".to_string(),
        "    proxy_set_header X-Real-IP $remote_addr;".to_string(),
        "    proxy_set_header X-Forwarded-For $proxy_add_x_forwarded_for;".to_string(),
        "    proxy_set_header X-Forwarded-Proto $scheme;".to_string(),
        String::new(),
        "    proxy_http_version 1.1;".to_string(),
        "    proxy_set_header Upgrade $http_upgrade;".to_string(),
        "    proxy_set_header Connection \"upgrade\";".to_string(),
        "  }".to_string(),
        "}".to_string(),
        String::new(),
    ]
    .join("\n")
}

/// Reverse proxy settings.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Directory Nginx includes server blocks from.
    pub conf_dir: PathBuf,
    /// Prefix privileged commands with `sudo -n`.
    pub use_sudo: bool,
    /// Timeout per command (Certbot can be slow).
    pub command_timeout: Duration,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            conf_dir: PathBuf::from("/etc/nginx/conf.d"),
            use_sudo: true,
            command_timeout: Duration::from_secs(300),
        }
    }
}

/// Outcome of the Certbot step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CertbotOutcome {
    /// Certificate issued and Nginx reloaded.
    pub ok: bool,
    /// Failure detail.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Outcome of a reverse proxy setup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxySetupOutcome {
    /// Server block written and Nginx reloaded.
    pub ok: bool,
    /// Path of the written server block.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conf_path: Option<String>,
    /// Certbot step, present when the config step succeeded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub certbot: Option<CertbotOutcome>,
    /// Failure detail.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProxySetupOutcome {
    fn failed(error: impl ToString) -> Self {
        Self {
            ok: false,
            conf_path: None,
            certbot: None,
            error: Some(error.to_string()),
        }
    }
}

/// Writes Nginx server blocks and requests certificates.
pub struct ReverseProxy {
    runner: Arc<dyn CommandRunner>,
    config: ProxyConfig,
}

impl ReverseProxy {
    /// Create a configurator.
    pub fn new(runner: Arc<dyn CommandRunner>, config: ProxyConfig) -> Self {
        Self { runner, config }
    }

    /// Where the server block for `subdomain` lives.
    pub fn conf_path(&self, subdomain: &str) -> PathBuf {
        self.config.conf_dir.join(format!("apps-{}.conf", subdomain))
    }

    /// Expose `subdomain` on `host_port`. Never fails; see [`ProxySetupOutcome`].
    pub async fn setup(&self, subdomain: &str, host_port: u16) -> ProxySetupOutcome {
        if let Err(e) = validate_subdomain(subdomain) {
            return ProxySetupOutcome::failed(e);
        }

        let conf_path = match self.write_conf(subdomain, host_port).await {
            Ok(path) => path,
            Err(e) => {
                warn!(subdomain, error = %e, "Reverse proxy setup failed");
                return ProxySetupOutcome::failed(e);
            }
        };

        let certbot = self.ensure_certificate(subdomain).await;
        info!(
            subdomain,
            host_port,
            conf_path = %conf_path.display(),
            certificate = certbot.ok,
            "Reverse proxy configured"
        );

        ProxySetupOutcome {
            ok: true,
            conf_path: Some(conf_path.display().to_string()),
            certbot: Some(certbot),
            error: None,
        }
    }

    async fn write_conf(&self, subdomain: &str, host_port: u16) -> Result<PathBuf> {
        let path = self.conf_path(subdomain);
        let content = render_server_block(subdomain, host_port);

        let tee = self
            .privileged("tee")
            .arg(path.display().to_string())
            .stdin(content);
        self.runner.run(&tee).await?;
        self.validate_and_reload().await?;
        Ok(path)
    }

    async fn ensure_certificate(&self, subdomain: &str) -> CertbotOutcome {
        let certbot = self.privileged("certbot").args([
            "--nginx",
            "-d",
            subdomain,
            "--redirect",
            "--non-interactive",
            "--agree-tos",
        ]);

        let result = async {
            self.runner.run(&certbot).await?;
            self.validate_and_reload().await
        }
        .await;

        match result {
            Ok(()) => CertbotOutcome {
                ok: true,
                error: None,
            },
            Err(e) => {
                warn!(subdomain, error = %e, "Certificate request failed");
                CertbotOutcome {
                    ok: false,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    async fn validate_and_reload(&self) -> Result<()> {
        self.runner.run(&self.privileged("nginx").arg("-t")).await?;
        self.runner
            .run(&self.privileged("systemctl").args(["reload", "nginx"]))
            .await?;
        Ok(())
    }

    fn privileged(&self, program: &str) -> CommandSpec {
        let spec = if self.config.use_sudo {
            CommandSpec::new("sudo").args(["-n", program])
        } else {
            CommandSpec::new(program)
        };
        spec.timeout(self.config.command_timeout)
    }
}
