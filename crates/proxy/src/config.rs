// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::Duration;

use clap::Parser;

use authgate::config::{AuthArgs, LogArgs};

use crate::forward::Upstream;

/// Local credential-injecting reverse proxy for one upstream.
#[derive(Debug, Clone, Parser)]
#[command(name = "authgate-proxy", version, about)]
pub struct ProxyConfig {
    #[command(flatten)]
    pub auth: AuthArgs,

    #[command(flatten)]
    pub log: LogArgs,

    /// Upstream base URL; its path is kept as a prefix for every request.
    #[arg(long, env = "AUTHGATE_UPSTREAM_URL")]
    pub upstream: String,

    /// Loopback port to listen on (0 = OS assigned).
    #[arg(long, env = "AUTHGATE_PROXY_PORT", default_value = "0")]
    pub port: u16,

    /// Refresh tokens this many seconds before they expire.
    #[arg(long, env = "AUTHGATE_REFRESH_THRESHOLD_SECS", default_value = "60")]
    pub refresh_threshold_secs: u64,

    /// Per-request upstream timeout in seconds.
    #[arg(long, env = "AUTHGATE_UPSTREAM_TIMEOUT_SECS", default_value = "120")]
    pub upstream_timeout_secs: u64,
}

impl ProxyConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        self.auth.validate()?;
        self.log.validate()?;
        Upstream::parse(&self.upstream)?;
        if self.upstream_timeout_secs == 0 {
            anyhow::bail!("--upstream-timeout-secs must be greater than zero");
        }
        Ok(())
    }

    pub fn refresh_threshold(&self) -> Duration {
        Duration::from_secs(self.refresh_threshold_secs)
    }

    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_secs(self.upstream_timeout_secs)
    }
}
