// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::command::login::LoginArgs;
use crate::command::status::StatusArgs;
use crate::credential::device_code::DEFAULT_SCOPES;
use crate::credential::persist::CredentialStore;
use crate::credential::refresh::RefreshConfig;

pub const DEFAULT_PROVIDER_DOMAIN: &str = "https://auth.authgate.dev";
pub const DEFAULT_CLIENT_ID: &str = "authgate-cli";

/// Identity provider and credential file settings, shared by every binary.
#[derive(Debug, Clone, clap::Args)]
pub struct AuthArgs {
    /// Identity provider base URL.
    #[arg(long, env = "AUTHGATE_PROVIDER_DOMAIN", default_value = DEFAULT_PROVIDER_DOMAIN)]
    pub provider_domain: String,

    /// OAuth client identifier.
    #[arg(long, env = "AUTHGATE_CLIENT_ID", default_value = DEFAULT_CLIENT_ID)]
    pub client_id: String,

    /// OAuth scope to request (repeatable; env is comma separated).
    #[arg(long = "scope", env = "AUTHGATE_SCOPES", value_delimiter = ',')]
    pub scopes: Vec<String>,

    /// Credential file location [default: $HOME/.authgate/credentials.json].
    #[arg(long, env = "AUTHGATE_CREDENTIALS_PATH")]
    pub credentials_path: Option<PathBuf>,
}

impl AuthArgs {
    /// Provider domain without a trailing slash.
    pub fn provider_domain(&self) -> &str {
        self.provider_domain.trim_end_matches('/')
    }

    pub fn scopes(&self) -> Vec<String> {
        let scopes: Vec<String> =
            self.scopes.iter().map(|s| s.trim()).filter(|s| !s.is_empty()).map(str::to_owned).collect();
        if scopes.is_empty() {
            DEFAULT_SCOPES.iter().map(|s| (*s).to_owned()).collect()
        } else {
            scopes
        }
    }

    pub fn credentials_path(&self) -> PathBuf {
        self.credentials_path.clone().unwrap_or_else(crate::credential::default_credentials_path)
    }

    pub fn store(&self) -> CredentialStore {
        CredentialStore::new(self.credentials_path())
    }

    pub fn refresh_config(&self, threshold: Duration) -> RefreshConfig {
        let mut config = RefreshConfig::new(self.provider_domain(), &self.client_id);
        config.threshold = threshold;
        config
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        let raw = self.provider_domain.trim();
        let url = reqwest::Url::parse(raw)
            .map_err(|e| anyhow::anyhow!("--provider-domain must be an http(s) URL ({e}), got {raw:?}"))?;
        if !matches!(url.scheme(), "http" | "https") {
            anyhow::bail!("--provider-domain must be an http(s) URL, got {raw:?}");
        }
        if self.client_id.trim().is_empty() {
            anyhow::bail!("--client-id must not be empty");
        }
        if self.credentials_path.as_ref().is_some_and(|p| p.as_os_str().is_empty()) {
            anyhow::bail!("--credentials-path must not be empty");
        }
        Ok(())
    }
}

/// Logging flags. Logs always go to stderr.
#[derive(Debug, Clone, clap::Args)]
pub struct LogArgs {
    /// Log level or filter directive (trace, debug, info, warn, error).
    #[arg(long, env = "AUTHGATE_LOG_LEVEL")]
    pub log_level: Option<String>,

    /// Log format (text or json).
    #[arg(long, env = "AUTHGATE_LOG_FORMAT", default_value = "text")]
    pub log_format: String,
}

impl LogArgs {
    pub fn validate(&self) -> anyhow::Result<()> {
        match self.log_format.as_str() {
            "text" | "json" => Ok(()),
            other => anyhow::bail!("invalid log format: {other} (expected text or json)"),
        }
    }

    /// Install the global subscriber. Later calls are no-ops.
    pub fn init(&self, default_level: &str) {
        use tracing_subscriber::fmt;
        use tracing_subscriber::EnvFilter;

        let level = self.log_level.as_deref().unwrap_or(default_level);
        let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new(default_level));

        let builder = fmt::fmt().with_env_filter(filter).with_writer(std::io::stderr);
        let _ = match self.log_format.as_str() {
            "json" => builder.json().try_init(),
            _ => builder.try_init(),
        };
    }
}

/// Headless login and credential management.
#[derive(Debug, Parser)]
#[command(name = "authgate", version, about)]
pub struct Config {
    #[command(flatten)]
    pub auth: AuthArgs,

    #[command(flatten)]
    pub log: LogArgs,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, clap::Subcommand)]
pub enum Command {
    /// Sign in with the device authorization flow.
    Login(LoginArgs),
    /// Remove stored credentials.
    Logout,
    /// Show the stored session.
    Status(StatusArgs),
    /// Print a live access token, refreshing it if needed.
    Token,
}

impl Config {
    pub fn validate(&self) -> anyhow::Result<()> {
        self.auth.validate()?;
        self.log.validate()?;
        if let Command::Login(ref args) = self.command {
            if args.timeout_secs == 0 {
                anyhow::bail!("--timeout-secs must be greater than zero");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
