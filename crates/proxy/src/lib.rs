// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Authgate proxy: a loopback reverse proxy that attaches a live access
//! token to every request it forwards to one fixed upstream.

pub mod config;
pub mod error;
pub mod forward;
pub mod server;

use std::sync::Arc;

use tracing::{error, info, warn};

use authgate::credential::oauth::HttpTransport;
use authgate::credential::refresh::RefreshCoordinator;
use authgate::credential::Credentials;
use authgate::error::{RefreshError, RELOGIN_HINT};

use crate::config::ProxyConfig;
pub use crate::server::{CredentialProxy, ProxyHandle, ProxyOptions};

/// Run the proxy until SIGINT or SIGTERM.
pub async fn run(config: ProxyConfig) -> anyhow::Result<()> {
    let mut refresh = config.auth.refresh_config(config.refresh_threshold());
    refresh.on_refreshed = Some(Arc::new(|creds: &Credentials| {
        info!(user = %creds.user_id, "credentials refreshed");
    }));
    refresh.on_expired = Some(Arc::new(|e: &RefreshError| {
        error!(err = %e, "credentials can no longer be refreshed; {RELOGIN_HINT}");
    }));

    let coordinator = RefreshCoordinator::new(config.auth.store(), Arc::new(HttpTransport::new()?), refresh);
    if !coordinator.store().has() {
        warn!(path = %coordinator.store().path().display(), "no stored credentials; requests get 401 until login");
    }

    let opts = ProxyOptions {
        upstream: config.upstream.clone(),
        port: config.port,
        upstream_timeout: config.upstream_timeout(),
    };
    let handle = CredentialProxy::start(opts, coordinator).await?;
    println!("AUTHGATE_PROXY_URL={}", handle.url());

    wait_for_signal().await;
    handle.stop().await;
    Ok(())
}

async fn wait_for_signal() {
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()).ok();
    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("received SIGINT"),
        _ = async {
            if let Some(ref mut s) = sigterm { s.recv().await } else { std::future::pending().await }
        } => info!("received SIGTERM"),
    }
}
