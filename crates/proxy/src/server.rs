// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Loopback listener, accept loop, and shutdown.

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::Router;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use hyper_util::server::graceful::GracefulShutdown;
use hyper_util::service::TowerToHyperService;
use tokio::net::TcpListener;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use authgate::credential::refresh::RefreshCoordinator;

use crate::forward::{proxy_request, ProxyState, Upstream};

/// Bind attempts before giving up: the requested port, then OS-assigned ports.
pub const MAX_BIND_ATTEMPTS: u32 = 3;

/// How long `stop` lets open connections drain before closing them.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

pub const DEFAULT_UPSTREAM_TIMEOUT: Duration = Duration::from_secs(120);

/// Proxy startup options.
#[derive(Debug, Clone)]
pub struct ProxyOptions {
    pub upstream: String,
    /// Requested loopback port; 0 lets the OS choose.
    pub port: u16,
    pub upstream_timeout: Duration,
}

impl ProxyOptions {
    pub fn new(upstream: impl Into<String>) -> Self {
        Self { upstream: upstream.into(), port: 0, upstream_timeout: DEFAULT_UPSTREAM_TIMEOUT }
    }
}

/// Credential-injecting reverse proxy for one upstream.
pub struct CredentialProxy;

impl CredentialProxy {
    /// Bind `127.0.0.1` and start serving in the background.
    pub async fn start(opts: ProxyOptions, coordinator: Arc<RefreshCoordinator>) -> anyhow::Result<ProxyHandle> {
        let upstream = Upstream::parse(&opts.upstream)?;
        let state = Arc::new(ProxyState::new(upstream, Arc::clone(&coordinator), opts.upstream_timeout)?);
        let router = build_router(state);

        let listener = bind_loopback(opts.port).await?;
        let port = listener.local_addr()?.port();
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(serve(listener, router, shutdown.clone()));

        info!(port, upstream = %opts.upstream, "credential proxy listening");
        Ok(ProxyHandle { port, shutdown, task: Some(task), coordinator })
    }
}

pub fn build_router(state: Arc<ProxyState>) -> Router {
    Router::new().fallback(proxy_request).with_state(state).layer(TraceLayer::new_for_http())
}

/// Bind the requested port, falling back to OS-assigned ports while the
/// address is in use.
async fn bind_loopback(port: u16) -> anyhow::Result<TcpListener> {
    let mut candidate = port;
    let mut attempt = 1;
    loop {
        match TcpListener::bind((Ipv4Addr::LOCALHOST, candidate)).await {
            Ok(listener) => return Ok(listener),
            Err(e) if e.kind() == std::io::ErrorKind::AddrInUse && attempt < MAX_BIND_ATTEMPTS => {
                warn!(port = candidate, attempt, "port in use, retrying on an OS-assigned port");
                candidate = 0;
                attempt += 1;
            }
            Err(e) => return Err(e).with_context(|| format!("bind 127.0.0.1:{candidate}")),
        }
    }
}

async fn serve(listener: TcpListener, router: Router, shutdown: CancellationToken) {
    let builder = auto::Builder::new(TokioExecutor::new());
    let graceful = GracefulShutdown::new();
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            accept = listener.accept() => match accept {
                Ok((stream, peer)) => {
                    let io = TokioIo::new(stream);
                    let svc = TowerToHyperService::new(router.clone());
                    let conn = graceful.watch(builder.serve_connection_with_upgrades(io, svc).into_owned());
                    connections.spawn(async move {
                        if let Err(e) = conn.await {
                            debug!(%peer, err = %e, "connection ended with error");
                        }
                    });
                }
                Err(e) => debug!(err = %e, "accept failed"),
            },
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
        }
    }

    drop(listener);
    tokio::select! {
        _ = graceful.shutdown() => debug!("connections drained"),
        _ = tokio::time::sleep(SHUTDOWN_GRACE) => {
            warn!(open = connections.len(), "closing connections still open after grace period");
        }
    }
    connections.abort_all();
}

/// Handle to a running proxy. Dropping it stops accepting connections.
pub struct ProxyHandle {
    port: u16,
    shutdown: CancellationToken,
    task: Option<JoinHandle<()>>,
    coordinator: Arc<RefreshCoordinator>,
}

impl ProxyHandle {
    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn url(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }

    /// Reset refresh state, close the listener, and wait for connections
    /// to drain (bounded by [`SHUTDOWN_GRACE`]).
    pub async fn stop(mut self) {
        self.coordinator.reset();
        self.shutdown.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(err = %e, "proxy server task failed");
            }
        }
        info!(port = self.port, "credential proxy stopped");
    }
}

impl Drop for ProxyHandle {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
