// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Refresh coordinator: hands out live access tokens and keeps at most one
//! refresh in flight.
//!
//! Decision table for [`RefreshCoordinator::access_token`]:
//!
//! | stored token                      | result                                  |
//! |-----------------------------------|-----------------------------------------|
//! | fresh, outside the window         | stored token, no network                |
//! | valid, inside the window          | stored token now, refresh in background |
//! | expired, refresh token present    | wait for the shared refresh, re-read    |
//! | expired, no refresh token         | `SessionExpired`                        |
//! | none                              | `NotLoggedIn`                           |

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::credential::oauth::{self, Endpoints, FormTransport, TokenResponse};
use crate::credential::persist::CredentialStore;
use crate::credential::{epoch_ms, Credentials};
use crate::error::{CredentialError, RefreshError};

/// Tokens closer than this to expiry are refreshed proactively.
pub const DEFAULT_REFRESH_THRESHOLD: Duration = Duration::from_secs(60);

/// Consecutive transient failures before the session counts as expired.
pub const MAX_CONSECUTIVE_FAILURES: u32 = 3;

pub type RefreshedCallback = Arc<dyn Fn(&Credentials) + Send + Sync>;
pub type ExpiredCallback = Arc<dyn Fn(&RefreshError) + Send + Sync>;

/// Provider identity, refresh window, and lifecycle callbacks.
#[derive(Clone)]
pub struct RefreshConfig {
    pub provider_domain: String,
    pub client_id: String,
    pub threshold: Duration,
    /// Called after every successful refresh.
    pub on_refreshed: Option<RefreshedCallback>,
    /// Called when credentials can no longer be refreshed and a new login is required.
    pub on_expired: Option<ExpiredCallback>,
}

impl RefreshConfig {
    pub fn new(provider_domain: &str, client_id: &str) -> Self {
        Self {
            provider_domain: provider_domain.to_owned(),
            client_id: client_id.to_owned(),
            threshold: DEFAULT_REFRESH_THRESHOLD,
            on_refreshed: None,
            on_expired: None,
        }
    }
}

type SharedRefresh = Shared<BoxFuture<'static, Result<(), RefreshError>>>;

struct InFlight {
    generation: u64,
    future: SharedRefresh,
}

struct RefreshState {
    in_flight: Option<InFlight>,
    next_generation: u64,
    failures: u32,
    cancel: CancellationToken,
}

/// Owns the refresh state for one process (or one test).
pub struct RefreshCoordinator {
    store: CredentialStore,
    transport: Arc<dyn FormTransport>,
    endpoints: Endpoints,
    config: RefreshConfig,
    state: Mutex<RefreshState>,
}

impl RefreshCoordinator {
    pub fn new(store: CredentialStore, transport: Arc<dyn FormTransport>, config: RefreshConfig) -> Arc<Self> {
        Arc::new(Self {
            endpoints: Endpoints::for_domain(&config.provider_domain),
            store,
            transport,
            config,
            state: Mutex::new(RefreshState {
                in_flight: None,
                next_generation: 0,
                failures: 0,
                cancel: CancellationToken::new(),
            }),
        })
    }

    pub fn store(&self) -> &CredentialStore {
        &self.store
    }

    pub fn config(&self) -> &RefreshConfig {
        &self.config
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.state.lock().failures
    }

    pub fn is_refreshing(&self) -> bool {
        self.state.lock().in_flight.is_some()
    }

    /// Return a usable access token, refreshing if needed.
    pub async fn access_token(self: &Arc<Self>) -> Result<String, CredentialError> {
        let creds = self.store.get().ok_or(CredentialError::NotLoggedIn)?;
        let now = epoch_ms();

        if !creds.is_expired_at(now) {
            if creds.refresh_token.is_some() && self.in_window(&creds, now) {
                debug!("access token expiring soon, refreshing in background");
                // The spawned refresh runs to completion without a waiter.
                drop(self.start_or_join());
            }
            return Ok(creds.access_token);
        }

        if creds.refresh_token.is_none() {
            return Err(CredentialError::SessionExpired);
        }

        self.refresh_now().await.map_err(CredentialError::Refresh)?;
        match self.store.get() {
            Some(fresh) if !fresh.is_expired_at(epoch_ms()) => Ok(fresh.access_token),
            Some(_) => Err(CredentialError::Refresh(RefreshError::Transient(
                "refreshed token is already expired".to_owned(),
            ))),
            None => Err(CredentialError::NotLoggedIn),
        }
    }

    /// Join the in-flight refresh, or start one.
    pub async fn refresh_now(self: &Arc<Self>) -> Result<(), RefreshError> {
        self.start_or_join().await
    }

    /// Drop refresh state: cancel the in-flight refresh and zero the failure counter.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.cancel.cancel();
        state.cancel = CancellationToken::new();
        state.in_flight = None;
        state.failures = 0;
    }

    fn in_window(&self, creds: &Credentials, now_ms: u64) -> bool {
        creds.is_expired_at(now_ms) || creds.expires_in(now_ms) < self.config.threshold
    }

    fn start_or_join(self: &Arc<Self>) -> SharedRefresh {
        let mut state = self.state.lock();
        if let Some(ref in_flight) = state.in_flight {
            return in_flight.future.clone();
        }

        let generation = state.next_generation;
        state.next_generation += 1;
        let cancel = state.cancel.clone();
        let this = Arc::clone(self);
        let task = tokio::spawn(async move {
            let result = tokio::select! {
                _ = cancel.cancelled() => Err(RefreshError::Transient("refresh cancelled".to_owned())),
                result = this.run_refresh() => result,
            };
            this.finish(generation, &result);
            result.map(|_| ())
        });

        let future = async move {
            task.await.unwrap_or_else(|e| Err(RefreshError::Transient(format!("refresh task failed: {e}"))))
        }
        .boxed()
        .shared();
        state.in_flight = Some(InFlight { generation, future: future.clone() });
        future
    }

    /// One refresh exchange. `Ok(None)` means another writer already made
    /// the stored token fresh and no request was sent.
    async fn run_refresh(&self) -> Result<Option<Credentials>, RefreshError> {
        let creds = self.store.get().ok_or_else(|| RefreshError::Permanent("no stored credentials".to_owned()))?;
        if !self.in_window(&creds, epoch_ms()) {
            debug!("stored token already fresh, skipping refresh");
            return Ok(None);
        }
        let refresh_token = creds
            .refresh_token
            .ok_or_else(|| RefreshError::Permanent("no refresh token stored".to_owned()))?;

        let form = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token.as_str()),
            ("client_id", self.config.client_id.as_str()),
        ];
        let reply = self
            .transport
            .post_form(&self.endpoints.token, &form)
            .await
            .map_err(|e| RefreshError::Transient(format!("HTTP error: {e:#}")))?;

        if !reply.is_success() {
            if let Some(err) = oauth::parse_error(&reply.body) {
                let detail = match err.error_description {
                    Some(desc) => format!("{}: {desc}", err.error),
                    None => err.error.clone(),
                };
                if err.error == "invalid_grant" {
                    return Err(RefreshError::Permanent(detail));
                }
                return Err(RefreshError::Transient(detail));
            }
            return Err(RefreshError::Transient(format!("HTTP {}: {}", reply.status, reply.body)));
        }

        let token: TokenResponse = serde_json::from_str(&reply.body)
            .map_err(|e| RefreshError::Transient(format!("parse response: {e}")))?;
        let expires_at = oauth::resolve_expires_at(&token.access_token, token.expires_in, epoch_ms());
        let updated = self
            .store
            .update(&token.access_token, expires_at, token.refresh_token.as_deref())
            .map_err(|e| RefreshError::Transient(format!("save credentials: {e:#}")))?;

        info!(
            expires_in_secs = updated.expires_in(epoch_ms()).as_secs(),
            rotated = token.refresh_token.is_some(),
            "access token refreshed"
        );
        Ok(Some(updated))
    }

    /// Bookkeeping for a finished refresh. Skipped when `reset` has since
    /// replaced the generation. Callbacks run outside the lock.
    fn finish(&self, generation: u64, result: &Result<Option<Credentials>, RefreshError>) {
        let failures = {
            let mut state = self.state.lock();
            if state.in_flight.as_ref().map(|f| f.generation) != Some(generation) {
                return;
            }
            state.in_flight = None;
            match result {
                Ok(_) => state.failures = 0,
                Err(_) => state.failures += 1,
            }
            state.failures
        };

        match result {
            Ok(Some(creds)) => {
                if let Some(ref cb) = self.config.on_refreshed {
                    cb(creds);
                }
            }
            Ok(None) => {}
            Err(e) => {
                let escalate = e.is_permanent() || failures >= MAX_CONSECUTIVE_FAILURES;
                warn!(err = %e, failures, escalate, "token refresh failed");
                if escalate {
                    if let Some(ref cb) = self.config.on_expired {
                        cb(e);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "refresh_tests.rs"]
mod tests;
