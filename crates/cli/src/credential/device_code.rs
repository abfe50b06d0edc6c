// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! OAuth 2.0 Device Authorization Grant (RFC 8628) client.
//!
//! The client requests a device code, then polls the token endpoint one
//! request at a time until the user approves, the provider reports a
//! terminal error, the deadline passes, or the caller cancels.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::credential::oauth::{self, Endpoints, FormTransport, TokenResponse, DEVICE_CODE_GRANT};
use crate::credential::{epoch_ms, jwt, Credentials};
use crate::error::DeviceAuthError;

/// Scopes requested when the caller names none.
pub const DEFAULT_SCOPES: &[&str] = &["openid", "email", "credentials:read"];

/// Overall wall-clock budget for the poll loop.
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Interval increase applied on every `slow_down`. Growth is uncapped.
pub const SLOW_DOWN_STEP: Duration = Duration::from_secs(5);

/// Device code and user-facing instructions for one login attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceSession {
    pub device_code: String,
    pub user_code: String,
    pub verification_uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification_uri_complete: Option<String>,
    /// Seconds until the device code expires.
    pub expires_in: u64,
    /// Minimum seconds between polls.
    #[serde(default = "default_interval")]
    pub interval: u64,
}

fn default_interval() -> u64 {
    5
}

impl DeviceSession {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.interval)
    }
}

/// Tokens obtained from a completed device authorization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenResult {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub id_token: Option<String>,
    /// Absolute expiry, epoch ms.
    pub expires_at: u64,
    pub user_id: String,
    pub email: Option<String>,
}

impl TokenResult {
    /// Build the result from a token endpoint success body.
    ///
    /// Identity comes from the ID token, falling back to the access token's
    /// `sub` and finally the empty string.
    pub fn from_response(resp: TokenResponse, now_ms: u64) -> Self {
        let expires_at = oauth::resolve_expires_at(&resp.access_token, resp.expires_in, now_ms);
        let id_claims = resp.id_token.as_deref().and_then(jwt::decode).unwrap_or_default();
        let user_id = id_claims
            .sub
            .or_else(|| jwt::decode(&resp.access_token).and_then(|c| c.sub))
            .unwrap_or_default();
        Self {
            access_token: resp.access_token,
            refresh_token: resp.refresh_token,
            id_token: resp.id_token,
            expires_at,
            user_id,
            email: id_claims.email,
        }
    }

    pub fn into_credentials(self) -> Credentials {
        Credentials {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            expires_at: self.expires_at,
            user_id: self.user_id,
            email: self.email,
            staging_cache: None,
        }
    }
}

/// Called with the new interval each time the provider asks to slow down.
pub type IntervalCallback = Arc<dyn Fn(Duration) + Send + Sync>;

/// Knobs for the poll loop.
#[derive(Clone)]
pub struct PollOptions {
    pub timeout: Duration,
    pub on_interval_change: Option<IntervalCallback>,
    /// Stops the loop during a sleep or an in-flight poll.
    pub cancel: CancellationToken,
}

impl Default for PollOptions {
    fn default() -> Self {
        Self { timeout: DEFAULT_POLL_TIMEOUT, on_interval_change: None, cancel: CancellationToken::new() }
    }
}

/// Options for the one-shot [`DeviceAuthClient::run`].
#[derive(Clone)]
pub struct LoginOptions {
    pub scopes: Vec<String>,
    pub poll: PollOptions,
}

impl Default for LoginOptions {
    fn default() -> Self {
        Self { scopes: DEFAULT_SCOPES.iter().map(|s| (*s).to_owned()).collect(), poll: PollOptions::default() }
    }
}

/// Device authorization client bound to one provider and client id.
#[derive(Clone)]
pub struct DeviceAuthClient {
    endpoints: Endpoints,
    client_id: String,
    transport: Arc<dyn FormTransport>,
}

impl DeviceAuthClient {
    pub fn new(provider_domain: &str, client_id: &str, transport: Arc<dyn FormTransport>) -> Self {
        Self { endpoints: Endpoints::for_domain(provider_domain), client_id: client_id.to_owned(), transport }
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    /// Request a device code. One network call, no retries.
    pub async fn request_code(&self, scopes: &[String]) -> Result<DeviceSession, DeviceAuthError> {
        let scope = scopes.join(" ");
        let form = [("client_id", self.client_id.as_str()), ("scope", scope.as_str())];
        let reply = self
            .transport
            .post_form(&self.endpoints.device_authorization, &form)
            .await
            .map_err(|e| DeviceAuthError::Request(format!("{e:#}")))?;

        if !reply.is_success() {
            return Err(DeviceAuthError::Http { status: reply.status, body: reply.body });
        }
        let session: DeviceSession = serde_json::from_str(&reply.body)
            .map_err(|e| DeviceAuthError::InvalidResponse(format!("device authorization body: {e}")))?;
        debug!(interval = session.interval, expires_in = session.expires_in, "device code issued");
        Ok(session)
    }

    /// Poll the token endpoint until a terminal outcome.
    ///
    /// Each iteration sleeps for the current interval and then issues one
    /// request. A poll that gets no response at all is retried on the next
    /// tick. The deadline bounds both the sleeps and in-flight requests.
    pub async fn poll_for_token(
        &self,
        device_code: &str,
        interval: Duration,
        opts: &PollOptions,
    ) -> Result<TokenResult, DeviceAuthError> {
        let deadline = Instant::now() + opts.timeout;
        let mut interval = interval.max(Duration::from_secs(1));
        let form = [
            ("grant_type", DEVICE_CODE_GRANT),
            ("device_code", device_code),
            ("client_id", self.client_id.as_str()),
        ];

        loop {
            let wake = (Instant::now() + interval).min(deadline);
            tokio::select! {
                _ = opts.cancel.cancelled() => return Err(DeviceAuthError::Cancelled),
                _ = tokio::time::sleep_until(wake) => {}
            }
            if Instant::now() >= deadline {
                return Err(DeviceAuthError::Timeout);
            }

            let request = tokio::time::timeout_at(deadline, self.transport.post_form(&self.endpoints.token, &form));
            let reply = tokio::select! {
                _ = opts.cancel.cancelled() => return Err(DeviceAuthError::Cancelled),
                result = request => match result {
                    Err(_) => return Err(DeviceAuthError::Timeout),
                    Ok(Err(e)) => {
                        debug!(err = %e, "token poll got no response, retrying");
                        continue;
                    }
                    Ok(Ok(reply)) => reply,
                },
            };

            if reply.is_success() {
                let resp: TokenResponse = serde_json::from_str(&reply.body)
                    .map_err(|e| DeviceAuthError::InvalidResponse(format!("token body: {e}")))?;
                return Ok(TokenResult::from_response(resp, epoch_ms()));
            }

            match oauth::parse_error(&reply.body) {
                Some(err) if err.error == "authorization_pending" => {
                    trace!("authorization pending");
                }
                Some(err) if err.error == "slow_down" => {
                    interval += SLOW_DOWN_STEP;
                    debug!(interval_secs = interval.as_secs(), "provider asked to slow down");
                    if let Some(ref cb) = opts.on_interval_change {
                        cb(interval);
                    }
                }
                Some(err) => {
                    return Err(DeviceAuthError::Provider { code: err.error, description: err.error_description });
                }
                None => return Err(DeviceAuthError::Http { status: reply.status, body: reply.body }),
            }
        }
    }

    /// Request a code and poll it to completion.
    pub async fn run(&self, opts: &LoginOptions) -> Result<TokenResult, DeviceAuthError> {
        let session = self.request_code(&opts.scopes).await?;
        self.poll_for_token(&session.device_code, session.poll_interval(), &opts.poll).await
    }

    /// Split flow: obtain the session now, poll later via [`DeviceLogin::complete`].
    pub async fn begin(&self, scopes: &[String]) -> Result<DeviceLogin, DeviceAuthError> {
        let session = self.request_code(scopes).await?;
        Ok(DeviceLogin { client: self.clone(), session })
    }
}

/// A device login whose instructions can be shown before polling starts.
pub struct DeviceLogin {
    client: DeviceAuthClient,
    session: DeviceSession,
}

impl DeviceLogin {
    pub fn session(&self) -> &DeviceSession {
        &self.session
    }

    /// Poll until done. The timeout never exceeds the device code's own lifetime.
    pub async fn complete(&self, opts: &PollOptions) -> Result<TokenResult, DeviceAuthError> {
        let mut opts = opts.clone();
        if self.session.expires_in > 0 {
            opts.timeout = opts.timeout.min(Duration::from_secs(self.session.expires_in));
        }
        self.client.poll_for_token(&self.session.device_code, self.session.poll_interval(), &opts).await
    }
}

#[cfg(test)]
#[path = "device_code_tests.rs"]
mod tests;
