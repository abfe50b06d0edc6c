// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::fmt;

/// Remediation appended to every error that requires a fresh login.
pub const RELOGIN_HINT: &str = "run `authgate login` again";

/// Terminal failure of a device authorization attempt.
///
/// Every variant ends the login attempt; no retries happen beyond the
/// protocol's own `authorization_pending` / `slow_down` handling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceAuthError {
    /// The device authorization request never got a response.
    Request(String),
    /// An endpoint answered with a non-success status and no OAuth error code.
    Http { status: u16, body: String },
    /// The provider reported an unrecoverable error code.
    Provider { code: String, description: Option<String> },
    /// A response could not be parsed.
    InvalidResponse(String),
    /// No terminal outcome before the poll deadline.
    Timeout,
    /// The caller cancelled the flow.
    Cancelled,
}

impl fmt::Display for DeviceAuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Request(msg) => write!(f, "could not reach identity provider: {msg}"),
            Self::Http { status, body } => {
                write!(f, "device authorization failed ({status}): {body}")
            }
            Self::Provider { code, description: Some(desc) } => {
                write!(f, "device authorization failed: {code}: {desc}")
            }
            Self::Provider { code, description: None } => {
                write!(f, "device authorization failed: {code}")
            }
            Self::InvalidResponse(msg) => {
                write!(f, "invalid response from identity provider: {msg}")
            }
            Self::Timeout => f.write_str("timed out waiting for device authorization"),
            Self::Cancelled => f.write_str("device authorization cancelled"),
        }
    }
}

impl std::error::Error for DeviceAuthError {}

/// Outcome of a failed refresh attempt.
///
/// `Clone` so a single in-flight refresh can hand the same result to every
/// waiter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshError {
    /// The refresh token itself is dead (`invalid_grant`).
    Permanent(String),
    /// Network failure, provider 5xx, unparseable body.
    Transient(String),
}

impl RefreshError {
    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::Permanent(_))
    }
}

impl fmt::Display for RefreshError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Permanent(msg) => write!(f, "permanent: {msg}"),
            Self::Transient(msg) => write!(f, "transient: {msg}"),
        }
    }
}

impl std::error::Error for RefreshError {}

/// Why no access token can be handed out right now.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialError {
    /// No credential record on this machine.
    NotLoggedIn,
    /// The token hard-expired and there is no refresh token to renew it.
    SessionExpired,
    /// The token is expired and the refresh attempt failed.
    Refresh(RefreshError),
}

impl CredentialError {
    /// Whether the only way forward is a fresh `authgate login`.
    pub fn requires_login(&self) -> bool {
        match self {
            Self::NotLoggedIn | Self::SessionExpired => true,
            Self::Refresh(e) => e.is_permanent(),
        }
    }
}

impl fmt::Display for CredentialError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotLoggedIn => write!(f, "not logged in; {RELOGIN_HINT}"),
            Self::SessionExpired => {
                write!(f, "session expired and no refresh token is stored; {RELOGIN_HINT}")
            }
            Self::Refresh(e) if e.is_permanent() => {
                write!(f, "session can no longer be refreshed ({e}); {RELOGIN_HINT}")
            }
            Self::Refresh(e) => {
                write!(f, "token refresh failed ({e}); retry shortly or {RELOGIN_HINT}")
            }
        }
    }
}

impl std::error::Error for CredentialError {}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
