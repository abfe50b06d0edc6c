// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Credential subsystem: device-code login, on-disk store, refresh.
//!
//! One [`Credentials`] record exists per machine. It is created by the
//! device authorization flow, renewed in place by the refresh coordinator,
//! and destroyed by `authgate logout`.

pub mod device_code;
pub mod jwt;
pub mod oauth;
pub mod persist;
pub mod refresh;

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// The persisted credential record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credentials {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Absolute expiry as milliseconds since Unix epoch, never a duration.
    pub expires_at: u64,
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub staging_cache: Option<StagingCache>,
}

impl Credentials {
    /// Strict expiry check: no grace window.
    pub fn is_expired_at(&self, now_ms: u64) -> bool {
        now_ms >= self.expires_at
    }

    /// Time left before expiry (zero once expired).
    pub fn expires_in(&self, now_ms: u64) -> Duration {
        Duration::from_millis(self.expires_at.saturating_sub(now_ms))
    }

    /// Email when known, otherwise the subject identifier.
    pub fn display_name(&self) -> &str {
        self.email.as_deref().unwrap_or(&self.user_id)
    }
}

/// Secondary short-lived credential bundle cached alongside the primary token.
///
/// Never refreshed on its own; readers treat it as gone once the primary
/// token has expired.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StagingCache {
    pub credentials: HashMap<String, String>,
    /// Fetch time as milliseconds since Unix epoch.
    pub fetched_at: u64,
}

impl StagingCache {
    pub fn age(&self, now_ms: u64) -> Duration {
        Duration::from_millis(now_ms.saturating_sub(self.fetched_at))
    }
}

/// Resolve the default credential file location.
///
/// `$HOME/.authgate/credentials.json`, or a relative `.authgate/` when no
/// home directory is known.
pub fn default_credentials_path() -> PathBuf {
    match std::env::var_os("HOME") {
        Some(home) if !home.is_empty() => PathBuf::from(home).join(".authgate/credentials.json"),
        _ => PathBuf::from(".authgate/credentials.json"),
    }
}

/// Return current epoch millis.
pub fn epoch_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
