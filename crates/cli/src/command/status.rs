// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `authgate status`: describe the stored session.

use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;

use crate::config::AuthArgs;
use crate::credential::{epoch_ms, Credentials};
use crate::error::CredentialError;

#[derive(Debug, Clone, clap::Args)]
pub struct StatusArgs {
    /// Print machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

/// Session summary. Never carries token material.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub user_id: String,
    pub email: Option<String>,
    /// RFC 3339 expiry instant.
    pub expires_at: String,
    pub expires_in_secs: u64,
    pub expired: bool,
    pub has_refresh_token: bool,
    pub has_staging_credentials: bool,
}

impl StatusReport {
    pub fn new(creds: &Credentials, now_ms: u64) -> Self {
        let expired = creds.is_expired_at(now_ms);
        Self {
            user_id: creds.user_id.clone(),
            email: creds.email.clone(),
            expires_at: rfc3339(creds.expires_at),
            expires_in_secs: creds.expires_in(now_ms).as_secs(),
            expired,
            has_refresh_token: creds.refresh_token.is_some(),
            has_staging_credentials: !expired && creds.staging_cache.is_some(),
        }
    }

    pub fn render(&self, creds: &Credentials, now_ms: u64) -> String {
        let user = match self.email {
            Some(ref email) => format!("{email} ({})", self.user_id),
            None => self.user_id.clone(),
        };
        let when = if self.expired {
            format!("expired {} ago", humanize(Duration::from_millis(now_ms.saturating_sub(creds.expires_at))))
        } else {
            format!("in {}", humanize(Duration::from_secs(self.expires_in_secs)))
        };
        let refresh = if self.has_refresh_token { "yes" } else { "no" };
        format!("User:          {user}\nExpires:       {} ({when})\nRefresh token: {refresh}", self.expires_at)
    }
}

/// Run `authgate status`. Exit 1 when no session is stored.
pub fn run(auth: &AuthArgs, args: &StatusArgs) -> i32 {
    let Some(creds) = auth.store().get() else {
        eprintln!("{}", CredentialError::NotLoggedIn);
        return 1;
    };
    let now = epoch_ms();
    let report = StatusReport::new(&creds, now);

    if args.json {
        match serde_json::to_string_pretty(&report) {
            Ok(json) => println!("{json}"),
            Err(e) => {
                eprintln!("error: {e}");
                return 1;
            }
        }
    } else {
        println!("{}", report.render(&creds, now));
    }
    0
}

fn rfc3339(epoch_ms: u64) -> String {
    i64::try_from(epoch_ms)
        .ok()
        .and_then(DateTime::<Utc>::from_timestamp_millis)
        .map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true))
        .unwrap_or_else(|| epoch_ms.to_string())
}

/// Coarse human duration: `2h 5m`, `4m 10s`, `9s`.
pub fn humanize(d: Duration) -> String {
    let secs = d.as_secs();
    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    match (h, m) {
        (0, 0) => format!("{s}s"),
        (0, _) => format!("{m}m {s}s"),
        _ => format!("{h}h {m}m"),
    }
}

#[cfg(test)]
#[path = "status_tests.rs"]
mod tests;
