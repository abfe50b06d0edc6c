// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Credential persistence: one JSON record on disk with atomic writes.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};

use anyhow::Context;
use tracing::warn;

use crate::credential::{epoch_ms, Credentials, StagingCache};

/// File-backed store for the machine's single [`Credentials`] record.
///
/// Reads never lock. Every write goes to a uniquely named sibling temp file
/// and is renamed over the real path, so a concurrent reader sees either
/// the old or the new record in full.
#[derive(Debug, Clone)]
pub struct CredentialStore {
    path: PathBuf,
}

impl CredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the record. Missing, unreadable, or corrupt files all read as `None`.
    pub fn get(&self) -> Option<Credentials> {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(path = %self.path.display(), err = %e, "credential file unreadable");
                return None;
            }
        };
        match serde_json::from_str(&contents) {
            Ok(creds) => Some(creds),
            Err(e) => {
                warn!(path = %self.path.display(), err = %e, "credential file corrupt, ignoring");
                None
            }
        }
    }

    pub fn has(&self) -> bool {
        self.get().is_some()
    }

    pub fn save(&self, creds: &Credentials) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(creds)?;
        write_atomic(&self.path, json.as_bytes())
    }

    /// Remove the record. Clearing an absent record succeeds.
    pub fn clear(&self) -> anyhow::Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("remove {}", self.path.display())),
        }
    }

    /// Strict expiry check against the wall clock.
    pub fn is_expired(&self, creds: &Credentials) -> bool {
        creds.is_expired_at(epoch_ms())
    }

    /// Replace the token fields of the existing record in place.
    ///
    /// The refresh token is kept when `refresh_token` is `None`. User
    /// identity and the staging cache are carried over unchanged.
    pub fn update(
        &self,
        access_token: &str,
        expires_at: u64,
        refresh_token: Option<&str>,
    ) -> anyhow::Result<Credentials> {
        let Some(mut creds) = self.get() else {
            anyhow::bail!("no stored credentials to update at {}", self.path.display());
        };
        creds.access_token = access_token.to_owned();
        creds.expires_at = expires_at;
        if let Some(rt) = refresh_token {
            creds.refresh_token = Some(rt.to_owned());
        }
        self.save(&creds)?;
        Ok(creds)
    }

    /// Attach a staging credential bundle to the current, unexpired record.
    pub fn save_staging_credentials(&self, credentials: HashMap<String, String>) -> anyhow::Result<()> {
        let Some(mut creds) = self.get() else {
            anyhow::bail!("no stored credentials to attach staging credentials to");
        };
        if self.is_expired(&creds) {
            anyhow::bail!("stored credentials are expired");
        }
        creds.staging_cache = Some(StagingCache { credentials, fetched_at: epoch_ms() });
        self.save(&creds)
    }

    /// Cached staging credentials, only while the primary token is unexpired.
    pub fn get_staging_credentials(&self) -> Option<StagingCache> {
        let creds = self.get()?;
        if self.is_expired(&creds) {
            return None;
        }
        creds.staging_cache
    }
}

/// Write `bytes` to `path` atomically (write tmp + rename).
///
/// The temp name carries PID and a process-wide counter so concurrent
/// writers never share a temp file. The temp file is removed on failure.
fn write_atomic(path: &Path, bytes: &[u8]) -> anyhow::Result<()> {
    static COUNTER: AtomicU32 = AtomicU32::new(0);

    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        create_private_dir(dir)?;
    }

    let seq = COUNTER.fetch_add(1, Ordering::Relaxed);
    let tmp_name = format!(
        "{}.{}.{}.tmp",
        path.file_name().unwrap_or_default().to_string_lossy(),
        std::process::id(),
        seq,
    );
    let tmp_path = path.with_file_name(tmp_name);

    let result = write_private_file(&tmp_path, bytes)
        .and_then(|()| std::fs::rename(&tmp_path, path).map_err(anyhow::Error::from));
    if result.is_err() {
        let _ = std::fs::remove_file(&tmp_path);
    }
    result.with_context(|| format!("write {}", path.display()))
}

fn create_private_dir(dir: &Path) -> anyhow::Result<()> {
    let mut builder = std::fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o700);
    }
    builder.create(dir).with_context(|| format!("create {}", dir.display()))
}

fn write_private_file(path: &Path, bytes: &[u8]) -> anyhow::Result<()> {
    let mut opts = std::fs::OpenOptions::new();
    opts.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        opts.mode(0o600);
    }
    let mut file = opts.open(path)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    Ok(())
}

#[cfg(test)]
#[path = "persist_tests.rs"]
mod tests;
