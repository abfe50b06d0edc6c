// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Test harness for end-to-end binary smoke tests.
//!
//! Runs the real `authgate` and `authgate-proxy` binaries as subprocesses
//! against an isolated credential file.

use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Output, Stdio};
use std::time::Duration;

use authgate::credential::persist::CredentialStore;
use authgate::credential::Credentials;

pub use authgate::ensure_crypto;

/// Resolve the path to a compiled workspace binary.
pub fn binary(name: &str) -> PathBuf {
    let manifest = Path::new(env!("CARGO_MANIFEST_DIR"));
    // tests/specs → tests → workspace root
    let workspace = manifest.parent().and_then(|p| p.parent()).unwrap_or(manifest);
    workspace.join("target").join("debug").join(name)
}

/// Find a free TCP port by binding to :0 then releasing.
pub fn free_port() -> anyhow::Result<u16> {
    let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
    Ok(listener.local_addr()?.port())
}

/// An isolated credential file in a temporary directory.
pub struct Sandbox {
    dir: tempfile::TempDir,
}

impl Sandbox {
    pub fn new() -> anyhow::Result<Self> {
        Ok(Self { dir: tempfile::tempdir()? })
    }

    pub fn credentials_path(&self) -> PathBuf {
        self.dir.path().join("credentials.json")
    }

    pub fn store(&self) -> CredentialStore {
        CredentialStore::new(self.credentials_path())
    }

    pub fn save(&self, creds: &Credentials) -> anyhow::Result<()> {
        self.store().save(creds)
    }

    /// Base command with the sandbox's credential path and no inherited
    /// provider overrides.
    pub fn command(&self, name: &str) -> anyhow::Result<Command> {
        let binary = binary(name);
        anyhow::ensure!(binary.exists(), "{name} binary not found at {}", binary.display());
        let mut cmd = Command::new(binary);
        cmd.env("AUTHGATE_CREDENTIALS_PATH", self.credentials_path())
            .env("AUTHGATE_PROVIDER_DOMAIN", "http://127.0.0.1:1")
            .env_remove("AUTHGATE_CLIENT_ID")
            .env_remove("AUTHGATE_SCOPES")
            .env("AUTHGATE_LOG_FORMAT", "text");
        Ok(cmd)
    }

    /// Run `authgate <args>` to completion.
    pub fn authgate(&self, args: &[&str]) -> anyhow::Result<Output> {
        Ok(self.command("authgate")?.args(args).stdin(Stdio::null()).output()?)
    }

    /// Spawn `authgate-proxy` and wait for its URL announcement.
    pub fn spawn_proxy(&self, upstream: &str) -> anyhow::Result<ProxyProcess> {
        let mut child = self
            .command("authgate-proxy")?
            .args(["--upstream", upstream, "--port", "0"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()?;

        let stdout = child.stdout.take().ok_or_else(|| anyhow::anyhow!("proxy stdout not captured"))?;
        let mut process = ProxyProcess { child, url: String::new() };
        let mut line = String::new();
        BufReader::new(stdout).read_line(&mut line)?;
        let Some(url) = line.trim().strip_prefix("AUTHGATE_PROXY_URL=") else {
            anyhow::bail!("unexpected proxy announcement: {line:?}");
        };
        process.url = url.to_owned();
        Ok(process)
    }
}

/// A running `authgate-proxy` process that is killed on drop.
pub struct ProxyProcess {
    child: Child,
    url: String,
}

impl ProxyProcess {
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Wait for the process to exit within `timeout`.
    pub async fn wait_exit(&mut self, timeout: Duration) -> anyhow::Result<std::process::ExitStatus> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if tokio::time::Instant::now() > deadline {
                anyhow::bail!("authgate-proxy did not exit within {timeout:?}");
            }
            if let Some(status) = self.child.try_wait()? {
                return Ok(status);
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    pub fn pid(&self) -> u32 {
        self.child.id()
    }
}

impl Drop for ProxyProcess {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}
