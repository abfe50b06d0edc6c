// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end smoke tests that run the real `authgate` and
//! `authgate-proxy` binaries against a sandboxed credential file.

use std::time::Duration;

use authgate::credential::epoch_ms;
use authgate::test_support::{credentials, fake_jwt};
use authgate_specs::Sandbox;

const TIMEOUT: Duration = Duration::from_secs(10);

fn stdout(output: &std::process::Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn stderr(output: &std::process::Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

// -- authgate ----------------------------------------------------------------

#[test]
fn status_without_credentials_fails() -> anyhow::Result<()> {
    let sandbox = Sandbox::new()?;
    let output = sandbox.authgate(&["status"])?;

    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("authgate login"), "{}", stderr(&output));
    Ok(())
}

#[test]
fn status_json_reports_identity() -> anyhow::Result<()> {
    let sandbox = Sandbox::new()?;
    let mut creds = credentials("at-1", epoch_ms() + 3_600_000, Some("rt-1"));
    creds.email = Some("dev@example.com".to_owned());
    sandbox.save(&creds)?;

    let output = sandbox.authgate(&["status", "--json"])?;
    assert_eq!(output.status.code(), Some(0), "{}", stderr(&output));
    let report: serde_json::Value = serde_json::from_str(&stdout(&output))?;

    assert_eq!(report["userId"], "user_123");
    assert_eq!(report["email"], "dev@example.com");
    assert_eq!(report["expired"], false);
    assert_eq!(report["hasRefreshToken"], true);
    Ok(())
}

#[test]
fn logout_is_idempotent() -> anyhow::Result<()> {
    let sandbox = Sandbox::new()?;
    sandbox.save(&credentials("at-1", epoch_ms() + 3_600_000, None))?;

    let first = sandbox.authgate(&["logout"])?;
    assert_eq!(first.status.code(), Some(0));
    assert!(stdout(&first).contains("Logged out"));
    assert!(!sandbox.credentials_path().exists());

    let second = sandbox.authgate(&["logout"])?;
    assert_eq!(second.status.code(), Some(0));
    assert!(stdout(&second).contains("Not logged in"));
    Ok(())
}

#[test]
fn token_prints_live_access_token() -> anyhow::Result<()> {
    let sandbox = Sandbox::new()?;
    let token = fake_jwt(serde_json::json!({ "sub": "user_123" }));
    sandbox.save(&credentials(&token, epoch_ms() + 3_600_000, Some("rt-1")))?;

    let output = sandbox.authgate(&["token"])?;

    assert_eq!(output.status.code(), Some(0), "{}", stderr(&output));
    assert_eq!(stdout(&output).trim(), token);
    Ok(())
}

#[test]
fn token_with_expired_session_fails() -> anyhow::Result<()> {
    let sandbox = Sandbox::new()?;
    sandbox.save(&credentials("at-old", epoch_ms() - 1_000, None))?;

    let output = sandbox.authgate(&["token"])?;

    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("authgate login"), "{}", stderr(&output));
    Ok(())
}

#[test]
fn invalid_provider_domain_is_a_usage_error() -> anyhow::Result<()> {
    let sandbox = Sandbox::new()?;
    let output = sandbox.authgate(&["--provider-domain", "ftp://auth.example.com", "status"])?;

    assert_eq!(output.status.code(), Some(2));
    Ok(())
}

// -- authgate-proxy ----------------------------------------------------------

#[tokio::test]
async fn proxy_without_credentials_returns_401() -> anyhow::Result<()> {
    authgate_specs::ensure_crypto();
    let sandbox = Sandbox::new()?;
    let proxy = sandbox.spawn_proxy("http://127.0.0.1:1")?;

    let client = reqwest::Client::builder().no_proxy().timeout(TIMEOUT).build()?;
    let resp = client.get(format!("{}/v1/messages", proxy.url())).send().await?;
    assert_eq!(resp.status().as_u16(), 401);
    let body: serde_json::Value = resp.json().await?;
    assert_eq!(body["error"], "credentials_unavailable");
    Ok(())
}

#[tokio::test]
async fn proxy_reports_unreachable_upstream() -> anyhow::Result<()> {
    authgate_specs::ensure_crypto();
    let sandbox = Sandbox::new()?;
    sandbox.save(&credentials("at-1", epoch_ms() + 3_600_000, Some("rt-1")))?;
    let closed = authgate_specs::free_port()?;
    let proxy = sandbox.spawn_proxy(&format!("http://127.0.0.1:{closed}"))?;

    let client = reqwest::Client::builder().no_proxy().timeout(TIMEOUT).build()?;
    let resp = client.get(format!("{}/v1/messages", proxy.url())).send().await?;
    assert_eq!(resp.status().as_u16(), 502);
    let body: serde_json::Value = resp.json().await?;
    assert_eq!(body["error"], "upstream_unavailable");
    Ok(())
}

#[tokio::test]
async fn proxy_exits_cleanly_on_sigterm() -> anyhow::Result<()> {
    let sandbox = Sandbox::new()?;
    let mut proxy = sandbox.spawn_proxy("http://127.0.0.1:1")?;

    let status = std::process::Command::new("kill").args(["-TERM", &proxy.pid().to_string()]).status()?;
    assert!(status.success());

    let exit = proxy.wait_exit(TIMEOUT).await?;
    assert_eq!(exit.code(), Some(0));
    Ok(())
}

#[test]
fn proxy_rejects_missing_upstream() -> anyhow::Result<()> {
    let sandbox = Sandbox::new()?;
    let output = sandbox
        .command("authgate-proxy")?
        .env_remove("AUTHGATE_UPSTREAM_URL")
        .stdin(std::process::Stdio::null())
        .output()?;

    assert_eq!(output.status.code(), Some(2));
    Ok(())
}
