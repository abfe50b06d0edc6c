// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Device login and refresh over real HTTP against a mock provider.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Form, Json, Router};

use authgate::credential::device_code::{DeviceAuthClient, LoginOptions};
use authgate::credential::epoch_ms;
use authgate::credential::oauth::{FormTransport, HttpTransport};
use authgate::credential::persist::CredentialStore;
use authgate::credential::refresh::{RefreshConfig, RefreshCoordinator};
use authgate::error::CredentialError;
use authgate::test_support::{credentials, fake_jwt};

#[derive(Clone, Copy)]
enum RefreshMode {
    Succeed,
    InvalidGrant,
    Unavailable,
}

struct Provider {
    mode: RefreshMode,
    pending_polls: AtomicU32,
    device_calls: AtomicU32,
    token_calls: AtomicU32,
    forms: tokio::sync::Mutex<Vec<HashMap<String, String>>>,
}

async fn spawn_provider(mode: RefreshMode, pending_polls: u32) -> anyhow::Result<(String, Arc<Provider>)> {
    let provider = Arc::new(Provider {
        mode,
        pending_polls: AtomicU32::new(pending_polls),
        device_calls: AtomicU32::new(0),
        token_calls: AtomicU32::new(0),
        forms: tokio::sync::Mutex::new(Vec::new()),
    });
    let app = Router::new()
        .route("/oauth2/device_authorization", post(device_authorization))
        .route("/oauth2/token", post(token))
        .with_state(Arc::clone(&provider));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    Ok((format!("http://{addr}"), provider))
}

async fn device_authorization(
    State(provider): State<Arc<Provider>>,
    Form(form): Form<HashMap<String, String>>,
) -> Response {
    provider.device_calls.fetch_add(1, Ordering::SeqCst);
    provider.forms.lock().await.push(form);
    Json(serde_json::json!({
        "device_code": "dc-1",
        "user_code": "ABCD-EFGH",
        "verification_uri": "https://auth.example.com/activate",
        "expires_in": 600,
        "interval": 1,
    }))
    .into_response()
}

async fn token(State(provider): State<Arc<Provider>>, Form(form): Form<HashMap<String, String>>) -> Response {
    provider.token_calls.fetch_add(1, Ordering::SeqCst);
    let grant = form.get("grant_type").cloned().unwrap_or_default();
    provider.forms.lock().await.push(form);

    if grant == "refresh_token" {
        return match provider.mode {
            RefreshMode::Succeed => {
                tokio::time::sleep(Duration::from_millis(100)).await;
                Json(serde_json::json!({
                    "access_token": "at-refreshed",
                    "refresh_token": "rt-2",
                    "expires_in": 3600,
                }))
                .into_response()
            }
            RefreshMode::InvalidGrant => {
                (StatusCode::BAD_REQUEST, Json(serde_json::json!({ "error": "invalid_grant" }))).into_response()
            }
            RefreshMode::Unavailable => (StatusCode::SERVICE_UNAVAILABLE, "<html>down</html>").into_response(),
        };
    }

    let remaining = provider.pending_polls.load(Ordering::SeqCst);
    if remaining > 0 {
        provider.pending_polls.store(remaining - 1, Ordering::SeqCst);
        return (StatusCode::BAD_REQUEST, Json(serde_json::json!({ "error": "authorization_pending" })))
            .into_response();
    }
    let exp = epoch_ms() / 1000 + 3600;
    Json(serde_json::json!({
        "access_token": fake_jwt(serde_json::json!({ "sub": "user_42", "exp": exp })),
        "id_token": fake_jwt(serde_json::json!({ "sub": "user_42", "email": "dev@example.com" })),
        "refresh_token": "rt-1",
        "expires_in": 3600,
    }))
    .into_response()
}

fn transport() -> anyhow::Result<Arc<dyn FormTransport>> {
    Ok(Arc::new(HttpTransport::new()?))
}

#[tokio::test]
async fn device_login_over_http() -> anyhow::Result<()> {
    let (domain, provider) = spawn_provider(RefreshMode::Succeed, 1).await?;
    let client = DeviceAuthClient::new(&domain, "cid_1", transport()?);

    let result = client.run(&LoginOptions::default()).await?;

    assert_eq!(result.user_id, "user_42");
    assert_eq!(result.email.as_deref(), Some("dev@example.com"));
    assert_eq!(result.refresh_token.as_deref(), Some("rt-1"));
    assert!(result.expires_at > epoch_ms());
    assert_eq!(provider.device_calls.load(Ordering::SeqCst), 1);
    assert_eq!(provider.token_calls.load(Ordering::SeqCst), 2);

    let forms = provider.forms.lock().await;
    assert_eq!(forms[0].get("client_id").map(String::as_str), Some("cid_1"));
    assert_eq!(forms[0].get("scope").map(String::as_str), Some("openid email credentials:read"));
    assert_eq!(
        forms[1].get("grant_type").map(String::as_str),
        Some("urn:ietf:params:oauth:grant-type:device_code")
    );
    assert_eq!(forms[1].get("device_code").map(String::as_str), Some("dc-1"));
    Ok(())
}

fn expired_store(dir: &tempfile::TempDir) -> anyhow::Result<CredentialStore> {
    let store = CredentialStore::new(dir.path().join("credentials.json"));
    store.save(&credentials("at-old", epoch_ms() - 1_000, Some("rt-1")))?;
    Ok(store)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_callers_share_one_http_refresh() -> anyhow::Result<()> {
    let (domain, provider) = spawn_provider(RefreshMode::Succeed, 0).await?;
    let dir = tempfile::tempdir()?;
    let store = expired_store(&dir)?;
    let coordinator = RefreshCoordinator::new(store.clone(), transport()?, RefreshConfig::new(&domain, "cid_1"));

    let mut tasks = tokio::task::JoinSet::new();
    for _ in 0..8 {
        let coordinator = Arc::clone(&coordinator);
        tasks.spawn(async move { coordinator.access_token().await });
    }
    while let Some(joined) = tasks.join_next().await {
        assert_eq!(joined?.map_err(|e| anyhow::anyhow!("{e}"))?, "at-refreshed");
    }

    assert_eq!(provider.token_calls.load(Ordering::SeqCst), 1);
    let saved = store.get().ok_or_else(|| anyhow::anyhow!("credentials missing"))?;
    assert_eq!(saved.refresh_token.as_deref(), Some("rt-2"));
    let forms = provider.forms.lock().await;
    assert_eq!(forms[0].get("grant_type").map(String::as_str), Some("refresh_token"));
    assert_eq!(forms[0].get("refresh_token").map(String::as_str), Some("rt-1"));
    Ok(())
}

#[tokio::test]
async fn invalid_grant_over_http_requires_login() -> anyhow::Result<()> {
    let (domain, _provider) = spawn_provider(RefreshMode::InvalidGrant, 0).await?;
    let dir = tempfile::tempdir()?;
    let coordinator = RefreshCoordinator::new(expired_store(&dir)?, transport()?, RefreshConfig::new(&domain, "cid_1"));

    let err = coordinator.access_token().await.err().ok_or_else(|| anyhow::anyhow!("expected error"))?;

    assert!(matches!(err, CredentialError::Refresh(ref e) if e.is_permanent()), "{err}");
    assert!(err.requires_login());
    Ok(())
}

#[tokio::test]
async fn provider_outage_is_transient() -> anyhow::Result<()> {
    let (domain, _provider) = spawn_provider(RefreshMode::Unavailable, 0).await?;
    let dir = tempfile::tempdir()?;
    let coordinator = RefreshCoordinator::new(expired_store(&dir)?, transport()?, RefreshConfig::new(&domain, "cid_1"));

    let err = coordinator.access_token().await.err().ok_or_else(|| anyhow::anyhow!("expected error"))?;

    assert!(matches!(err, CredentialError::Refresh(ref e) if !e.is_permanent()), "{err}");
    assert!(err.to_string().contains("503"), "{err}");
    assert_eq!(coordinator.consecutive_failures(), 1);
    Ok(())
}

#[tokio::test]
async fn truncated_body_is_no_response() -> anyhow::Result<()> {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        if let Ok((mut stream, _)) = listener.accept().await {
            let mut buf = [0u8; 4096];
            let _ = stream.read(&mut buf).await;
            let _ = stream
                .write_all(b"HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: 100\r\n\r\n{\"acc")
                .await;
        }
    });

    let transport = HttpTransport::new()?;
    let result = transport.post_form(&format!("http://{addr}/oauth2/token"), &[("grant_type", "refresh_token")]).await;

    assert!(result.is_err(), "expected read failure, got {:?}", result.map(|r| r.status));
    Ok(())
}
