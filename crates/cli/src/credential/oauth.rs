// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! OAuth wire types, endpoint layout, and the form-post transport.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

use crate::credential::jwt;

/// Grant type used while polling the token endpoint.
pub const DEVICE_CODE_GRANT: &str = "urn:ietf:params:oauth:grant-type:device_code";

/// Lifetime assumed when neither the token nor the provider declares one.
pub const DEFAULT_TOKEN_LIFETIME: Duration = Duration::from_secs(15 * 60);

/// Timeout applied to each individual OAuth request.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Provider endpoints derived from its domain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub device_authorization: String,
    pub token: String,
}

impl Endpoints {
    pub fn for_domain(provider_domain: &str) -> Self {
        let base = provider_domain.trim_end_matches('/');
        Self {
            device_authorization: format!("{base}/oauth2/device_authorization"),
            token: format!("{base}/oauth2/token"),
        }
    }
}

/// Successful token endpoint response (device poll or refresh).
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub id_token: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Token lifetime in seconds.
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub token_type: Option<String>,
}

/// OAuth error response body.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenErrorResponse {
    pub error: String,
    #[serde(default)]
    pub error_description: Option<String>,
}

/// Parse an OAuth error body, if the text is one.
pub fn parse_error(body: &str) -> Option<TokenErrorResponse> {
    serde_json::from_str::<TokenErrorResponse>(body).ok()
}

/// Absolute expiry (epoch ms) for a freshly issued access token.
///
/// Prefers the token's own `exp` claim, then the provider's `expires_in`,
/// then [`DEFAULT_TOKEN_LIFETIME`].
pub fn resolve_expires_at(access_token: &str, expires_in: Option<u64>, now_ms: u64) -> u64 {
    if let Some(exp) = jwt::decode(access_token).and_then(|c| c.exp) {
        return exp.saturating_mul(1000);
    }
    match expires_in {
        Some(secs) => now_ms.saturating_add(secs.saturating_mul(1000)),
        None => now_ms.saturating_add(DEFAULT_TOKEN_LIFETIME.as_millis() as u64),
    }
}

/// Raw reply from a form post: status plus body text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormReply {
    pub status: u16,
    pub body: String,
}

impl FormReply {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

pub type FormFuture<'a> = Pin<Box<dyn Future<Output = anyhow::Result<FormReply>> + Send + 'a>>;

/// Sends form-encoded POSTs to the identity provider.
///
/// An `Err` means no response arrived at all; any HTTP status, including
/// errors, comes back as `Ok(FormReply)`.
pub trait FormTransport: Send + Sync {
    fn post_form<'a>(&'a self, url: &'a str, form: &'a [(&'a str, &'a str)]) -> FormFuture<'a>;
}

/// Production transport backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> anyhow::Result<Self> {
        crate::ensure_crypto();
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("build OAuth HTTP client")?;
        Ok(Self { client })
    }
}

impl FormTransport for HttpTransport {
    fn post_form<'a>(&'a self, url: &'a str, form: &'a [(&'a str, &'a str)]) -> FormFuture<'a> {
        Box::pin(async move {
            let resp = self.client.post(url).form(form).send().await?;
            let status = resp.status().as_u16();
            // A truncated body counts as no response at all.
            let body = resp.text().await.context("read response body")?;
            Ok(FormReply { status, body })
        })
    }
}

#[cfg(test)]
#[path = "oauth_tests.rs"]
mod tests;
