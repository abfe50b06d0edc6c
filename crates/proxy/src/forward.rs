// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Request forwarding: URL construction, header rewriting, streaming relay.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::body::{Body, HttpBody};
use axum::extract::{Request, State};
use axum::http::header::{AUTHORIZATION, HOST};
use axum::http::{HeaderMap, HeaderValue};
use axum::response::{IntoResponse, Response};
use tracing::{debug, warn};

use authgate::credential::refresh::RefreshCoordinator;

use crate::error::ProxyError;

/// Connection-scoped headers never relayed in either direction.
pub const HOP_BY_HOP_HEADERS: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Query parameters the upstream rejects.
pub const STRIPPED_QUERY_PARAMS: &[&str] = &["beta"];

pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    for name in HOP_BY_HOP_HEADERS {
        headers.remove(name);
    }
}

/// Drop stripped parameters, keeping every other pair byte for byte.
/// Returns `None` when nothing remains.
pub fn filter_query(query: &str) -> Option<String> {
    let kept: Vec<&str> = query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .filter(|pair| {
            let key = pair.split_once('=').map_or(*pair, |(k, _)| k);
            !STRIPPED_QUERY_PARAMS.contains(&key)
        })
        .collect();
    if kept.is_empty() {
        None
    } else {
        Some(kept.join("&"))
    }
}

/// The single fixed upstream.
#[derive(Debug, Clone)]
pub struct Upstream {
    origin: String,
    host: String,
    base_path: String,
}

impl Upstream {
    pub fn parse(raw: &str) -> anyhow::Result<Self> {
        let url = reqwest::Url::parse(raw).with_context(|| format!("invalid upstream URL {raw:?}"))?;
        if !matches!(url.scheme(), "http" | "https") {
            anyhow::bail!("upstream URL must be http or https, got {raw:?}");
        }
        let Some(host_str) = url.host_str() else {
            anyhow::bail!("upstream URL has no host: {raw:?}");
        };
        let host = match url.port() {
            Some(port) => format!("{host_str}:{port}"),
            None => host_str.to_owned(),
        };
        Ok(Self {
            origin: format!("{}://{host}", url.scheme()),
            host,
            base_path: url.path().trim_end_matches('/').to_owned(),
        })
    }

    /// Value for the outbound `Host` header.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Upstream base path concatenated with the inbound path, plus the
    /// filtered query.
    pub fn target_url(&self, path: &str, query: Option<&str>) -> String {
        let mut url = format!("{}{}{}", self.origin, self.base_path, path);
        if let Some(query) = query.and_then(filter_query) {
            url.push('?');
            url.push_str(&query);
        }
        url
    }
}

/// Shared state for the forwarding handler.
pub struct ProxyState {
    pub upstream: Upstream,
    pub client: reqwest::Client,
    pub coordinator: Arc<RefreshCoordinator>,
    pub upstream_timeout: Duration,
}

impl ProxyState {
    pub fn new(
        upstream: Upstream,
        coordinator: Arc<RefreshCoordinator>,
        upstream_timeout: Duration,
    ) -> anyhow::Result<Self> {
        authgate::ensure_crypto();
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .connect_timeout(upstream_timeout)
            .read_timeout(upstream_timeout)
            .build()
            .context("build upstream client")?;
        Ok(Self { upstream, client, coordinator, upstream_timeout })
    }
}

/// Forward any request to the upstream with a live bearer token.
pub async fn proxy_request(State(state): State<Arc<ProxyState>>, req: Request) -> Response {
    let token = match state.coordinator.access_token().await {
        Ok(token) => token,
        Err(e) => {
            warn!(err = %e, "no usable credentials, rejecting request");
            return ProxyError::CredentialsUnavailable.to_http_response(e.to_string()).into_response();
        }
    };

    let (parts, body) = req.into_parts();
    let url = state.upstream.target_url(parts.uri.path(), parts.uri.query());

    let mut headers = parts.headers;
    strip_hop_by_hop(&mut headers);
    let bearer = match HeaderValue::from_str(&format!("Bearer {token}")) {
        Ok(mut value) => {
            value.set_sensitive(true);
            value
        }
        Err(_) => {
            return ProxyError::Internal
                .to_http_response("stored access token is not a valid header value")
                .into_response();
        }
    };
    headers.insert(AUTHORIZATION, bearer);
    match HeaderValue::from_str(state.upstream.host()) {
        Ok(host) => {
            headers.insert(HOST, host);
        }
        Err(_) => {
            headers.remove(HOST);
        }
    }

    let mut outbound = state.client.request(parts.method, &url).headers(headers);
    if body.size_hint().exact() != Some(0) {
        outbound = outbound.body(reqwest::Body::wrap_stream(body.into_data_stream()));
    }

    let upstream_resp = match tokio::time::timeout(state.upstream_timeout, outbound.send()).await {
        Ok(Ok(resp)) => resp,
        Ok(Err(e)) => {
            let code = classify(&e);
            warn!(err = %e, code = code.as_str(), "upstream request failed");
            return code.to_http_response(format!("upstream request failed: {e}")).into_response();
        }
        Err(_) => {
            warn!(timeout_secs = state.upstream_timeout.as_secs(), "upstream request timed out");
            return ProxyError::UpstreamTimeout
                .to_http_response(format!(
                    "upstream did not respond within {}s",
                    state.upstream_timeout.as_secs()
                ))
                .into_response();
        }
    };

    debug!(status = upstream_resp.status().as_u16(), "upstream responded");
    relay(upstream_resp)
}

/// Stream an upstream response back to the client.
fn relay(upstream_resp: reqwest::Response) -> Response {
    let status = upstream_resp.status();
    let mut headers = upstream_resp.headers().clone();
    strip_hop_by_hop(&mut headers);

    let mut response = Response::new(Body::from_stream(upstream_resp.bytes_stream()));
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}

/// Map a transport failure to the proxy's error taxonomy.
pub fn classify(err: &reqwest::Error) -> ProxyError {
    if err.is_timeout() {
        ProxyError::UpstreamTimeout
    } else if err.is_connect() {
        ProxyError::UpstreamUnavailable
    } else {
        ProxyError::Internal
    }
}

#[cfg(test)]
#[path = "forward_tests.rs"]
mod tests;
