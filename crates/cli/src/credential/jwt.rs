// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Unverified JWT payload decoding.
//!
//! Tokens are decoded for local bookkeeping only (expiry, display name).
//! The signature is not checked: trust decisions belong to the provider
//! and the upstream that receives the token.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;

/// The claims this client cares about.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Claims {
    pub sub: Option<String>,
    pub email: Option<String>,
    /// Expiry as seconds since Unix epoch.
    pub exp: Option<u64>,
}

/// Decode the payload of a compact `header.payload.signature` token.
///
/// Returns `None` for anything that is not three segments with a
/// base64url JSON object in the middle.
pub fn decode(token: &str) -> Option<Claims> {
    let mut parts = token.split('.');
    let (_header, payload, _signature) = (parts.next()?, parts.next()?, parts.next()?);
    if parts.next().is_some() {
        return None;
    }

    let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    let value: serde_json::Value = serde_json::from_slice(&bytes).ok()?;
    let obj = value.as_object()?;

    let text = |key: &str| obj.get(key).and_then(|v| v.as_str()).map(str::to_owned);
    let exp = obj.get("exp").and_then(|v| {
        v.as_u64().or_else(|| v.as_f64().filter(|f| f.is_finite() && *f >= 0.0).map(|f| f as u64))
    });

    Some(Claims { sub: text("sub"), email: text("email"), exp })
}

#[cfg(test)]
#[path = "jwt_tests.rs"]
mod tests;
