// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;

use tracing::warn;

use crate::config::AuthArgs;
use crate::credential::oauth::HttpTransport;
use crate::credential::refresh::{RefreshCoordinator, DEFAULT_REFRESH_THRESHOLD};
use crate::error::CredentialError;

/// Run `authgate token`: print a live access token for scripts.
pub async fn run(auth: &AuthArgs) -> i32 {
    let transport = match HttpTransport::new() {
        Ok(transport) => transport,
        Err(e) => {
            eprintln!("error: {e:#}");
            return 1;
        }
    };
    let coordinator =
        RefreshCoordinator::new(auth.store(), Arc::new(transport), auth.refresh_config(DEFAULT_REFRESH_THRESHOLD));
    match current_token(&coordinator).await {
        Ok(token) => {
            println!("{token}");
            0
        }
        Err(e) => {
            eprintln!("error: {e}");
            1
        }
    }
}

/// Like [`RefreshCoordinator::access_token`], but a one-shot process waits
/// for a background refresh instead of exiting under it.
pub async fn current_token(coordinator: &Arc<RefreshCoordinator>) -> Result<String, CredentialError> {
    let token = coordinator.access_token().await?;
    if !coordinator.is_refreshing() {
        return Ok(token);
    }
    match coordinator.refresh_now().await {
        Ok(()) => Ok(coordinator.store().get().map(|c| c.access_token).unwrap_or(token)),
        Err(e) => {
            warn!(err = %e, "background refresh failed, using current token");
            Ok(token)
        }
    }
}

#[cfg(test)]
#[path = "token_tests.rs"]
mod tests;
