// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `authgate login`: device authorization flow.

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::AuthArgs;
use crate::credential::device_code::{DeviceAuthClient, PollOptions};
use crate::credential::oauth::{FormTransport, HttpTransport};
use crate::credential::Credentials;
use crate::error::RELOGIN_HINT;

#[derive(Debug, Clone, clap::Args)]
pub struct LoginArgs {
    /// Seconds to wait for the device to be approved.
    #[arg(long, default_value = "300")]
    pub timeout_secs: u64,
}

/// Run `authgate login`. Ctrl-C cancels the wait.
pub async fn run(auth: &AuthArgs, args: &LoginArgs) -> i32 {
    let transport: Arc<dyn FormTransport> = match HttpTransport::new() {
        Ok(transport) => Arc::new(transport),
        Err(e) => {
            eprintln!("error: {e:#}");
            return 1;
        }
    };

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    let watcher = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            interrupt.cancel();
        }
    });

    let result = login(auth, args, transport, cancel, &mut std::io::stdout()).await;
    watcher.abort();

    match result {
        Ok(_) => 0,
        Err(e) => {
            eprintln!("error: {e:#}");
            1
        }
    }
}

/// Request a code, print instructions to `out`, poll, and save the result.
pub async fn login<W: Write>(
    auth: &AuthArgs,
    args: &LoginArgs,
    transport: Arc<dyn FormTransport>,
    cancel: CancellationToken,
    out: &mut W,
) -> anyhow::Result<Credentials> {
    let client = DeviceAuthClient::new(auth.provider_domain(), &auth.client_id, transport);
    let device = client.begin(&auth.scopes()).await.map_err(|e| anyhow::anyhow!("{e}; {RELOGIN_HINT}"))?;

    let session = device.session();
    writeln!(out, "To sign in, open {} and enter the code:", session.verification_uri)?;
    writeln!(out)?;
    writeln!(out, "    {}", session.user_code)?;
    writeln!(out)?;
    if let Some(ref uri) = session.verification_uri_complete {
        writeln!(out, "Or open {uri}")?;
    }
    writeln!(out, "Waiting for authorization...")?;
    out.flush()?;

    let opts = PollOptions {
        timeout: Duration::from_secs(args.timeout_secs),
        on_interval_change: Some(Arc::new(|interval: Duration| {
            eprintln!("Provider asked to slow down; polling every {}s", interval.as_secs());
        })),
        cancel,
    };
    let token = device.complete(&opts).await.map_err(|e| anyhow::anyhow!("{e}; {RELOGIN_HINT}"))?;

    let creds = token.into_credentials();
    let store = auth.store();
    store.save(&creds).with_context(|| format!("save credentials to {}", store.path().display()))?;
    info!(user = %creds.user_id, "login complete");

    writeln!(out, "Logged in as {}", creds.display_name())?;
    Ok(creds)
}
