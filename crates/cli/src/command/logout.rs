// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use tracing::info;

use crate::config::AuthArgs;

/// Run `authgate logout`. Succeeds when nothing is stored.
pub fn run(auth: &AuthArgs) -> i32 {
    let store = auth.store();
    let had_credentials = store.has();
    if let Err(e) = store.clear() {
        eprintln!("error: {e:#}");
        return 1;
    }
    if had_credentials {
        info!(path = %store.path().display(), "credentials removed");
        println!("Logged out");
    } else {
        println!("Not logged in");
    }
    0
}
