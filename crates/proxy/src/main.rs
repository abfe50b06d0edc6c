// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use clap::Parser;
use tracing::error;

use authgate_proxy::config::ProxyConfig;

#[tokio::main]
async fn main() {
    let config = ProxyConfig::parse();

    if let Err(e) = config.validate() {
        eprintln!("error: {e}");
        std::process::exit(2);
    }

    config.log.init("info");

    if let Err(e) = authgate_proxy::run(config).await {
        error!("fatal: {e:#}");
        std::process::exit(1);
    }
}
