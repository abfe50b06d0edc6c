// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! CLI subcommands: `login`, `logout`, `status`, `token`.

pub mod login;
pub mod logout;
pub mod status;
pub mod token;

use crate::config::{Command, Config};

/// Dispatch a parsed command. Returns a process exit code.
pub async fn run(config: Config) -> i32 {
    match config.command {
        Command::Login(ref args) => login::run(&config.auth, args).await,
        Command::Logout => logout::run(&config.auth),
        Command::Status(ref args) => status::run(&config.auth, args),
        Command::Token => token::run(&config.auth).await,
    }
}
