// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::{generate, Shell};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "gateway",
    about = "Multi-channel AI agent gateway: terminal, chat-bot, and HTTP/SSE front ends over one agent loop",
    version,
    long_about = None,
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to config file (overrides the layered auto-discovery search).
    #[arg(long, short = 'c', global = true)]
    pub config: Option<PathBuf>,

    /// Increase verbosity (-v = debug, -vv = trace).
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the gateway: agent kernel, configured bot channels, the local
    /// terminal channel, and the HTTP/SSE web app, all sharing one session
    /// store.
    Start,

    /// Print the effective (fully merged) configuration and exit.
    ShowConfig,

    /// Validate the effective configuration without starting anything.
    ///
    /// Exits non-zero with a description of the first problem found: an
    /// enabled bot channel missing its credentials, a duplicate or malformed
    /// user account, or a bind address that fails to parse.
    Validate,

    /// Manage HTTP user accounts (see `http.insecure_dev_mode` in the
    /// config for disabling auth entirely on a loopback-only deployment).
    Users {
        #[command(subcommand)]
        command: UsersCommands,
    },

    /// Generate a shell completion script.
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Subcommand, Debug)]
pub enum UsersCommands {
    /// Add a new user account, hashing the password with Argon2id.
    Add {
        username: String,
        /// Prompted for interactively if omitted.
        #[arg(long)]
        password: Option<String>,
        #[arg(long, value_enum, default_value = "operator")]
        role: UserRoleArg,
    },

    /// Replace an existing user's password hash.
    SetPassword {
        username: String,
        #[arg(long)]
        password: Option<String>,
    },

    /// Remove a user account.
    Remove { username: String },

    /// List configured accounts (usernames and roles; hashes are never shown).
    List,
}

/// Mirrors `gateway_config::UserRole`; kept separate so this crate doesn't
/// need `gateway-config` to derive `ValueEnum` for a type it doesn't own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum UserRoleArg {
    Owner,
    Operator,
    Viewer,
}

impl From<UserRoleArg> for gateway_config::UserRole {
    fn from(role: UserRoleArg) -> Self {
        match role {
            UserRoleArg::Owner => gateway_config::UserRole::Owner,
            UserRoleArg::Operator => gateway_config::UserRole::Operator,
            UserRoleArg::Viewer => gateway_config::UserRole::Viewer,
        }
    }
}

pub fn print_completions(shell: Shell) {
    let mut cmd = Cli::command();
    generate(shell, &mut cmd, "gateway", &mut std::io::stdout());
}
