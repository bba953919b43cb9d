// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod cli;

use std::io::Write as _;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use cli::{Cli, Commands, UsersCommands};
use gateway_bus::{CommandBus, EventBus, SessionKey};
use gateway_channels::{ChannelManager, TuiChannel, WhatsAppChannel};
use gateway_commands::{builtin_commands, KernelSessionProvider};
use gateway_config::{Config, UserAccountConfig};
use gateway_core::Kernel;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match &cli.command {
        Commands::Start => run_start(cli.config.as_deref()).await,
        Commands::ShowConfig => show_config(cli.config.as_deref()),
        Commands::Validate => validate_config(cli.config.as_deref()),
        Commands::Users { command } => run_users_command(cli.config.as_deref(), command),
        Commands::Completions { shell } => {
            cli::print_completions(*shell);
            Ok(())
        }
    }
}

fn init_logging(verbose: u8) {
    let default_level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

// ── gateway start ───────────────────────────────────────────────────────────

/// Bring up the kernel, every configured channel, and the HTTP/SSE surface,
/// all sharing one `EventBus`/session store, and block until a shutdown
/// signal arrives.
async fn run_start(config_path: Option<&std::path::Path>) -> anyhow::Result<()> {
    let config = Arc::new(gateway_config::load(config_path)?);

    let events = EventBus::new();
    let (command_bus, command_rx) = CommandBus::new();
    let kernel = Kernel::new(config.clone(), events.clone());
    tokio::spawn(kernel.clone().run(command_rx));

    let commands = builtin_commands();
    let session_provider: Arc<dyn gateway_commands::SessionProvider> =
        Arc::new(KernelSessionProvider::new(kernel.clone()));

    let channels = Arc::new(ChannelManager::new());
    channels
        .register(Arc::new(
            TuiChannel::new(command_bus.clone(), events.clone(), SessionKey::primary())
                .with_commands(commands, session_provider),
        ))
        .await;

    #[cfg(feature = "telegram")]
    for account in &config.channels.telegram {
        let token = resolve_secret(account.token.as_deref(), account.token_env.as_deref())
            .with_context(|| format!("resolving token for telegram channel {:?}", account.label))?;
        channels
            .register(Arc::new(gateway_channels::TelegramChannel::new(
                account.label.clone(),
                token,
                account.allowed_chat_ids.clone(),
            )))
            .await;
    }

    for account in &config.channels.whatsapp {
        let secret = resolve_env(&account.webhook_secret_env)
            .with_context(|| format!("resolving webhook secret for whatsapp channel {:?}", account.label))?;
        channels
            .register(Arc::new(WhatsAppChannel::new(
                account.label.clone(),
                secret,
                account.allowed_numbers.clone(),
            )))
            .await;
    }

    let http_state = gateway_http::AppState::new(kernel.clone(), events.clone(), config.clone());
    let http_bind = config.http.bind.clone();
    let http_handle = tokio::spawn(async move { gateway_http::serve(http_state, &http_bind).await });

    tracing::info!(bind = %config.http.bind, "gateway started");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown signal received");
        }
        result = http_handle => {
            if let Ok(Err(err)) = result {
                tracing::error!(error = %err, "HTTP gateway exited with an error");
            }
        }
    }

    for channel in channels.all().await {
        if let Err(err) = channel.stop().await {
            tracing::warn!(channel = channel.name(), error = %err, "error stopping channel");
        }
    }
    Ok(())
}

/// Resolve a Telegram bot token: an inline value takes priority, otherwise
/// it's read from the environment variable named by `token_env`.
#[cfg(feature = "telegram")]
fn resolve_secret(inline: Option<&str>, env_var: Option<&str>) -> anyhow::Result<String> {
    if let Some(token) = inline {
        return Ok(token.to_string());
    }
    let var = env_var.context("neither `token` nor `token_env` is set")?;
    resolve_env(var)
}

fn resolve_env(var: &str) -> anyhow::Result<String> {
    std::env::var(var).with_context(|| format!("environment variable {var} is not set"))
}

// ── gateway show-config / validate ──────────────────────────────────────────

fn show_config(config_path: Option<&std::path::Path>) -> anyhow::Result<()> {
    let config = gateway_config::load(config_path)?;
    println!("{}", serde_yaml::to_string(&config).unwrap_or_default());
    Ok(())
}

/// Check the effective configuration for problems a malformed or incomplete
/// YAML file would otherwise only surface as a runtime failure: an enabled
/// bot channel missing its credentials, a user table with duplicate
/// usernames or an unparsable password hash, or an HTTP bind address that
/// doesn't parse.
fn validate_config(config_path: Option<&std::path::Path>) -> anyhow::Result<()> {
    let config = gateway_config::load(config_path)?;
    let mut problems = Vec::new();

    if config.http.bind.parse::<std::net::SocketAddr>().is_err() {
        problems.push(format!("http.bind {:?} is not a valid socket address", config.http.bind));
    }

    for account in &config.channels.telegram {
        if account.token.is_none() && account.token_env.is_none() {
            problems.push(format!("telegram channel {:?} has neither token nor token_env set", account.label));
        }
        if account.allowed_chat_ids.is_empty() {
            problems.push(format!("telegram channel {:?} has an empty allowed_chat_ids (accepts nobody)", account.label));
        }
    }

    for account in &config.channels.whatsapp {
        if account.allowed_numbers.is_empty() {
            problems.push(format!("whatsapp channel {:?} has an empty allowed_numbers (accepts nobody)", account.label));
        }
    }

    let mut seen_usernames = std::collections::HashSet::new();
    for account in &config.users.accounts {
        if !seen_usernames.insert(account.username.clone()) {
            problems.push(format!("duplicate username {:?} in users.accounts", account.username));
        }
        if argon2::password_hash::PasswordHash::new(&account.password_hash).is_err() {
            problems.push(format!("user {:?} has a malformed password hash", account.username));
        }
    }
    if let Err(problem) = config.users.validate_owner_invariant() {
        problems.push(problem);
    }

    if problems.is_empty() {
        println!("configuration OK");
        Ok(())
    } else {
        for problem in &problems {
            eprintln!("- {problem}");
        }
        anyhow::bail!("{} problem(s) found", problems.len());
    }
}

// ── gateway users ────────────────────────────────────────────────────────────

fn run_users_command(config_path: Option<&std::path::Path>, command: &UsersCommands) -> anyhow::Result<()> {
    match command {
        UsersCommands::Add { username, password, role } => {
            let password = read_password(password.as_deref(), "New password: ")?;
            let hash = hash_password(&password)?;
            with_config_file(config_path, |config| {
                if config.users.accounts.iter().any(|a| &a.username == username) {
                    anyhow::bail!("user {username:?} already exists; use set-password to change it");
                }
                config.users.accounts.push(UserAccountConfig {
                    username: username.clone(),
                    password_hash: hash,
                    role: (*role).into(),
                    platform_ids: Default::default(),
                    tool_allow: Vec::new(),
                    commands: true,
                });
                Ok(())
            })?;
            println!("added user {username:?}");
            Ok(())
        }
        UsersCommands::SetPassword { username, password } => {
            let password = read_password(password.as_deref(), "New password: ")?;
            let hash = hash_password(&password)?;
            with_config_file(config_path, |config| {
                let account = config
                    .users
                    .accounts
                    .iter_mut()
                    .find(|a| &a.username == username)
                    .with_context(|| format!("no such user {username:?}"))?;
                account.password_hash = hash;
                Ok(())
            })?;
            println!("updated password for {username:?}");
            Ok(())
        }
        UsersCommands::Remove { username } => {
            with_config_file(config_path, |config| {
                let before = config.users.accounts.len();
                config.users.accounts.retain(|a| &a.username != username);
                if config.users.accounts.len() == before {
                    anyhow::bail!("no such user {username:?}");
                }
                Ok(())
            })?;
            println!("removed user {username:?}");
            Ok(())
        }
        UsersCommands::List => {
            let config = gateway_config::load(config_path)?;
            for account in &config.users.accounts {
                println!("{}\t{:?}", account.username, account.role);
            }
            Ok(())
        }
    }
}

fn hash_password(password: &str) -> anyhow::Result<String> {
    use argon2::password_hash::{PasswordHasher, SaltString};
    use argon2::Argon2;
    let salt = SaltString::generate(&mut rand::thread_rng());
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|err| anyhow::anyhow!("hashing password: {err}"))?;
    Ok(hash.to_string())
}

fn read_password(inline: Option<&str>, prompt: &str) -> anyhow::Result<String> {
    if let Some(password) = inline {
        return Ok(password.to_string());
    }
    eprint!("{prompt}");
    std::io::stderr().flush().ok();
    let mut line = String::new();
    std::io::stdin().read_line(&mut line)?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

/// Load the effective config, let `mutate` modify it, then write the whole
/// thing back to the target file (the explicit `--config` path, or the
/// workspace-local default if none was given). Simpler than patching one
/// layer of the search path in place, and consistent with `show-config`
/// already treating the merged config as the thing an operator edits.
fn with_config_file(
    config_path: Option<&std::path::Path>,
    mutate: impl FnOnce(&mut Config) -> anyhow::Result<()>,
) -> anyhow::Result<()> {
    let mut config = gateway_config::load(config_path)?;
    mutate(&mut config)?;

    let target = config_path
        .map(|p| p.to_path_buf())
        .unwrap_or_else(|| std::path::PathBuf::from(".gateway/config.yaml"));
    if let Some(parent) = target.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
    }
    let yaml = serde_yaml::to_string(&config)?;
    std::fs::write(&target, yaml).with_context(|| format!("writing {}", target.display()))?;
    Ok(())
}
