// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Built-in slash commands. Each one only talks to the session store through
//! [`SessionProvider`], never the concrete `Agent`/`Session` types, so they
//! stay testable without spinning up a model provider.

use async_trait::async_trait;
use gateway_bus::SessionKey;

use crate::provider::SessionProvider;

/// Arguments a handler receives for one invocation.
#[derive(Debug, Clone)]
pub struct CommandArgs {
    pub session_key: SessionKey,
    pub user_id: Option<String>,
    /// Everything after the command name, unparsed.
    pub raw_args: String,
}

/// What a handler produces. `error` is set instead of `text` on failure;
/// `markdown` tells the rendering channel whether `text` needs escaping.
#[derive(Debug, Clone, Default)]
pub struct CommandResult {
    pub text: String,
    pub markdown: bool,
    pub error: Option<String>,
}

impl CommandResult {
    pub fn ok(text: impl Into<String>) -> Self {
        Self { text: text.into(), markdown: false, error: None }
    }

    pub fn markdown(text: impl Into<String>) -> Self {
        Self { text: text.into(), markdown: true, error: None }
    }

    pub fn err(message: impl Into<String>) -> Self {
        Self { text: String::new(), markdown: false, error: Some(message.into()) }
    }
}

#[async_trait]
pub trait CommandHandler: Send + Sync {
    async fn handle(&self, provider: &dyn SessionProvider, args: CommandArgs) -> CommandResult;
}

pub struct StatusCommand;

#[async_trait]
impl CommandHandler for StatusCommand {
    async fn handle(&self, provider: &dyn SessionProvider, args: CommandArgs) -> CommandResult {
        match provider.summary(&args.session_key).await {
            Some(summary) => CommandResult::ok(format!(
                "session {key}: {messages} messages, {used}/{max} tokens, \
                 {compactions} compaction(s), {checkpoints} checkpoint(s)",
                key = args.session_key,
                messages = summary.message_count,
                used = summary.total_tokens,
                max = summary.max_tokens,
                compactions = summary.compaction_count,
                checkpoints = summary.checkpoint_count,
            )),
            None => CommandResult::err("no session found for this conversation yet"),
        }
    }
}

pub struct CompactCommand;

#[async_trait]
impl CommandHandler for CompactCommand {
    async fn handle(&self, provider: &dyn SessionProvider, args: CommandArgs) -> CommandResult {
        match provider.compact(&args.session_key).await {
            Ok((before, after)) => {
                CommandResult::ok(format!("compacted: {before} -> {after} tokens"))
            }
            Err(err) => CommandResult::err(format!("compaction failed: {err:#}")),
        }
    }
}

/// `/clear`, aliased `/reset`.
pub struct ClearCommand;

#[async_trait]
impl CommandHandler for ClearCommand {
    async fn handle(&self, provider: &dyn SessionProvider, args: CommandArgs) -> CommandResult {
        match provider.clear(&args.session_key).await {
            Ok(()) => CommandResult::ok("session history cleared"),
            Err(err) => CommandResult::err(format!("clear failed: {err:#}")),
        }
    }
}

pub struct SkillsCommand;

#[async_trait]
impl CommandHandler for SkillsCommand {
    async fn handle(&self, provider: &dyn SessionProvider, args: CommandArgs) -> CommandResult {
        let skills = provider.list_skills(&args.session_key).await;
        if skills.is_empty() {
            CommandResult::ok("no skills available")
        } else {
            CommandResult::markdown(format!("available skills:\n- {}", skills.join("\n- ")))
        }
    }
}

pub struct HelpCommand {
    pub available: Vec<(&'static str, &'static str)>,
}

#[async_trait]
impl CommandHandler for HelpCommand {
    async fn handle(&self, _provider: &dyn SessionProvider, _args: CommandArgs) -> CommandResult {
        let lines: Vec<String> = self
            .available
            .iter()
            .map(|(name, desc)| format!("/{name} — {desc}"))
            .collect();
        CommandResult::markdown(lines.join("\n"))
    }
}

/// No-op context injection used by the heartbeat/scheduler path to nudge a
/// session without producing a visible reply; handlers that want this should
/// route `ephemeral: true` through `ControlCommand::ProcessMessage` instead
/// of this command. This command just reports that the session is alive.
pub struct HeartbeatCommand;

#[async_trait]
impl CommandHandler for HeartbeatCommand {
    async fn handle(&self, provider: &dyn SessionProvider, args: CommandArgs) -> CommandResult {
        match provider.summary(&args.session_key).await {
            Some(_) => CommandResult::ok("alive"),
            None => CommandResult::ok("alive (no session yet)"),
        }
    }
}

/// `/cleartool` — repair tool: drop orphaned `tool_use`/`tool_result` pairs.
pub struct ClearToolCommand;

#[async_trait]
impl CommandHandler for ClearToolCommand {
    async fn handle(&self, provider: &dyn SessionProvider, args: CommandArgs) -> CommandResult {
        match provider.clean_orphaned_tool_messages(&args.session_key).await {
            Ok(0) => CommandResult::ok("no orphaned tool messages found"),
            Ok(n) => CommandResult::ok(format!("removed {n} orphaned tool message(s)")),
            Err(err) => CommandResult::err(format!("repair failed: {err:#}")),
        }
    }
}
