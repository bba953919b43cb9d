// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Process-wide registry mapping a command name (and its aliases, all
//! lowercased) to a handler.

use std::collections::HashMap;
use std::sync::Arc;

use crate::commands::{CommandArgs, CommandHandler, CommandResult};
use crate::provider::SessionProvider;

pub struct CommandManager {
    handlers: HashMap<String, Arc<dyn CommandHandler>>,
}

impl Default for CommandManager {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandManager {
    pub fn new() -> Self {
        Self { handlers: HashMap::new() }
    }

    /// Register a handler under `name` and any `aliases`. Names are matched
    /// case-insensitively; stored lowercased.
    pub fn register(&mut self, name: &str, aliases: &[&str], handler: Arc<dyn CommandHandler>) {
        self.handlers.insert(name.to_lowercase(), handler.clone());
        for alias in aliases {
            self.handlers.insert(alias.to_lowercase(), handler.clone());
        }
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.handlers.contains_key(&name.to_lowercase())
    }

    /// Parse `line` as `/name rest...` and dispatch if `name` is known.
    /// Returns `None` if `line` doesn't start with `/` or names an unknown
    /// command — callers fall through to normal chat in that case.
    pub async fn dispatch_line(
        &self,
        provider: &dyn SessionProvider,
        line: &str,
        session_key: gateway_bus::SessionKey,
        user_id: Option<String>,
    ) -> Option<CommandResult> {
        let line = line.trim();
        let rest = line.strip_prefix('/')?;
        let (name, raw_args) = match rest.split_once(char::is_whitespace) {
            Some((name, args)) => (name, args.trim_start().to_string()),
            None => (rest, String::new()),
        };
        let handler = self.handlers.get(&name.to_lowercase())?;
        Some(
            handler
                .handle(provider, CommandArgs { session_key, user_id, raw_args })
                .await,
        )
    }
}

/// Builds a manager with every built-in command registered under the names
/// and aliases the Commands Subsystem specifies.
pub fn builtin_commands() -> CommandManager {
    use crate::commands::*;

    let mut manager = CommandManager::new();
    manager.register("status", &[], Arc::new(StatusCommand));
    manager.register("compact", &[], Arc::new(CompactCommand));
    manager.register("clear", &["reset"], Arc::new(ClearCommand));
    manager.register("skills", &[], Arc::new(SkillsCommand));
    manager.register("heartbeat", &[], Arc::new(HeartbeatCommand));
    manager.register("cleartool", &[], Arc::new(ClearToolCommand));
    manager.register(
        "help",
        &[],
        Arc::new(HelpCommand {
            available: vec![
                ("status", "show session message/token stats"),
                ("compact", "force a compaction pass now"),
                ("clear", "discard session history (alias: /reset)"),
                ("skills", "list available skills"),
                ("heartbeat", "check the session is alive"),
                ("cleartool", "repair orphaned tool_use/tool_result pairs"),
                ("help", "show this message"),
            ],
        }),
    );
    manager
}
