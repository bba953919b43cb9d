// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Slash-command parsing and dispatch against active sessions.
//!
//! Channels that permit commands route any message beginning with `/`
//! through [`CommandManager::dispatch_line`] before falling back to the
//! normal agent loop. Handlers only see the [`SessionProvider`] façade, not
//! the concrete session store; [`KernelSessionProvider`] is the production
//! implementation backed by `gateway-core`'s `Kernel`.

mod commands;
mod kernel_provider;
mod manager;
mod provider;

pub use commands::{
    ClearCommand, ClearToolCommand, CommandArgs, CommandHandler, CommandResult, CompactCommand,
    HeartbeatCommand, HelpCommand, SkillsCommand, StatusCommand,
};
pub use kernel_provider::KernelSessionProvider;
pub use manager::{builtin_commands, CommandManager};
pub use provider::{SessionProvider, SessionSummary};
