// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! The façade command handlers see instead of the session store's actual
//! shape. `gateway-core`'s `Kernel` is the production implementation; tests
//! use a lightweight fake.

use async_trait::async_trait;
use gateway_bus::SessionKey;

/// Snapshot a handler needs to answer `/status`.
#[derive(Debug, Clone)]
pub struct SessionSummary {
    pub message_count: usize,
    pub total_tokens: usize,
    pub max_tokens: usize,
    pub compaction_count: usize,
    pub checkpoint_count: usize,
}

#[async_trait]
pub trait SessionProvider: Send + Sync {
    async fn summary(&self, key: &SessionKey) -> Option<SessionSummary>;

    /// Force a compaction pass. Returns tokens before/after.
    async fn compact(&self, key: &SessionKey) -> anyhow::Result<(usize, usize)>;

    /// Discard the session's message history, keeping the session alive.
    async fn clear(&self, key: &SessionKey) -> anyhow::Result<()>;

    /// Names of skills available to this session.
    async fn list_skills(&self, key: &SessionKey) -> Vec<String>;

    /// Repair tool: drop any `tool_use` with no matching `tool_result` (or
    /// vice versa). Returns how many messages were removed.
    async fn clean_orphaned_tool_messages(&self, key: &SessionKey) -> anyhow::Result<usize>;
}
