// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! [`SessionProvider`] implemented against a live [`Kernel`], so slash
//! commands can act on the same sessions the channels and HTTP surface talk
//! to instead of only the in-memory fake the other tests use.

use std::sync::Arc;

use async_trait::async_trait;
use gateway_bus::SessionKey;
use gateway_core::Kernel;

use crate::provider::{SessionProvider, SessionSummary};

pub struct KernelSessionProvider {
    kernel: Arc<Kernel>,
}

impl KernelSessionProvider {
    pub fn new(kernel: Arc<Kernel>) -> Self {
        Self { kernel }
    }
}

#[async_trait]
impl SessionProvider for KernelSessionProvider {
    async fn summary(&self, key: &SessionKey) -> Option<SessionSummary> {
        let stats = self.kernel.session_stats(key).await?;
        Some(SessionSummary {
            message_count: stats.message_count,
            total_tokens: stats.total_tokens,
            max_tokens: stats.max_tokens,
            compaction_count: stats.compaction_count,
            checkpoint_count: stats.checkpoint_count,
        })
    }

    async fn compact(&self, key: &SessionKey) -> anyhow::Result<(usize, usize)> {
        self.kernel.force_compact(key).await
    }

    async fn clear(&self, key: &SessionKey) -> anyhow::Result<()> {
        self.kernel.clear_session(key).await
    }

    async fn list_skills(&self, _key: &SessionKey) -> Vec<String> {
        self.kernel.list_skills()
    }

    async fn clean_orphaned_tool_messages(&self, key: &SessionKey) -> anyhow::Result<usize> {
        self.kernel.clean_orphaned_tool_messages(key).await
    }
}
