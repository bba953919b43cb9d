// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! The `Channel` trait every transport driver (TUI, Telegram-style,
//! WhatsApp-style, HTTP/SSE) implements to plug into the [`crate::manager::ChannelManager`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gateway_bus::ControlEvent;

/// Point-in-time health snapshot for a channel instance.
#[derive(Debug, Clone, Default)]
pub struct ChannelStatus {
    pub running: bool,
    pub connected: bool,
    pub started_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

#[async_trait]
pub trait Channel: Send + Sync {
    fn name(&self) -> &str;

    async fn start(&self) -> anyhow::Result<()>;
    async fn stop(&self) -> anyhow::Result<()>;

    /// Apply a new configuration blob without requiring the manager to
    /// restart the instance. Most channels simply stop and let the manager
    /// recreate them; only channels that can swap credentials/settings live
    /// should override this with something cheaper.
    async fn reload(&self, _config: serde_json::Value) -> anyhow::Result<()> {
        Ok(())
    }

    fn status(&self) -> ChannelStatus;

    /// Push `text` to this channel's default/current recipient.
    async fn send(&self, text: &str) -> anyhow::Result<()>;

    /// Attributed mirror of a conversation that happened on `source_channel`.
    async fn send_mirror(
        &self,
        source_channel: &str,
        user_msg: &str,
        agent_response: &str,
    ) -> anyhow::Result<()>;

    /// Can this channel currently reach `user`?
    fn has_user(&self, user: &str) -> bool;

    /// Deliver a single live [`ControlEvent`]. Returns `true` only if the
    /// channel actually rendered it live; batch-only channels always return
    /// `false` and rely on the final `send`/`send_mirror` call instead.
    fn is_streaming(&self) -> bool;
    async fn stream_event(&self, user: &str, event: &ControlEvent) -> bool;

    /// Can this channel render a typing-indicator + delayed-send illusion?
    fn supports_ghostwrite(&self) -> bool;
    async fn deliver_ghostwrite(&self, user: &str, message: &str) -> anyhow::Result<()>;
}
