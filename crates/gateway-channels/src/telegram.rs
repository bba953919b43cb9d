// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Telegram-style channel. Batch (`is_streaming` is always false), ghostwrite
//! supported via a "typing…" action followed by a delayed send. Scaffolded
//! on the teacher's `teloxide`-based feature flag; only the `Channel` trait
//! surface is implemented here, not the bot's inbound update loop.

use std::sync::Mutex as StdMutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use teloxide::requests::Requester;
use teloxide::types::{ChatAction, ChatId};
use teloxide::Bot;

use gateway_bus::ControlEvent;

use crate::channel::{Channel, ChannelStatus};

const GHOSTWRITE_TYPING_DELAY: Duration = Duration::from_millis(1200);

pub struct TelegramChannel {
    label: String,
    bot: Bot,
    allowed_chat_ids: Vec<i64>,
    status: StdMutex<ChannelStatus>,
}

impl TelegramChannel {
    pub fn new(label: String, token: String, allowed_chat_ids: Vec<i64>) -> Self {
        Self {
            label,
            bot: Bot::new(token),
            allowed_chat_ids,
            status: StdMutex::new(ChannelStatus::default()),
        }
    }
}

#[async_trait]
impl Channel for TelegramChannel {
    fn name(&self) -> &str {
        &self.label
    }

    async fn start(&self) -> anyhow::Result<()> {
        // Polling/webhook ingestion (the bot wire protocol) is out of scope;
        // this only marks the channel ready to send.
        let mut status = self.status.lock().unwrap();
        status.running = true;
        status.connected = true;
        status.started_at = Some(Utc::now());
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        let mut status = self.status.lock().unwrap();
        status.running = false;
        status.connected = false;
        Ok(())
    }

    fn status(&self) -> ChannelStatus {
        self.status.lock().unwrap().clone()
    }

    async fn send(&self, text: &str) -> anyhow::Result<()> {
        for chat_id in &self.allowed_chat_ids {
            self.bot.send_message(ChatId(*chat_id), text).await?;
        }
        Ok(())
    }

    async fn send_mirror(
        &self,
        source_channel: &str,
        user_msg: &str,
        agent_response: &str,
    ) -> anyhow::Result<()> {
        self.send(&format!("[{source_channel}] {user_msg}\n{agent_response}"))
            .await
    }

    fn has_user(&self, user: &str) -> bool {
        user.parse::<i64>()
            .map(|id| self.allowed_chat_ids.contains(&id))
            .unwrap_or(false)
    }

    fn is_streaming(&self) -> bool {
        false
    }

    async fn stream_event(&self, _user: &str, _event: &ControlEvent) -> bool {
        false
    }

    fn supports_ghostwrite(&self) -> bool {
        true
    }

    async fn deliver_ghostwrite(&self, _user: &str, message: &str) -> anyhow::Result<()> {
        for chat_id in &self.allowed_chat_ids {
            let _ = self.bot.send_chat_action(ChatId(*chat_id), ChatAction::Typing).await;
        }
        tokio::time::sleep(GHOSTWRITE_TYPING_DELAY).await;
        self.send(message).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn has_user_parses_numeric_chat_ids() {
        let ch = TelegramChannel::new("tg-main".into(), "dummy-token".into(), vec![42, -100555]);
        assert!(ch.has_user("42"));
        assert!(ch.has_user("-100555"));
        assert!(!ch.has_user("99"));
        assert!(!ch.has_user("not-a-number"));
    }
}
