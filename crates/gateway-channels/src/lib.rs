// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Channel trait and transport drivers (TUI, Telegram-style, WhatsApp-style)
//! for the agent gateway. Each driver's bot wire protocol is out of scope —
//! what's implemented here is the `Channel` contract and the lifecycle
//! plumbing (`ChannelManager`) every driver plugs into.

mod channel;
mod manager;
mod tui;
#[cfg(feature = "telegram")]
mod telegram;
mod whatsapp;

pub use channel::{Channel, ChannelStatus};
pub use manager::ChannelManager;
pub use tui::TuiChannel;
#[cfg(feature = "telegram")]
pub use telegram::TelegramChannel;
pub use whatsapp::WhatsAppChannel;
