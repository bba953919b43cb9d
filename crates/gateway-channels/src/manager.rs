// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Owns every channel's lifecycle: start, background reconnect with
//! exponential backoff, and manual config reload.
//!
//! Hot-reload here is triggered by calling [`ChannelManager::reload`]
//! directly rather than by subscribing to a free-form dotted-topic bus —
//! `gateway-bus`'s event plane is a single `ControlEvent` broadcast, not the
//! generic pub/sub topics a full message bus would have, so the config
//! watcher (or an admin command) calls this manager in-process instead.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::channel::{Channel, ChannelStatus};

/// Initial reconnect delay.
const BACKOFF_START: Duration = Duration::from_secs(5);
/// Reconnect delay never grows past this.
const BACKOFF_CAP: Duration = Duration::from_secs(5 * 60);

struct ManagedChannel {
    channel: Arc<dyn Channel>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

pub struct ChannelManager {
    channels: RwLock<HashMap<String, Arc<ManagedChannel>>>,
}

impl Default for ChannelManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ChannelManager {
    pub fn new() -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
        }
    }

    /// Register and start a channel, supervising it with exponential
    /// backoff reconnects if `start()` ever returns an error after running.
    pub async fn register(&self, channel: Arc<dyn Channel>) {
        let name = channel.name().to_string();
        let managed = Arc::new(ManagedChannel {
            channel: channel.clone(),
            supervisor: Mutex::new(None),
        });
        self.channels.write().await.insert(name.clone(), managed.clone());
        let handle = tokio::spawn(supervise(channel, name));
        *managed.supervisor.lock().await = Some(handle);
    }

    pub async fn stop(&self, name: &str) -> anyhow::Result<()> {
        let channels = self.channels.read().await;
        if let Some(managed) = channels.get(name) {
            if let Some(handle) = managed.supervisor.lock().await.take() {
                handle.abort();
            }
            managed.channel.stop().await?;
        }
        Ok(())
    }

    /// Stop the running instance, apply the new config, then restart the
    /// supervised reconnect loop. Failures go back into the normal retry
    /// path instead of propagating to the caller.
    pub async fn reload(&self, name: &str, config: serde_json::Value) {
        let channel = {
            let channels = self.channels.read().await;
            channels.get(name).map(|m| m.channel.clone())
        };
        let Some(channel) = channel else {
            warn!(channel = name, "reload requested for unknown channel");
            return;
        };
        if let Err(err) = channel.stop().await {
            warn!(channel = name, error = %err, "error stopping channel before reload");
        }
        if let Err(err) = channel.reload(config).await {
            error!(channel = name, error = %err, "channel reload failed");
        }
        let name = name.to_string();
        let handle = tokio::spawn(supervise(channel, name.clone()));
        if let Some(managed) = self.channels.read().await.get(&name) {
            *managed.supervisor.lock().await = Some(handle);
        }
    }

    pub async fn status(&self) -> HashMap<String, ChannelStatus> {
        let channels = self.channels.read().await;
        channels
            .iter()
            .map(|(name, managed)| (name.clone(), managed.channel.status()))
            .collect()
    }

    pub async fn channel(&self, name: &str) -> Option<Arc<dyn Channel>> {
        self.channels.read().await.get(name).map(|m| m.channel.clone())
    }

    pub async fn all(&self) -> Vec<Arc<dyn Channel>> {
        self.channels.read().await.values().map(|m| m.channel.clone()).collect()
    }
}

/// Runs `channel.start()`; on failure, sleeps with exponential backoff
/// (capped at [`BACKOFF_CAP`]) and retries. Exits only when `start()`
/// succeeds and subsequently returns `Ok(())` (a clean shutdown).
async fn supervise(channel: Arc<dyn Channel>, name: String) {
    let mut delay = BACKOFF_START;
    loop {
        match channel.start().await {
            Ok(()) => {
                info!(channel = %name, "channel stopped cleanly");
                return;
            }
            Err(err) => {
                warn!(channel = %name, error = %err, delay = ?delay, "channel failed, retrying after backoff");
                tokio::time::sleep(delay).await;
                delay = std::cmp::min(delay * 2, BACKOFF_CAP);
            }
        }
    }
}
