// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Bounded command dispatch plane.
//!
//! Every front end sends `ControlCommand`s through a single bounded `mpsc`
//! channel into the gateway kernel. Callers that need a reply attach a
//! `oneshot` sender; callers that don't (fire-and-forget) pass `None`.

use std::time::Duration;

use tokio::sync::{mpsc, oneshot};

use crate::protocol::{ControlCommand, ControlEvent};

/// Queue capacity for the command channel. Matches the teacher's control
/// service mpsc sizing.
pub const COMMAND_QUEUE_CAPACITY: usize = 100;

/// How long `CommandBus::send` waits for a reply before giving up.
pub const COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

pub type CommandEnvelope = (ControlCommand, Option<oneshot::Sender<ControlEvent>>);

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("command queue is full or the kernel has stopped processing commands")]
    Send,
    #[error("kernel did not reply within {0:?}")]
    Timeout(Duration),
    #[error("kernel dropped the reply channel without answering")]
    NoReply,
}

/// Handle held by front ends to submit commands to the kernel.
#[derive(Clone)]
pub struct CommandBus {
    tx: mpsc::Sender<CommandEnvelope>,
}

impl CommandBus {
    /// Create a bus and return the handle plus the receiver the kernel's
    /// dispatch loop should poll.
    pub fn new() -> (Self, mpsc::Receiver<CommandEnvelope>) {
        let (tx, rx) = mpsc::channel(COMMAND_QUEUE_CAPACITY);
        (Self { tx }, rx)
    }

    /// Fire-and-forget: enqueue a command with no reply expected.
    pub async fn dispatch(&self, cmd: ControlCommand) -> Result<(), CommandError> {
        self.tx
            .send((cmd, None))
            .await
            .map_err(|_| CommandError::Send)
    }

    /// Send a command and wait up to [`COMMAND_TIMEOUT`] for a single reply
    /// event from the kernel.
    pub async fn request(&self, cmd: ControlCommand) -> Result<ControlEvent, CommandError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send((cmd, Some(reply_tx)))
            .await
            .map_err(|_| CommandError::Send)?;

        match tokio::time::timeout(COMMAND_TIMEOUT, reply_rx).await {
            Ok(Ok(event)) => Ok(event),
            Ok(Err(_)) => Err(CommandError::NoReply),
            Err(_) => Err(CommandError::Timeout(COMMAND_TIMEOUT)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn dispatch_delivers_to_receiver() {
        let (bus, mut rx) = CommandBus::new();
        bus.dispatch(ControlCommand::ListSessions).await.unwrap();
        let (cmd, reply) = rx.recv().await.unwrap();
        assert!(matches!(cmd, ControlCommand::ListSessions));
        assert!(reply.is_none());
    }

    #[tokio::test]
    async fn request_round_trips_a_reply() {
        let (bus, mut rx) = CommandBus::new();
        let handle = tokio::spawn(async move {
            let (_, reply) = rx.recv().await.unwrap();
            reply
                .unwrap()
                .send(ControlEvent::SessionList { sessions: vec![] })
                .unwrap();
        });

        let reply = bus.request(ControlCommand::ListSessions).await.unwrap();
        assert!(matches!(reply, ControlEvent::SessionList { .. }));
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn dispatch_fails_after_receiver_dropped() {
        let (bus, rx) = CommandBus::new();
        drop(rx);
        let err = bus.dispatch(ControlCommand::ListSessions).await.unwrap_err();
        assert!(matches!(err, CommandError::Send));
    }
}
