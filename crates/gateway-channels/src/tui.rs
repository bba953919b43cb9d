// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! TUI channel: the gateway's own terminal, used as a thin local bridge
//! rather than a network transport. Streaming, no ghostwrite — there is
//! only one local operator and nothing to disguise as "typed live".

use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex as StdMutex;

use async_trait::async_trait;
use chrono::Utc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::warn;

use gateway_bus::{CommandBus, ControlCommand, ControlEvent, EventBus, SessionKey};
use gateway_commands::{CommandManager, SessionProvider};

use crate::channel::{Channel, ChannelStatus};

pub struct TuiChannel {
    commands: CommandBus,
    events: std::sync::Arc<EventBus>,
    session_key: SessionKey,
    stopped: AtomicBool,
    status: StdMutex<ChannelStatus>,
    /// `/status`, `/compact`, ... dispatch, shared with every other front
    /// end that permits slash commands. `None` leaves `/`-prefixed input to
    /// reach the agent as ordinary chat text.
    slash_commands: Option<(CommandManager, std::sync::Arc<dyn SessionProvider>)>,
}

impl TuiChannel {
    pub fn new(commands: CommandBus, events: std::sync::Arc<EventBus>, session_key: SessionKey) -> Self {
        Self {
            commands,
            events,
            session_key,
            stopped: AtomicBool::new(false),
            status: StdMutex::new(ChannelStatus::default()),
            slash_commands: None,
        }
    }

    /// Enable `/status`-style slash commands against `provider`, dispatched
    /// through `manager` before anything reaches the agent loop.
    pub fn with_commands(
        mut self,
        manager: CommandManager,
        provider: std::sync::Arc<dyn SessionProvider>,
    ) -> Self {
        self.slash_commands = Some((manager, provider));
        self
    }
}

#[async_trait]
impl Channel for TuiChannel {
    fn name(&self) -> &str {
        "tui"
    }

    async fn start(&self) -> anyhow::Result<()> {
        {
            let mut status = self.status.lock().unwrap();
            status.running = true;
            status.connected = true;
            status.started_at = Some(Utc::now());
        }
        self.stopped.store(false, Ordering::SeqCst);

        let mut rx = self.events.subscribe();
        let key = self.session_key.clone();
        let print_task = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(logged) => {
                        if event_belongs_to(&logged.event, &key) {
                            print_event(&logged.event);
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        warn!("tui channel missed {n} events");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        let stdin = tokio::io::stdin();
        let mut lines = BufReader::new(stdin).lines();
        while !self.stopped.load(Ordering::SeqCst) {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    let line = line.trim().to_string();
                    if line.is_empty() {
                        continue;
                    }

                    if let Some((manager, provider)) = &self.slash_commands {
                        if let Some(result) =
                            manager.dispatch_line(provider.as_ref(), &line, self.session_key.clone(), None).await
                        {
                            match result.error {
                                Some(err) => eprintln!("[error] {err}"),
                                None => println!("{}", result.text),
                            }
                            std::io::stdout().flush().ok();
                            continue;
                        }
                    }

                    let _ = self
                        .commands
                        .dispatch(ControlCommand::ProcessMessage {
                            key: self.session_key.clone(),
                            source: "tui".into(),
                            text: line,
                            run_agent: true,
                            ephemeral: false,
                            fresh_context: false,
                            username: None,
                        })
                        .await;
                }
                Ok(None) => break,
                Err(err) => {
                    warn!(error = %err, "tui stdin read error");
                    break;
                }
            }
        }
        print_task.abort();
        let mut status = self.status.lock().unwrap();
        status.running = false;
        status.connected = false;
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        self.stopped.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn status(&self) -> ChannelStatus {
        self.status.lock().unwrap().clone()
    }

    async fn send(&self, text: &str) -> anyhow::Result<()> {
        println!("{text}");
        std::io::stdout().flush().ok();
        Ok(())
    }

    async fn send_mirror(
        &self,
        source_channel: &str,
        user_msg: &str,
        agent_response: &str,
    ) -> anyhow::Result<()> {
        println!("[{source_channel}] {user_msg}\n{agent_response}");
        std::io::stdout().flush().ok();
        Ok(())
    }

    fn has_user(&self, _user: &str) -> bool {
        true
    }

    fn is_streaming(&self) -> bool {
        true
    }

    async fn stream_event(&self, _user: &str, event: &ControlEvent) -> bool {
        print_event(event);
        true
    }

    fn supports_ghostwrite(&self) -> bool {
        false
    }

    async fn deliver_ghostwrite(&self, _user: &str, _message: &str) -> anyhow::Result<()> {
        anyhow::bail!("tui channel is the local operator; ghostwriting makes no sense here")
    }
}

fn event_belongs_to(event: &ControlEvent, key: &SessionKey) -> bool {
    match event {
        ControlEvent::AgentStart { key: k, .. }
        | ControlEvent::TextDelta { key: k, .. }
        | ControlEvent::ThinkingDelta { key: k, .. }
        | ControlEvent::Thinking { key: k, .. }
        | ControlEvent::ToolStart { key: k, .. }
        | ControlEvent::ToolEnd { key: k, .. }
        | ControlEvent::AgentEnd { key: k, .. }
        | ControlEvent::AgentError { key: k, .. }
        | ControlEvent::UserMessage { key: k, .. }
        | ControlEvent::SessionState { key: k, .. } => k == key,
        ControlEvent::SessionList { .. } | ControlEvent::GatewayError { .. } => false,
    }
}

fn print_event(event: &ControlEvent) {
    match event {
        ControlEvent::TextDelta { delta, .. } => {
            print!("{delta}");
            std::io::stdout().flush().ok();
        }
        ControlEvent::AgentEnd { suppressed, .. } => {
            if !suppressed {
                println!();
            }
        }
        ControlEvent::AgentError { message, .. } => eprintln!("\n[error] {message}"),
        ControlEvent::ToolStart { name, .. } => eprintln!("\n[tool] {name}..."),
        _ => {}
    }
}
