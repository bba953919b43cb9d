// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Multi-session Kernel: the single point every front end (TUI, bot channels,
//! HTTP/SSE) goes through to reach an [`Agent`].
//!
//! `Agent` itself stays single-session — it owns exactly one [`Session`] and
//! knows nothing about other sessions. The Kernel is what multiplexes many
//! such agents behind a [`SessionKey`], following the lock discipline
//! `sven-core::Session` already used (serialize mutation within a session,
//! let independent sessions proceed in parallel) but hoisted one level up,
//! to a map instead of a single `Mutex<Session>`.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use tracing::{info, warn};
use uuid::Uuid;

use gateway_bus::{
    commands::CommandEnvelope, ControlCommand, ControlEvent, EventBus, SessionInfo, SessionKey,
    SessionState as WireSessionState,
};
use gateway_config::Config;
use gateway_tools::{events::ToolEvent, ToolRegistry};

use crate::{agent::Agent, events::AgentEvent, runtime_context::AgentRuntimeContext};

/// Resolves which session a piece of inbound traffic belongs to.
///
/// `"primary"` for the owner, `"user:<id>"` for any other known user,
/// `"group:<chatId>"` for a group chat, or an explicit override supplied by
/// the caller (e.g. a cron job naming its own key). Checked in that order:
/// an explicit override always wins, then group membership, then ownership.
pub fn resolve_session_key(
    is_owner: bool,
    user_id: Option<&str>,
    group_chat_id: Option<&str>,
    explicit_override: Option<SessionKey>,
) -> SessionKey {
    if let Some(key) = explicit_override {
        return key;
    }
    if let Some(chat_id) = group_chat_id {
        return SessionKey::group(chat_id);
    }
    if is_owner {
        return SessionKey::primary();
    }
    match user_id {
        Some(id) => SessionKey::user(id),
        None => SessionKey::primary(),
    }
}

/// One live conversation. Wraps a single-session [`Agent`]; the Kernel keeps
/// one of these per [`SessionKey`].
struct SessionEntry {
    agent: Mutex<Agent>,
    state: Mutex<WireSessionState>,
    created_at: chrono::DateTime<Utc>,
    /// Cancel handle for the run currently in flight, if any.
    cancel: Mutex<Option<oneshot::Sender<()>>>,
    /// Number of `/compact` (or automatic) compaction passes applied so far.
    compactions: std::sync::atomic::AtomicUsize,
    /// Completed turns since the last checkpoint fired.
    turns_since_checkpoint: std::sync::atomic::AtomicUsize,
    /// Set while a background checkpoint generation is in flight for this
    /// session, so further triggers are dropped rather than queued.
    checkpoint_running: std::sync::atomic::AtomicBool,
    /// Checkpoints produced so far, oldest first. Surfaced to `/status` and
    /// handed to the agent before every run so `ensure_fits_budget` can reuse
    /// a covering checkpoint's summary instead of a fresh compaction call.
    checkpoints: Mutex<Vec<crate::checkpoint::StoredCompaction>>,
    /// Supervisor kill switch: while `false`, traffic still reaches the
    /// session's message log but never triggers an agent run.
    llm_enabled: std::sync::atomic::AtomicBool,
    /// Set once a supervisor has attached to this session (posted guidance
    /// or requested an interrupt). Never cleared — a session that has been
    /// supervised once stays visible as such.
    supervised: std::sync::atomic::AtomicBool,
    /// Set by `request_interrupt`, cleared at the start of the next run.
    /// The actual cancellation is the oneshot `cancel` handle above, raced
    /// via `select!` inside `Agent::submit_with_cancel`; this flag is only
    /// the visible record of the request, for `/status` and audit.
    interrupt_requested: std::sync::atomic::AtomicBool,
    /// Supervisor-authored messages awaiting delivery into the session's
    /// message log, drained at the start of the next run.
    guidance_queue: Mutex<Vec<GuidanceMessage>>,
}

/// One supervisor-authored prompt waiting to be drained into a session's
/// message log as a user-role message.
#[derive(Debug, Clone)]
pub struct GuidanceMessage {
    pub content: String,
    pub supervisor_id: Option<String>,
}

/// Snapshot of a session's message/token accounting, as surfaced by `/status`.
#[derive(Debug, Clone, Copy)]
pub struct SessionStats {
    pub message_count: usize,
    pub total_tokens: usize,
    pub max_tokens: usize,
    pub compaction_count: usize,
    pub checkpoint_count: usize,
    pub supervised: bool,
    pub llm_enabled: bool,
    pub interrupt_requested: bool,
}

/// Builds a fresh [`Agent`] for one session: a failover-wrapped model plus
/// whatever tools `registry` carries. The tool registry's contents are the
/// caller's concern — the kernel only knows the `Tool`/`ToolRegistry`
/// contract, never a concrete tool.
fn new_agent(config: &Config, registry: Arc<ToolRegistry>) -> anyhow::Result<Agent> {
    // Wrapping in a failover chain even when `fallbacks` is empty keeps this
    // the single path every session's model goes through, rather than a
    // separate single-model codepath that would drift from the chain one.
    let model: Arc<dyn gateway_model::ModelProvider> =
        Arc::new(gateway_model::FailoverProvider::new(&config.model)?);
    let max_ctx = model.catalog_context_window().unwrap_or(128_000) as usize;

    let mode = Arc::new(Mutex::new(config.agent.default_mode));
    let (_tool_tx, tool_rx) = mpsc::channel::<ToolEvent>(64);

    Ok(Agent::new(
        model,
        registry,
        Arc::new(config.agent.clone()),
        AgentRuntimeContext::default(),
        mode,
        tool_rx,
        max_ctx,
    ))
}

/// Translates a domain [`AgentEvent`] into the wire-level [`ControlEvent`]
/// published on the bus. The Kernel owns `AgentEvent`; this function is the
/// only place that knows how to render it for front ends.
///
/// `TextComplete`/`Aborted` are deliberately not handled here — they carry
/// the reply text that still needs media enrichment and suppression-token
/// detection before it reaches a channel, so `process_message` intercepts
/// those two variants itself rather than forwarding them live.
fn agent_event_to_control(key: &SessionKey, run_id: Uuid, event: AgentEvent) -> Option<ControlEvent> {
    let key = key.clone();
    match event {
        AgentEvent::TextDelta(delta) => Some(ControlEvent::TextDelta { key, run_id, delta }),
        AgentEvent::ThinkingDelta(delta) => Some(ControlEvent::ThinkingDelta { key, run_id, delta }),
        AgentEvent::ThinkingComplete(text) => Some(ControlEvent::Thinking { key, run_id, text }),
        AgentEvent::ToolCallStarted(call) => Some(ControlEvent::ToolStart {
            key,
            run_id,
            call_id: call.id,
            name: call.name,
            input: call.args.to_string(),
        }),
        AgentEvent::ToolCallFinished {
            call_id,
            tool_name,
            output,
            is_error,
        } => Some(ControlEvent::ToolEnd {
            key,
            run_id,
            call_id,
            name: tool_name,
            result: output,
            error: is_error,
            duration_ms: 0,
        }),
        AgentEvent::Error(message) => Some(ControlEvent::AgentError { key, run_id, message }),
        AgentEvent::TextComplete(_) | AgentEvent::Aborted { .. } => None,
        // Context-compaction stats, token usage, todo updates, mode changes,
        // and interactive questions have no SSE/channel-facing wire shape yet
        // — they stay internal to the TUI/channel that originated the turn.
        AgentEvent::ContextCompacted { .. }
        | AgentEvent::TokenUsage { .. }
        | AgentEvent::TurnComplete
        | AgentEvent::TodoUpdate(_)
        | AgentEvent::ModeChanged(_)
        | AgentEvent::Question { .. }
        | AgentEvent::QuestionAnswer { .. } => None,
    }
}

/// Owns every live [`SessionEntry`] and drains the command bus.
pub struct Kernel {
    config: Arc<Config>,
    sessions: RwLock<HashMap<SessionKey, Arc<SessionEntry>>>,
    events: Arc<EventBus>,
    /// Shared across every session: the tool registry is a process-wide
    /// catalog, not something each conversation carries its own copy of.
    registry: Arc<ToolRegistry>,
    users: Arc<crate::users::UserRegistry>,
}

impl Kernel {
    pub fn new(config: Arc<Config>, events: Arc<EventBus>) -> Arc<Self> {
        Self::with_registry(config, events, Arc::new(ToolRegistry::new()))
    }

    /// As [`Kernel::new`], but with an externally assembled tool registry —
    /// the hook a deployment uses to register its own concrete tools without
    /// this crate knowing their shape.
    pub fn with_registry(config: Arc<Config>, events: Arc<EventBus>, registry: Arc<ToolRegistry>) -> Arc<Self> {
        let users = Arc::new(crate::users::UserRegistry::from_config(&config));
        Arc::new(Self {
            config,
            sessions: RwLock::new(HashMap::new()),
            events,
            registry,
            users,
        })
    }

    async fn get_or_create(&self, key: &SessionKey) -> anyhow::Result<Arc<SessionEntry>> {
        if let Some(entry) = self.sessions.read().await.get(key) {
            return Ok(entry.clone());
        }
        let mut sessions = self.sessions.write().await;
        if let Some(entry) = sessions.get(key) {
            return Ok(entry.clone());
        }
        let agent = new_agent(&self.config, self.registry.clone())?;
        let entry = Arc::new(SessionEntry {
            agent: Mutex::new(agent),
            state: Mutex::new(WireSessionState::Idle),
            created_at: Utc::now(),
            cancel: Mutex::new(None),
            compactions: std::sync::atomic::AtomicUsize::new(0),
            turns_since_checkpoint: std::sync::atomic::AtomicUsize::new(0),
            checkpoint_running: std::sync::atomic::AtomicBool::new(false),
            checkpoints: Mutex::new(Vec::new()),
            llm_enabled: std::sync::atomic::AtomicBool::new(true),
            supervised: std::sync::atomic::AtomicBool::new(false),
            interrupt_requested: std::sync::atomic::AtomicBool::new(false),
            guidance_queue: Mutex::new(Vec::new()),
        });
        sessions.insert(key.clone(), entry.clone());
        info!(session = %key, "created new session");
        Ok(entry)
    }

    /// Drive the command-dispatch loop until the command channel's sender
    /// side is dropped. Spawn this once at startup.
    pub async fn run(self: Arc<Self>, mut rx: mpsc::Receiver<CommandEnvelope>) {
        while let Some((cmd, reply)) = rx.recv().await {
            let this = self.clone();
            tokio::spawn(async move {
                let result = this.handle_command(cmd).await;
                if let Some(reply_tx) = reply {
                    if let Some(event) = result {
                        let _ = reply_tx.send(event);
                    }
                }
            });
        }
    }

    /// Dispatch one command directly, bypassing the channel `run()` loop.
    /// Used by front ends that already hold a command synchronously (an HTTP
    /// handler, a test) instead of routing through the bus.
    pub async fn handle_command(&self, cmd: ControlCommand) -> Option<ControlEvent> {
        match cmd {
            ControlCommand::ProcessMessage {
                key,
                source,
                text,
                run_agent,
                ephemeral,
                fresh_context,
                username,
            } => {
                self.process_message(key, source, text, run_agent, ephemeral, fresh_context, username)
                    .await;
                None
            }
            ControlCommand::CancelSession { key } => {
                self.cancel_session(&key).await;
                None
            }
            ControlCommand::ApproveTool { key, .. } | ControlCommand::DenyTool { key, .. } => {
                // Tool-approval gating is enforced by `ToolPolicy` inside the
                // tool loop today, not by a Kernel-level pending queue; these
                // commands are accepted but have nothing to act on yet.
                warn!(session = %key, "tool approval commands have no pending-approval queue to act on yet");
                None
            }
            ControlCommand::Subscribe { .. } | ControlCommand::Unsubscribe { .. } => {
                // Subscription is handled by front ends calling
                // `EventBus::subscribe` directly; these are accepted for
                // protocol symmetry but need no Kernel-side bookkeeping.
                None
            }
            ControlCommand::ListSessions => {
                let sessions = self.sessions.read().await;
                let mut infos = Vec::with_capacity(sessions.len());
                for (key, entry) in sessions.iter() {
                    infos.push(SessionInfo {
                        key: key.clone(),
                        state: *entry.state.lock().await,
                        created_at: entry.created_at,
                    });
                }
                Some(ControlEvent::SessionList { sessions: infos })
            }
        }
    }

    async fn cancel_session(&self, key: &SessionKey) {
        let Some(entry) = self.sessions.read().await.get(key).cloned() else {
            return;
        };
        if let Some(cancel) = entry.cancel.lock().await.take() {
            let _ = cancel.send(());
        }
    }

    /// Supervision state machine: `RequestInterrupt`. Sets the flag checked
    /// between tool-loop iterations and cancels the run currently in
    /// flight, if any. Attaching an interrupt marks the session supervised.
    pub async fn request_interrupt(&self, key: &SessionKey) -> anyhow::Result<()> {
        let entry = self.get_or_create(key).await?;
        entry.supervised.store(true, std::sync::atomic::Ordering::Relaxed);
        entry.interrupt_requested.store(true, std::sync::atomic::Ordering::Relaxed);
        self.cancel_session(key).await;
        Ok(())
    }

    /// Supervision state machine: send **guidance**. Queues `content` for
    /// delivery into the session's message log, prefixed with the
    /// configured guidance prefix and tagged with `supervisor_id` for
    /// audit, then triggers a normal agent run so the guided reply fans out
    /// to every channel the session's user is on.
    pub async fn post_guidance(
        &self,
        key: SessionKey,
        content: String,
        supervisor_id: Option<String>,
    ) -> anyhow::Result<()> {
        let entry = self.get_or_create(&key).await?;
        entry.supervised.store(true, std::sync::atomic::Ordering::Relaxed);
        let prefixed = format!("{}{}", self.config.agent.guidance_prefix, content);
        entry
            .guidance_queue
            .lock()
            .await
            .push(GuidanceMessage { content: prefixed, supervisor_id: supervisor_id.clone() });
        self.process_message(key, "supervisor".into(), String::new(), true, false, false, supervisor_id)
            .await;
        Ok(())
    }

    /// Whether `key`'s session has ever had a supervisor attach (an
    /// interrupt request or guidance). Surfaced via `/status`.
    pub async fn is_supervised(&self, key: &SessionKey) -> bool {
        match self.sessions.read().await.get(key) {
            Some(entry) => entry.supervised.load(std::sync::atomic::Ordering::Relaxed),
            None => false,
        }
    }

    /// Message/token accounting for `/status`. `None` if the session hasn't
    /// been created yet (no traffic seen for this key).
    pub async fn session_stats(&self, key: &SessionKey) -> Option<SessionStats> {
        let entry = self.sessions.read().await.get(key).cloned()?;
        let agent = entry.agent.lock().await;
        let session = agent.session();
        Some(SessionStats {
            message_count: session.messages.len(),
            total_tokens: session.token_count,
            max_tokens: session.max_tokens,
            compaction_count: entry.compactions.load(std::sync::atomic::Ordering::Relaxed),
            checkpoint_count: entry.checkpoints.lock().await.len(),
            supervised: entry.supervised.load(std::sync::atomic::Ordering::Relaxed),
            llm_enabled: entry.llm_enabled.load(std::sync::atomic::Ordering::Relaxed),
            interrupt_requested: entry.interrupt_requested.load(std::sync::atomic::Ordering::Relaxed),
        })
    }

    /// Force an immediate compaction pass, bypassing the normal near-limit
    /// trigger. Deterministic (no model round trip): same drop-oldest
    /// strategy `ensure_fits_budget` falls back to under emergency pressure,
    /// since an on-demand command has no good place to await a summarization
    /// turn before replying. Returns (messages before, messages after).
    pub async fn force_compact(&self, key: &SessionKey) -> anyhow::Result<(usize, usize)> {
        let entry = self
            .sessions
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("no session found for {key}"))?;
        let mut agent = entry.agent.lock().await;
        let keep_n = self.config.agent.compaction_keep_recent;
        let session = agent.session_mut();
        let before = session.messages.len();
        let sys = session
            .messages
            .iter()
            .find(|m| m.role == gateway_model::Role::System)
            .cloned();
        crate::compact::emergency_compact(&mut session.messages, sys, keep_n);
        session.recalculate_tokens();
        let after = session.messages.len();
        entry.compactions.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        entry.turns_since_checkpoint.store(0, std::sync::atomic::Ordering::Relaxed);
        Ok((before, after))
    }

    /// Discard a session's history entirely. The session itself stays
    /// registered (so `/status` still resolves it), just empty.
    pub async fn clear_session(&self, key: &SessionKey) -> anyhow::Result<()> {
        let entry = self
            .sessions
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("no session found for {key}"))?;
        let mut agent = entry.agent.lock().await;
        agent.session_mut().replace_messages(Vec::new());
        Ok(())
    }

    /// Names of skills available to the gateway.
    ///
    /// Skill discovery from the filesystem is not implemented; skills are
    /// surfaced only through whatever `SkillInfo` entries a caller has
    /// injected into an agent's runtime context, so this returns an empty
    /// list until such a source is wired up.
    pub fn list_skills(&self) -> Vec<String> {
        Vec::new()
    }

    /// Drop `ToolCall`/`ToolResult` messages whose matching counterpart is
    /// missing — the state a provider rejects with a 400 if left in history.
    /// Returns the number of orphaned messages removed.
    pub async fn clean_orphaned_tool_messages(&self, key: &SessionKey) -> anyhow::Result<usize> {
        use gateway_model::MessageContent;
        use std::collections::HashSet;

        let entry = self
            .sessions
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("no session found for {key}"))?;
        let mut agent = entry.agent.lock().await;
        let session = agent.session_mut();

        let before = session.messages.len();
        let messages = std::mem::take(&mut session.messages);

        let call_ids: HashSet<String> = messages
            .iter()
            .filter_map(|m| match &m.content {
                MessageContent::ToolCall { tool_call_id, .. } => Some(tool_call_id.clone()),
                _ => None,
            })
            .collect();
        let result_ids: HashSet<String> = messages
            .iter()
            .filter_map(|m| match &m.content {
                MessageContent::ToolResult { tool_call_id, .. } => Some(tool_call_id.clone()),
                _ => None,
            })
            .collect();

        let kept: Vec<_> = messages
            .into_iter()
            .filter(|m| match &m.content {
                MessageContent::ToolCall { tool_call_id, .. } => {
                    result_ids.contains(tool_call_id.as_str())
                }
                MessageContent::ToolResult { tool_call_id, .. } => {
                    call_ids.contains(tool_call_id.as_str())
                }
                _ => true,
            })
            .collect();
        let removed = before - kept.len();
        session.replace_messages(kept);
        Ok(removed)
    }

    /// Opaque provider state previously stored for `key` under `provider`
    /// (e.g. a stateful API's prior response id). `None` if nothing was
    /// ever stored or the session doesn't exist.
    pub async fn get_provider_state(&self, key: &SessionKey, provider: &str) -> Option<String> {
        let entry = self.sessions.read().await.get(key).cloned()?;
        let agent = entry.agent.lock().await;
        agent.session().get_provider_state(provider).map(String::from)
    }

    /// Persist opaque provider state for `key` under `provider`, replacing
    /// any prior value. The gateway never inspects what it stores here.
    pub async fn set_provider_state(
        &self,
        key: &SessionKey,
        provider: &str,
        value: String,
    ) -> anyhow::Result<()> {
        let entry = self
            .sessions
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("no session found for {key}"))?;
        let mut agent = entry.agent.lock().await;
        agent.session_mut().set_provider_state(provider.to_string(), value);
        Ok(())
    }

    /// Supervisor toggle: while disabled, traffic still lands in the
    /// session's message log (see `process_message`) but never starts an
    /// agent run, whether or not the caller asked for one.
    pub async fn set_llm_enabled(&self, key: &SessionKey, enabled: bool) -> anyhow::Result<()> {
        let entry = self.get_or_create(key).await?;
        entry.llm_enabled.store(enabled, std::sync::atomic::Ordering::Relaxed);
        Ok(())
    }

    /// Append an assistant-role message to `key`'s session without invoking
    /// the model — the ghostwrite path (`invokeLLM = false`). Publishes the
    /// same `AgentEnd` shape a real run would, so channels don't need a
    /// separate ghostwrite case to deliver it.
    pub async fn ghostwrite(&self, key: SessionKey, text: String) -> anyhow::Result<()> {
        let entry = self.get_or_create(&key).await?;
        {
            let mut agent = entry.agent.lock().await;
            agent.session_mut().push(gateway_model::Message::assistant(text.clone()));
        }
        let run_id = Uuid::new_v4();
        self.events.publish(ControlEvent::AgentEnd { key, run_id, final_text: text, suppressed: false });
        Ok(())
    }

    async fn process_message(
        &self,
        key: SessionKey,
        source: String,
        text: String,
        run_agent: bool,
        ephemeral: bool,
        fresh_context: bool,
        username: Option<String>,
    ) {
        let run_id = Uuid::new_v4();
        self.events.publish(ControlEvent::AgentStart {
            key: key.clone(),
            run_id,
            source: source.clone(),
        });

        let entry = match self.get_or_create(&key).await {
            Ok(entry) => entry,
            Err(err) => {
                self.events.publish(ControlEvent::AgentError {
                    key,
                    run_id,
                    message: format!("failed to start session: {err:#}"),
                });
                return;
            }
        };

        let run_agent = run_agent && entry.llm_enabled.load(std::sync::atomic::Ordering::Relaxed);

        if !run_agent {
            // Context-only injection (e.g. a heartbeat nudge), or a
            // supervisor has flipped `LLMEnabled` off for this session: the
            // message is still recorded via the event log, but the run is
            // short-circuited to an empty `AgentEnd` rather than calling the
            // model.
            self.events.publish(ControlEvent::UserMessage {
                key: key.clone(),
                run_id,
                content: text,
                source,
                supervisor: false,
            });
            self.events.publish(ControlEvent::AgentEnd {
                key,
                run_id,
                final_text: String::new(),
                suppressed: false,
            });
            return;
        }

        *entry.state.lock().await = WireSessionState::Running;
        entry.interrupt_requested.store(false, std::sync::atomic::Ordering::Relaxed);

        let (cancel_tx, cancel_rx) = oneshot::channel();
        *entry.cancel.lock().await = Some(cancel_tx);

        // Drain any supervisor guidance queued since the last run into the
        // message log as user-role messages. All but the last (if any) are
        // pushed directly; the last is folded into `text` below so it still
        // goes through the normal `submit` path instead of duplicating it.
        let mut drained_guidance = std::mem::take(&mut *entry.guidance_queue.lock().await);
        let queued_text = if text.is_empty() { drained_guidance.pop().map(|g| g.content) } else { None };
        if !drained_guidance.is_empty() {
            let mut agent = entry.agent.lock().await;
            for guidance in drained_guidance {
                agent.session_mut().push(gateway_model::Message::user(guidance.content));
            }
        }
        let text = queued_text.unwrap_or(text);

        // `FreshContext`: the model must run as if this were the first
        // message in the session, with no memory of prior turns. The real
        // history is displaced rather than discarded — it's spliced back
        // underneath whatever this run produces once it's done, the same
        // way an ephemeral run's own chatter is rolled back below.
        let fresh_saved = if fresh_context {
            let mut agent = entry.agent.lock().await;
            Some(agent.session_mut().take_for_fresh_view())
        } else {
            None
        };

        // Snapshot the pre-run message count so an ephemeral turn (a
        // heartbeat nudge, a cron-fired check-in) can be rolled back to it
        // once the reply has been read off — the run's own prompt and tool
        // chatter must never linger in the session it borrowed.
        let pre_run_len = entry.agent.lock().await.session().messages.len();

        let (agent_tx, mut agent_rx) = mpsc::channel::<AgentEvent>(64);
        let events = self.events.clone();
        let bridge_key = key.clone();
        let bridge_handle = tokio::spawn(async move {
            let mut final_text = None;
            while let Some(event) = agent_rx.recv().await {
                match event {
                    AgentEvent::TextComplete(text) | AgentEvent::Aborted { partial_text: text } => {
                        final_text = Some(text);
                    }
                    other => {
                        if let Some(control) = agent_event_to_control(&bridge_key, run_id, other) {
                            events.publish(control);
                        }
                    }
                }
            }
            final_text
        });

        // Resolve the caller's identity before dispatch so the permission
        // gate (`ToolRegistry::execute`, via `ResolvedRole::can_use_tool`)
        // sees the real caller rather than the implicit-owner default a
        // fresh `Agent` starts with. `None`/unknown usernames fall back to
        // the owner identity, matching the Implicit authenticator.
        let role = username
            .as_deref()
            .and_then(|u| self.users.resolve_role(u))
            .unwrap_or_else(gateway_config::ResolvedRole::implicit_owner);
        let transcript_scope = role.transcript_scope;
        let ctx = gateway_tools::SessionContext {
            channel: source.clone(),
            chat_id: key.as_str().to_string(),
            owner_chat_id: None,
            user: role,
            transcript_scope,
            session_key: key.as_str().to_string(),
        };

        let result = {
            let checkpoints = entry.checkpoints.lock().await.clone();
            let mut agent = entry.agent.lock().await;
            agent.set_context(ctx);
            agent.set_available_checkpoints(checkpoints);
            agent.submit_with_cancel(&text, agent_tx, cancel_rx).await
        };
        let final_text = bridge_handle.await.unwrap_or(None);
        *entry.cancel.lock().await = None;

        let final_state = match &result {
            Ok(()) => WireSessionState::Completed,
            Err(_) => WireSessionState::Idle,
        };
        *entry.state.lock().await = final_state;

        if let Err(err) = result {
            warn!(session = %key, error = %err, "agent turn failed");
            self.events.publish(ControlEvent::AgentError {
                key: key.clone(),
                run_id,
                message: format!("{err:#}"),
            });
        } else if let Some(text) = final_text {
            let media_root = self.media_root();
            let enriched = crate::media::enrich_media_tokens(&text, &media_root);
            let suppressed = crate::media::is_suppressed(&enriched, "");
            self.events.publish(ControlEvent::AgentEnd {
                key: key.clone(),
                run_id,
                final_text: enriched,
                suppressed,
            });
        }

        if ephemeral && result.is_ok() {
            let mut agent = entry.agent.lock().await;
            let session = agent.session_mut();
            if session.messages.len() > pre_run_len {
                let mut messages = std::mem::take(&mut session.messages);
                messages.truncate(pre_run_len);
                session.replace_messages(messages);
            }
        }

        if let Some(old_history) = fresh_saved {
            let mut agent = entry.agent.lock().await;
            let session = agent.session_mut();
            let mut tail = std::mem::take(&mut session.messages);
            let has_old_system =
                old_history.first().map(|m| m.role == gateway_model::Role::System).unwrap_or(false);
            if has_old_system && tail.first().map(|m| m.role == gateway_model::Role::System).unwrap_or(false)
            {
                tail.remove(0);
            }
            let mut merged = old_history;
            merged.extend(tail);
            session.replace_messages(merged);
        }

        if !ephemeral && result.is_ok() {
            self.maybe_fire_checkpoint(&key, &entry).await;
        }

        self.events.publish(ControlEvent::SessionState { key, state: final_state });
    }

    /// Step 12 of a run: bump the turn counter and, if the configured
    /// cadence says so, spawn a background checkpoint generation. Ephemeral
    /// runs never reach here — their history is rolled back before a
    /// checkpoint of it could mean anything.
    async fn maybe_fire_checkpoint(&self, key: &SessionKey, entry: &Arc<SessionEntry>) {
        let turns = entry
            .turns_since_checkpoint
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed)
            + 1;

        let (token_fraction, messages, model) = {
            let agent = entry.agent.lock().await;
            let session = agent.session();
            let fraction = if session.max_tokens > 0 {
                session.token_count as f32 / session.max_tokens as f32
            } else {
                0.0
            };
            (fraction, session.messages.clone(), agent.model().clone())
        };

        let cfg = &self.config.agent;
        if !crate::checkpoint::should_trigger(
            turns,
            token_fraction,
            cfg.checkpoint_turn_threshold,
            cfg.checkpoint_token_threshold,
        ) {
            return;
        }

        if entry
            .checkpoint_running
            .swap(true, std::sync::atomic::Ordering::AcqRel)
        {
            // Already generating one for this session; this trigger is dropped.
            return;
        }

        entry
            .turns_since_checkpoint
            .store(0, std::sync::atomic::Ordering::Relaxed);

        let strategy = cfg.compaction_strategy.clone();
        let tokens_before = messages.len();
        let entry = entry.clone();
        let key = key.clone();
        tokio::spawn(async move {
            let result =
                crate::checkpoint::generate_checkpoint(model.as_ref(), &messages, &strategy, tokens_before)
                    .await;
            match result {
                Ok(record) => {
                    entry.checkpoints.lock().await.push(record);
                }
                Err(err) => {
                    warn!(session = %key, error = %err, "background checkpoint generation failed");
                }
            }
            entry
                .checkpoint_running
                .store(false, std::sync::atomic::Ordering::Release);
        });
    }

    /// Directory `{{media:<path>}}` tokens resolve against: the configured
    /// `media.root_dir`, or `.gateway/media` under the project root.
    fn media_root(&self) -> std::path::PathBuf {
        if let Some(dir) = &self.config.media.root_dir {
            return std::path::PathBuf::from(dir);
        }
        gateway_runtime::find_project_root()
            .map(|root| root.join(".gateway/media"))
            .unwrap_or_else(|_| std::path::PathBuf::from(".gateway/media"))
    }
}
