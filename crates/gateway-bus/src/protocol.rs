// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Internal wire protocol shared by every front end (TUI, bot channels,
//! HTTP/SSE) that talks to the gateway kernel.
//!
//! `ControlCommand` carries a request into the kernel; `ControlEvent` carries
//! a notification back out. Both are plain `serde` enums so they can be
//! serialized as JSON for the HTTP/SSE surface without a second translation
//! layer. `ControlEvent` is the wire image of the domain-level `AgentEvent`
//! sum type, not a replacement for it: the kernel owns `AgentEvent`, the bus
//! only translates.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque, monotonically increasing identifier assigned to every emitted
/// `ControlEvent`. Used as the SSE `id:` field for `Last-Event-ID` replay.
pub type EventId = u64;

/// Identifies a session. Either the literal `"primary"` (the owner, shared
/// across all transports), `"user:<id>"` (a non-owner user), or
/// `"group:<chatId>"` (a group chat). Transparent over a plain string so it
/// serializes as a bare JSON string on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionKey(pub String);

impl SessionKey {
    pub fn primary() -> Self {
        SessionKey("primary".into())
    }

    pub fn user(id: impl std::fmt::Display) -> Self {
        SessionKey(format!("user:{id}"))
    }

    pub fn group(chat_id: impl std::fmt::Display) -> Self {
        SessionKey(format!("group:{chat_id}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for SessionKey {
    fn from(s: String) -> Self {
        SessionKey(s)
    }
}

impl From<&str> for SessionKey {
    fn from(s: &str) -> Self {
        SessionKey(s.to_string())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlCommand {
    /// Normalized ingress: route to `key`'s session, optionally running the
    /// agent loop. Mirrors the domain `InboundMessage`.
    ProcessMessage {
        key: SessionKey,
        source: String,
        text: String,
        run_agent: bool,
        ephemeral: bool,
        fresh_context: bool,
        /// The caller's resolved username, used by the kernel to look up a
        /// `ResolvedRole` for the tool-permission gate. `None` resolves to
        /// the implicit local-owner identity (the TUI, a trusted cron job).
        #[serde(default)]
        username: Option<String>,
    },
    CancelSession {
        key: SessionKey,
    },
    ApproveTool {
        key: SessionKey,
        call_id: String,
    },
    DenyTool {
        key: SessionKey,
        call_id: String,
        reason: Option<String>,
    },
    Subscribe {
        key: SessionKey,
    },
    Unsubscribe {
        key: SessionKey,
    },
    ListSessions,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlEvent {
    AgentStart {
        key: SessionKey,
        run_id: Uuid,
        source: String,
    },
    TextDelta {
        key: SessionKey,
        run_id: Uuid,
        delta: String,
    },
    ThinkingDelta {
        key: SessionKey,
        run_id: Uuid,
        delta: String,
    },
    Thinking {
        key: SessionKey,
        run_id: Uuid,
        text: String,
    },
    ToolStart {
        key: SessionKey,
        run_id: Uuid,
        call_id: String,
        name: String,
        input: String,
    },
    ToolEnd {
        key: SessionKey,
        run_id: Uuid,
        call_id: String,
        name: String,
        result: String,
        error: bool,
        duration_ms: u64,
    },
    AgentEnd {
        key: SessionKey,
        run_id: Uuid,
        final_text: String,
        /// Set when the reply matched a suppression token and channels
        /// should treat `final_text` as not-for-delivery rather than print
        /// it. Carried instead of simply not publishing the event so the
        /// session-state transition to `Completed` still has a matching run.
        #[serde(default)]
        suppressed: bool,
    },
    AgentError {
        key: SessionKey,
        run_id: Uuid,
        message: String,
    },
    UserMessage {
        key: SessionKey,
        run_id: Uuid,
        content: String,
        source: String,
        supervisor: bool,
    },
    SessionState {
        key: SessionKey,
        state: SessionState,
    },
    SessionList {
        sessions: Vec<SessionInfo>,
    },
    GatewayError {
        code: u16,
        message: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Running,
    AwaitingApproval,
    Completed,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionInfo {
    pub key: SessionKey,
    pub state: SessionState,
    pub created_at: chrono::DateTime<chrono::Utc>,
}
