// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Server-Sent Events: `GET /api/events` (every session) and
//! `GET /api/sessions/:key/events` (one session, the supervisor view).
//!
//! Both honor `Last-Event-ID` by replaying from the bus's bounded ring
//! buffer before switching to the live broadcast — the same reconnect
//! contract the teacher's WebSocket bridge gave native clients, just over
//! a transport browsers can consume without a client-side library.

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use futures::{stream, Stream, StreamExt};
use tokio_stream::wrappers::BroadcastStream;
use tracing::warn;

use gateway_bus::{ControlEvent, EventId, LoggedEvent, SessionKey};

use crate::http::state::AppState;

fn last_event_id(headers: &axum::http::HeaderMap) -> Option<EventId> {
    headers
        .get("last-event-id")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
}

fn to_sse_event(logged: LoggedEvent) -> Event {
    let data = serde_json::to_string(&logged.event).unwrap_or_default();
    Event::default().id(logged.id.to_string()).data(data)
}

/// `GET /api/events` — the full event firehose across every session.
pub async fn events(
    State(state): State<AppState>,
    headers: axum::http::HeaderMap,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let backlog = match last_event_id(&headers) {
        Some(id) => state.events.replay_after(id),
        None => Vec::new(),
    };
    Sse::new(combined_stream(&state, backlog, None)).keep_alive(keep_alive())
}

/// `GET /api/sessions/:key/events` — the supervisor view, scoped to one
/// session key.
pub async fn session_events(
    State(state): State<AppState>,
    Path(key): Path<String>,
    headers: axum::http::HeaderMap,
) -> impl IntoResponse {
    let key = SessionKey::from(key);
    let backlog: Vec<LoggedEvent> = match last_event_id(&headers) {
        Some(id) => state
            .events
            .replay_after(id)
            .into_iter()
            .filter(|logged| event_key(&logged.event) == Some(&key))
            .collect(),
        None => Vec::new(),
    };
    Sse::new(combined_stream(&state, backlog, Some(key))).keep_alive(keep_alive())
}

fn combined_stream(
    state: &AppState,
    backlog: Vec<LoggedEvent>,
    filter_key: Option<SessionKey>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    let rx = state.events.subscribe();
    let backlog_stream = stream::iter(
        backlog
            .into_iter()
            .map(|logged| Ok::<Event, Infallible>(to_sse_event(logged))),
    );
    let live_stream = BroadcastStream::new(rx).filter_map(move |item| {
        let filter_key = filter_key.clone();
        async move {
            match item {
                Ok(logged) => match &filter_key {
                    Some(key) if event_key(&logged.event) != Some(key) => None,
                    _ => Some(Ok(to_sse_event(logged))),
                },
                Err(tokio_stream::wrappers::errors::BroadcastStreamRecvError::Lagged(n)) => {
                    warn!(lagged = n, "SSE subscriber lagged behind the event bus");
                    None
                }
            }
        }
    });
    backlog_stream.chain(live_stream)
}

fn keep_alive() -> KeepAlive {
    KeepAlive::new().interval(Duration::from_secs(15)).text("keep-alive")
}

/// The session a `ControlEvent` is about, if any (`SessionList`/
/// `GatewayError` are gateway-wide and have none).
fn event_key(event: &ControlEvent) -> Option<&SessionKey> {
    match event {
        ControlEvent::AgentStart { key, .. }
        | ControlEvent::TextDelta { key, .. }
        | ControlEvent::ThinkingDelta { key, .. }
        | ControlEvent::Thinking { key, .. }
        | ControlEvent::ToolStart { key, .. }
        | ControlEvent::ToolEnd { key, .. }
        | ControlEvent::AgentEnd { key, .. }
        | ControlEvent::AgentError { key, .. }
        | ControlEvent::UserMessage { key, .. }
        | ControlEvent::SessionState { key, .. } => Some(key),
        ControlEvent::SessionList { .. } | ControlEvent::GatewayError { .. } => None,
    }
}
