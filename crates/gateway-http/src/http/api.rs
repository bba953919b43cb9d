// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! The JSON `/api/*` handler surface: status, sending a message, media
//! lookup, and the supervisor-only guidance/ghostwrite/llm-toggle endpoints.

use std::path::{Path as FsPath, PathBuf};

use axum::extract::{Extension, Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::warn;

use gateway_bus::{ControlCommand, SessionKey};

use crate::http::auth::{require_operator, AuthenticatedRole};
use crate::http::state::AppState;

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub session: Option<SessionStatus>,
}

#[derive(Debug, Serialize)]
pub struct SessionStatus {
    pub message_count: usize,
    pub total_tokens: usize,
    pub max_tokens: usize,
    pub compaction_count: usize,
    pub checkpoint_count: usize,
    pub supervised: bool,
    pub llm_enabled: bool,
    pub interrupt_requested: bool,
}

/// `GET /api/status` — stats for the primary session, the one the web UI
/// talks to by default.
pub async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    let stats = state.kernel.session_stats(&SessionKey::primary()).await;
    Json(StatusResponse {
        session: stats.map(|s| SessionStatus {
            message_count: s.message_count,
            total_tokens: s.total_tokens,
            max_tokens: s.max_tokens,
            compaction_count: s.compaction_count,
            checkpoint_count: s.checkpoint_count,
            supervised: s.supervised,
            llm_enabled: s.llm_enabled,
            interrupt_requested: s.interrupt_requested,
        }),
    })
}

#[derive(Debug, Deserialize)]
pub struct SendRequest {
    pub message: String,
    #[serde(default)]
    pub images: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct SendResponse {
    pub id: String,
    pub status: &'static str,
}

/// `POST /api/send` — normalize the browser's message (plus any attached
/// image paths, folded in as `{{media:...}}` tokens) and hand it to the
/// kernel. Returns immediately; the reply arrives over `/api/events`.
pub async fn send(
    State(state): State<AppState>,
    Extension(role): Extension<AuthenticatedRole>,
    Json(body): Json<SendRequest>,
) -> impl IntoResponse {
    let mut text = body.message;
    for image in &body.images {
        text.push_str(&format!("\n{{{{media:{image}}}}}"));
    }

    let id = uuid::Uuid::new_v4();
    let kernel = state.kernel.clone();
    let username = role.username;
    tokio::spawn(async move {
        kernel
            .handle_command(ControlCommand::ProcessMessage {
                key: SessionKey::primary(),
                source: "http".into(),
                text,
                run_agent: true,
                ephemeral: false,
                fresh_context: false,
                username: Some(username),
            })
            .await;
    });

    (
        StatusCode::ACCEPTED,
        Json(SendResponse { id: id.to_string(), status: "processing" }),
    )
}

#[derive(Debug, Deserialize)]
pub struct MediaQuery {
    pub path: String,
}

/// `GET /api/media?path=<abs>` — serve a file under the configured media
/// root. Anything outside it, or that doesn't exist, is `404` rather than
/// `403` so the endpoint can't be used to probe the filesystem.
pub async fn media(State(state): State<AppState>, Query(query): Query<MediaQuery>) -> Response {
    let root = media_root(&state);
    let Ok(root) = root.canonicalize() else {
        return (StatusCode::NOT_FOUND, "no media store configured").into_response();
    };

    let requested = root.join(query.path.trim_start_matches('/'));
    let Ok(resolved) = requested.canonicalize() else {
        return (StatusCode::NOT_FOUND, "not found").into_response();
    };

    if !resolved.starts_with(&root) {
        return (StatusCode::NOT_FOUND, "not found").into_response();
    }

    match tokio::fs::read(&resolved).await {
        Ok(bytes) => {
            let mime = mime_guess_from_path(&resolved);
            ([(axum::http::header::CONTENT_TYPE, mime)], bytes).into_response()
        }
        Err(_) => (StatusCode::NOT_FOUND, "not found").into_response(),
    }
}

fn media_root(state: &AppState) -> PathBuf {
    if let Some(dir) = &state.config.media.root_dir {
        return PathBuf::from(dir);
    }
    gateway_runtime::find_project_root()
        .map(|root| root.join(".gateway/media"))
        .unwrap_or_else(|_| PathBuf::from(".gateway/media"))
}

fn mime_guess_from_path(path: &FsPath) -> &'static str {
    match path.extension().and_then(|e| e.to_str()).unwrap_or("").to_ascii_lowercase().as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "mp4" => "video/mp4",
        "pdf" => "application/pdf",
        "txt" | "md" => "text/plain; charset=utf-8",
        _ => "application/octet-stream",
    }
}

#[derive(Debug, Deserialize)]
pub struct GuidanceRequest {
    pub content: String,
}

/// `POST /api/sessions/:key/guidance` — a supervisor-authored prompt
/// injected as a user-role message, triggering a normal agent run.
/// `Operator` only.
pub async fn guidance(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Extension(role): Extension<AuthenticatedRole>,
    Json(body): Json<GuidanceRequest>,
) -> Response {
    if let Err(resp) = require_operator(&role) {
        return resp;
    }
    let kernel = state.kernel.clone();
    let key = SessionKey::from(key);
    let username = role.username;
    tokio::spawn(async move {
        if let Err(err) = kernel.post_guidance(key, body.content, Some(username)).await {
            warn!(error = %err, "failed to post guidance");
        }
    });
    StatusCode::ACCEPTED.into_response()
}

/// `POST /api/sessions/:key/interrupt` — cancel the run in flight, if any,
/// and mark the session supervised. `Operator` only.
pub async fn interrupt(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Extension(role): Extension<AuthenticatedRole>,
) -> Response {
    if let Err(resp) = require_operator(&role) {
        return resp;
    }
    match state.kernel.request_interrupt(&SessionKey::from(key)).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => (StatusCode::INTERNAL_SERVER_ERROR, format!("{err:#}")).into_response(),
    }
}

#[derive(Debug, Deserialize)]
pub struct GhostwriteRequest {
    pub content: String,
}

/// `POST /api/sessions/:key/message` — append an assistant-role message
/// without an LLM call. `Operator` only.
pub async fn ghostwrite(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Extension(role): Extension<AuthenticatedRole>,
    Json(body): Json<GhostwriteRequest>,
) -> Response {
    if let Err(resp) = require_operator(&role) {
        return resp;
    }
    match state.kernel.ghostwrite(SessionKey::from(key), body.content).await {
        Ok(()) => StatusCode::ACCEPTED.into_response(),
        Err(err) => (StatusCode::INTERNAL_SERVER_ERROR, format!("{err:#}")).into_response(),
    }
}

#[derive(Debug, Deserialize)]
pub struct SetLlmEnabledRequest {
    pub enabled: bool,
}

/// `POST /api/sessions/:key/llm` — the supervisor kill switch: while
/// disabled, traffic still reaches the session but never starts a run.
/// `Operator` only.
pub async fn set_llm_enabled(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Extension(role): Extension<AuthenticatedRole>,
    Json(body): Json<SetLlmEnabledRequest>,
) -> Response {
    if let Err(resp) = require_operator(&role) {
        return resp;
    }
    match state.kernel.set_llm_enabled(&SessionKey::from(key), body.enabled).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => (StatusCode::INTERNAL_SERVER_ERROR, format!("{err:#}")).into_response(),
    }
}
