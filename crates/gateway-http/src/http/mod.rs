// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! The HTTP/SSE front end: router assembly, auth, and handlers.

pub mod api;
pub mod auth;
pub mod pages;
pub mod security;
pub mod sse;
pub mod state;

use std::net::SocketAddr;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;
use tracing::info;

use state::AppState;

/// Build the full router: every route requires authentication (session
/// cookie or HTTP Basic), every response gets the security-header set, and
/// cross-origin mutating requests are rejected before they reach a handler.
///
/// Layer order matters: `.layer()` wraps from the inside out, so the last
/// one added runs first on the way in. Declared bottom-up here, that's
/// trace (outermost) → security headers → CSRF guard → auth → routes.
pub fn router(state: AppState) -> Router {
    let routes = Router::new()
        .route("/", get(pages::index))
        .route("/chat", get(pages::chat))
        .route("/api/status", get(api::status))
        .route("/api/send", post(api::send))
        .route("/api/events", get(sse::events))
        .route("/api/media", get(api::media))
        .route("/api/sessions/:key/events", get(sse::session_events))
        .route("/api/sessions/:key/guidance", post(api::guidance))
        .route("/api/sessions/:key/message", post(api::ghostwrite))
        .route("/api/sessions/:key/llm", post(api::set_llm_enabled))
        .route("/api/sessions/:key/interrupt", post(api::interrupt))
        .with_state(state.clone());

    routes
        .layer(axum::middleware::from_fn_with_state(state, auth::basic_auth_mw))
        .layer(axum::middleware::from_fn(security::csrf_guard))
        .layer(axum::middleware::from_fn(security::security_headers))
        .layer(TraceLayer::new_for_http())
}

/// Bind and serve. Blocks until the listener stops, which in practice means
/// until the process receives a shutdown signal — the binary's main loop
/// drives that, not this function.
pub async fn serve(state: AppState, bind: &str) -> anyhow::Result<()> {
    let addr: SocketAddr = bind.parse()?;
    if !state.config.http.insecure_dev_mode {
        tracing::warn!(
            "no TLS certificate is configured yet; serving plain HTTP despite insecure_dev_mode = false"
        );
    }
    info!(%addr, "starting HTTP gateway");
    axum_server::bind(addr)
        .serve(router(state).into_make_service_with_connect_info::<SocketAddr>())
        .await?;
    Ok(())
}
