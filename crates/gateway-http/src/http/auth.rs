// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! HTTP Basic authentication against the User Registry, with a session
//! cookie issued on success and per-IP rate limiting on failure.
//!
//! # Credential check
//!
//! ```text
//! Authorization: Basic <base64(username:password)>
//! ```
//! verified against the account's Argon2id hash (see [`crate::http::state`]).
//! Every subsequent request may instead present the `gateway_session` cookie
//! issued on the first successful check, so a browser only has to send
//! credentials once.
//!
//! # Rate limiting
//!
//! Uses the `governor` crate (GCRA algorithm) for per-IP rate limiting,
//! configured from `HttpConfig::{max_auth_failures_per_minute,
//! auth_failure_burst}`. Only failed attempts consume a rate-limit token.
//! Loopback addresses are exempt: a local process that can reach the
//! loopback interface already has local access to the machine.

use std::net::{IpAddr, SocketAddr};

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use base64::Engine;
use tracing::warn;

use gateway_config::UserRole;

use crate::http::state::AppState;

pub const SESSION_COOKIE: &str = "gateway_session";

/// The authenticated caller's identity, inserted into request extensions by
/// [`basic_auth_mw`] so downstream handlers can gate mutating endpoints to
/// `Operator` without re-deriving it from the request, and so the username
/// can be threaded into `ControlCommand::ProcessMessage` for the kernel's
/// per-caller tool-permission gate.
#[derive(Debug, Clone)]
pub struct AuthenticatedRole {
    pub username: String,
    pub role: UserRole,
}

/// Axum middleware verifying either a session cookie or an `Authorization:
/// Basic` header. Returns `401` (with `WWW-Authenticate`, so browsers prompt
/// for credentials) on missing/wrong credentials, `429` once the per-IP
/// failure quota is exhausted.
pub async fn basic_auth_mw(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    mut req: Request,
    next: Next,
) -> Response {
    let ip = client_ip(req.headers(), addr);

    if let Some(token) = extract_cookie(req.headers(), SESSION_COOKIE) {
        if let Some((username, role)) = state.cookies.resolve(&token).await {
            req.extensions_mut().insert(AuthenticatedRole { username, role });
            return next.run(req).await;
        }
    }

    if let Some((username, password)) = extract_basic(req.headers()) {
        if let Some(role) = state.users.verify(&username, &password) {
            let token = state.cookies.issue(&username, role).await;
            req.extensions_mut().insert(AuthenticatedRole { username, role });
            let mut resp = next.run(req).await;
            let secure = if state.config.http.insecure_dev_mode { "" } else { "; Secure" };
            let cookie = format!(
                "{SESSION_COOKIE}={token}; HttpOnly; SameSite=Strict; Path=/; Max-Age={}{secure}",
                crate::http::state::COOKIE_LIFETIME_DAYS * 24 * 3600,
            );
            if let Ok(value) = HeaderValue::from_str(&cookie) {
                resp.headers_mut().append(header::SET_COOKIE, value);
            }
            return resp;
        }
    }

    if !state.auth_limiter.check(ip) {
        warn!(%ip, "rate limit exceeded after repeated auth failures");
        return (
            StatusCode::TOO_MANY_REQUESTS,
            [(header::RETRY_AFTER, HeaderValue::from_static("60"))],
            "Too Many Requests",
        )
            .into_response();
    }

    warn!(%ip, "authentication failed");
    (
        StatusCode::UNAUTHORIZED,
        [(header::WWW_AUTHENTICATE, HeaderValue::from_static(r#"Basic realm="gateway""#))],
        "Unauthorized",
    )
        .into_response()
}

/// Reject a request whose authenticated role is not `Operator`. Handlers for
/// mutating endpoints call this after the auth middleware has already run.
pub fn require_operator(role: &AuthenticatedRole) -> Result<(), Response> {
    match role.role {
        UserRole::Owner | UserRole::Operator => Ok(()),
        UserRole::Viewer => Err((StatusCode::FORBIDDEN, "viewer accounts cannot perform this action").into_response()),
    }
}

// ── Helpers ───────────────────────────────────────────────────────────────

fn extract_basic(headers: &HeaderMap) -> Option<(String, String)> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let encoded = value.strip_prefix("Basic ")?;
    let decoded = base64::engine::general_purpose::STANDARD.decode(encoded).ok()?;
    let text = String::from_utf8(decoded).ok()?;
    let (user, pass) = text.split_once(':')?;
    Some((user.to_string(), pass.to_string()))
}

fn extract_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    let raw = headers.get(header::COOKIE)?.to_str().ok()?;
    raw.split(';').find_map(|part| {
        let (k, v) = part.trim().split_once('=')?;
        (k == name).then(|| v.to_string())
    })
}

fn client_ip(headers: &HeaderMap, fallback: SocketAddr) -> IpAddr {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or_else(|| fallback.ip())
}

// ── Unit tests ────────────────────────────────────────────────────────────
