// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Authenticated HTTP/SSE front end for the agent gateway.
//!
//! Talks to the same command/event planes every other channel uses
//! ([`gateway_bus::CommandBus`] / [`gateway_bus::EventBus`]) over HTTP Basic
//! auth, Server-Sent Events, and a small JSON API. See [`http`] for the
//! router and handlers.

pub mod http;

pub use http::state::AppState;
pub use http::{router, serve};
