// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use gateway_model::Message;
use uuid::Uuid;

/// One saved turn in the conversation log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnRecord {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub role: String,
    pub content: String,
}

/// In-memory conversation session.
#[derive(Debug)]
pub struct Session {
    pub id: String,
    pub messages: Vec<Message>,
    /// Approximate total token count for the current message list
    pub token_count: usize,
    /// Maximum context tokens (set from model config / provider limits)
    pub max_tokens: usize,
    /// Tokens the provider reserves for its own reply. 0 if the catalog
    /// doesn't report one, in which case `input_budget` falls back to the
    /// full context window.
    pub max_output_tokens: usize,
    /// Multiplier applied to `approx_tokens()`'s char/4 estimate when sizing
    /// a compaction prompt, to compensate for its tendency to undercount
    /// against a real tokenizer.
    pub calibration_factor: f32,
    /// Estimated tokens consumed by tool schemas and dynamic context for the
    /// current turn. Recomputed before each model call; folded into the
    /// compaction budget alongside `token_count`.
    pub schema_overhead: usize,
    /// Cumulative tokens served from the provider's prompt cache this session.
    pub cache_read_total: u32,
    /// Cumulative tokens written into the provider's prompt cache this session.
    pub cache_write_total: u32,
    /// Opaque per-provider state (e.g. a stateful API's prior response id),
    /// keyed by provider name. The session stores it without inspecting its
    /// shape; only the provider that wrote it interprets it.
    pub provider_state: std::collections::HashMap<String, String>,
}

impl Session {
    pub fn new(max_tokens: usize) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            messages: Vec::new(),
            token_count: 0,
            max_tokens,
            max_output_tokens: 0,
            calibration_factor: 1.15,
            schema_overhead: 0,
            cache_read_total: 0,
            cache_write_total: 0,
            provider_state: std::collections::HashMap::new(),
        }
    }

    /// Opaque state a provider previously persisted under `key`, if any.
    pub fn get_provider_state(&self, key: &str) -> Option<&str> {
        self.provider_state.get(key).map(String::as_str)
    }

    /// Persist opaque provider state under `key`, replacing any prior value.
    pub fn set_provider_state(&mut self, key: impl Into<String>, value: String) {
        self.provider_state.insert(key.into(), value);
    }

    /// Tokens available for input after reserving the model's output budget.
    pub fn input_budget(&self) -> usize {
        self.max_tokens.saturating_sub(self.max_output_tokens)
    }

    /// Accumulate a turn's cache read/write counts into the session totals.
    pub fn add_cache_usage(&mut self, read: u32, write: u32) {
        self.cache_read_total += read;
        self.cache_write_total += write;
    }

    /// Fold the provider's reported input token count into `calibration_factor`,
    /// nudging the char/4 estimate towards what the real tokenizer saw.
    pub fn update_calibration(&mut self, actual_input: u32, estimated: usize) {
        if estimated == 0 {
            return;
        }
        let ratio = actual_input as f32 / estimated as f32;
        // Exponential moving average so one noisy turn can't swing the factor.
        self.calibration_factor = self.calibration_factor * 0.8 + ratio * 0.2;
    }

    pub fn push(&mut self, msg: Message) {
        self.token_count += msg.approx_tokens();
        self.messages.push(msg);
    }

    pub fn push_many(&mut self, msgs: impl IntoIterator<Item = Message>) {
        for m in msgs { self.push(m); }
    }

    /// Fraction of context window consumed (0.0–1.0)
    pub fn context_fraction(&self) -> f32 {
        if self.max_tokens == 0 { return 0.0; }
        (self.token_count as f32) / (self.max_tokens as f32)
    }

    pub fn is_near_limit(&self, threshold: f32) -> bool {
        self.context_fraction() >= threshold
    }

    /// Recalculate token count from scratch (call after compaction).
    pub fn recalculate_tokens(&mut self) {
        self.token_count = self.messages.iter().map(|m| m.approx_tokens()).sum();
    }

    /// Replace the message list and recalculate token count (for resubmit / edit).
    pub fn replace_messages(&mut self, messages: Vec<Message>) {
        self.messages = messages;
        self.recalculate_tokens();
    }

    /// Swap the live message list out for an empty view, returning what was
    /// displaced. Used for a `FreshContext` run: the model must not see
    /// prior history, but the history itself is not meant to be lost — the
    /// caller restores (and re-merges onto) the displaced messages once the
    /// run completes.
    pub fn take_for_fresh_view(&mut self) -> Vec<Message> {
        let old = std::mem::take(&mut self.messages);
        self.recalculate_tokens();
        old
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
