// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Skill metadata surfaced in the system prompt's skills section.
//!
//! This is a data contract only: where `SkillInfo` entries come from (a
//! config file, an external registry, a future discovery mechanism) is not
//! this crate's concern — `AgentRuntimeContext::skills` is populated by
//! whatever the caller passes in.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Flags controlling how a skill is surfaced in the system prompt.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SkillMeta {
    /// Always include this skill's metadata in the system prompt, regardless
    /// of token budget.
    #[serde(default)]
    pub always: bool,
    /// When `true` the skill is excluded from the model's `<available_skills>`
    /// list but still invocable explicitly (e.g. via a slash command).
    #[serde(default)]
    pub user_invocable_only: bool,
}

/// One skill entry: a slash-command name, description, and optional body the
/// `load_skill` tool can return when the model invokes it.
#[derive(Debug, Clone)]
pub struct SkillInfo {
    /// Slash-command key (e.g. `"gateway/plan"`).
    pub command: String,
    /// Human-readable display name.
    pub name: String,
    /// Description injected into the `<available_skills>` block (should
    /// contain trigger phrases).
    pub description: String,
    /// Full instructions returned by `load_skill(command)`.
    pub content: String,
    /// Absolute path to the skill's source file, when it has one.
    pub source_path: Option<PathBuf>,
    pub meta: Option<SkillMeta>,
}
