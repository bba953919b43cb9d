// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Runtime context for an agent session.
//!
//! This is separate from [`gateway_config::AgentConfig`], which holds only
//! config-file fields.  [`AgentRuntimeContext`] carries values detected or
//! specified at runtime (project root, git/CI context, prompt overrides,
//! discovered skills).

use std::path::PathBuf;
use std::sync::Arc;

use gateway_runtime::{SharedAgents, SharedKnowledge};

use crate::SkillInfo;

/// Environment-detected context injected into an agent at construction time.
#[derive(Debug, Clone)]
pub struct AgentRuntimeContext {
    /// Absolute path to the project root (found via `.git` walk-up).
    pub project_root: Option<PathBuf>,
    /// Pre-formatted git context block (branch, commit, dirty status).
    pub git_context_note: Option<String>,
    /// Pre-formatted CI environment context block.
    pub ci_context_note: Option<String>,
    /// Contents of the project context file (`.gateway/context.md`, `AGENTS.md`, …).
    pub project_context_file: Option<String>,
    /// Text appended to the default system prompt (from `--append-system-prompt`).
    pub append_system_prompt: Option<String>,
    /// Full system prompt override (from `--system-prompt-file`).
    /// When set, replaces `AgentConfig::system_prompt` entirely.
    pub system_prompt_override: Option<String>,
    /// Skills available to this session, injected by the caller.
    pub skills: Arc<[SkillInfo]>,
    /// Subagents discovered from the standard search hierarchy.
    ///
    /// Held as [`SharedAgents`] so the TUI can trigger a live refresh and the
    /// next agent turn picks up new subagents when rebuilding the system prompt.
    pub agents: SharedAgents,
    /// Knowledge documents discovered from `.gateway/knowledge/`.
    pub knowledge: SharedKnowledge,
    /// Drift warning injected into the system prompt when a knowledge
    /// document's covered files changed after its `updated:` date.
    pub knowledge_drift_note: Option<String>,
}

impl Default for AgentRuntimeContext {
    fn default() -> Self {
        Self {
            project_root: None,
            git_context_note: None,
            ci_context_note: None,
            project_context_file: None,
            append_system_prompt: None,
            system_prompt_override: None,
            skills: Arc::from(Vec::<SkillInfo>::new()),
            agents: SharedAgents::default(),
            knowledge: SharedKnowledge::default(),
            knowledge_drift_note: None,
        }
    }
}
