// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Data types shared between the User Registry (`gateway-core`) and anything
//! downstream that needs to know who is calling without pulling in the
//! registry's authentication machinery.

use serde::{Deserialize, Serialize};

use crate::{UserAccountConfig, UserRole};

/// How far into other sessions' history a resolved caller may read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TranscriptScope {
    /// Only the caller's own session.
    Own,
    /// Every session, including other users'. Owner-only in practice.
    All,
}

/// The resolved, ready-to-consult authorization profile for one account.
/// Built once per `Authenticate` call by the User Registry; never mutated.
#[derive(Debug, Clone)]
pub struct ResolvedRole {
    pub username: String,
    pub role: UserRole,
    /// Empty means every tool is allowed.
    pub tool_allow: Vec<String>,
    pub transcript_scope: TranscriptScope,
    pub commands: bool,
}

impl ResolvedRole {
    pub fn from_account(account: &UserAccountConfig) -> Self {
        let transcript_scope = match account.role {
            UserRole::Owner => TranscriptScope::All,
            UserRole::Operator | UserRole::Viewer => TranscriptScope::Own,
        };
        Self {
            username: account.username.clone(),
            role: account.role,
            tool_allow: account.tool_allow.clone(),
            transcript_scope,
            commands: account.commands,
        }
    }

    /// The implicit local-operator identity used when no `users.accounts`
    /// are configured at all: unrestricted, the Implicit authenticator's
    /// only possible outcome.
    pub fn implicit_owner() -> Self {
        Self {
            username: "owner".into(),
            role: UserRole::Owner,
            tool_allow: Vec::new(),
            transcript_scope: TranscriptScope::All,
            commands: true,
        }
    }

    /// `user.CanUseTool(name)` from the kernel's permission gate: owners may
    /// always use every tool; everyone else is checked against their
    /// allow-list, empty meaning unrestricted.
    pub fn can_use_tool(&self, name: &str) -> bool {
        if self.role == UserRole::Owner || self.tool_allow.is_empty() {
            return true;
        }
        self.tool_allow.iter().any(|t| t == name)
    }

    pub fn is_owner(&self) -> bool {
        self.role == UserRole::Owner
    }
}
