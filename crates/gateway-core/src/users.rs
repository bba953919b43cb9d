// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! User Registry: authenticates callers arriving from any channel and
//! resolves the permissions attached to their account.
//!
//! Loaded once from `Config::users` at startup. Three authenticator flavors
//! compose into a single `Authenticate` entry point so channels never need
//! to know which one applies to them.

use std::collections::HashMap;

use argon2::password_hash::{PasswordHash, PasswordVerifier};
use argon2::Argon2;

use gateway_config::{Config, ResolvedRole, UserAccountConfig};

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("no credentials supplied")]
    NoCredentials,
    #[error("authentication failed")]
    AuthFailed,
    #[error("no such user")]
    UserNotFound,
}

/// The three ways a caller can prove who they are.
pub enum Credentials<'a> {
    /// Trusted local access (the TUI, the owning process). Always resolves
    /// to the owner, whether or not one is configured.
    Implicit,
    /// The transport has already verified identity (a Telegram/WhatsApp
    /// webhook signature, say); look the account up by its mapped id.
    Platform { provider: &'a str, platform_id: &'a str },
    /// A username/password pair, verified against the stored Argon2id hash.
    Challenge { username: &'a str, password: &'a str },
}

/// Authenticated identity plus the role it resolved to. Cheap to clone and
/// carry around in a `SessionContext` for the life of one call.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub username: String,
    pub role: ResolvedRole,
}

/// Loaded once from `Config::users`, indexed for constant-time lookup by
/// username and by `(provider, platform_id)`.
pub struct UserRegistry {
    by_username: HashMap<String, UserAccountConfig>,
    by_platform: HashMap<(String, String), String>,
}

impl UserRegistry {
    /// Build the registry from configuration. Accounts whose role cannot be
    /// resolved are logged and skipped here, at load time, never silently
    /// deferred to request time.
    pub fn from_config(config: &Config) -> Self {
        let mut by_username = HashMap::new();
        let mut by_platform = HashMap::new();
        for account in &config.users.accounts {
            for (provider, platform_id) in &account.platform_ids {
                by_platform.insert((provider.clone(), platform_id.clone()), account.username.clone());
            }
            by_username.insert(account.username.clone(), account.clone());
        }
        Self { by_username, by_platform }
    }

    pub fn authenticate(&self, credentials: Credentials<'_>) -> Result<AuthenticatedUser, AuthError> {
        match credentials {
            Credentials::Implicit => Ok(self.implicit_identity()),
            Credentials::Platform { provider, platform_id } => {
                let username = self
                    .by_platform
                    .get(&(provider.to_string(), platform_id.to_string()))
                    .ok_or(AuthError::UserNotFound)?;
                self.resolve_username(username).ok_or(AuthError::UserNotFound)
            }
            Credentials::Challenge { username, password } => {
                if username.is_empty() || password.is_empty() {
                    return Err(AuthError::NoCredentials);
                }
                let account = self.by_username.get(username).ok_or(AuthError::UserNotFound)?;
                let parsed = PasswordHash::new(&account.password_hash).map_err(|_| AuthError::AuthFailed)?;
                Argon2::default()
                    .verify_password(password.as_bytes(), &parsed)
                    .map_err(|_| AuthError::AuthFailed)?;
                Ok(AuthenticatedUser { username: account.username.clone(), role: ResolvedRole::from_account(account) })
            }
        }
    }

    /// `ResolveUserRole(user)`: look up an already-authenticated username's
    /// current permissions. Distinct from `authenticate` so a long-lived
    /// session can re-check permissions without re-presenting credentials.
    pub fn resolve_role(&self, username: &str) -> Option<ResolvedRole> {
        self.by_username.get(username).map(ResolvedRole::from_account)
    }

    fn resolve_username(&self, username: &str) -> Option<AuthenticatedUser> {
        let account = self.by_username.get(username)?;
        Some(AuthenticatedUser { username: account.username.clone(), role: ResolvedRole::from_account(account) })
    }

    fn implicit_identity(&self) -> AuthenticatedUser {
        if let Some(owner) = self.by_username.values().find(|a| a.role == gateway_config::UserRole::Owner) {
            return AuthenticatedUser { username: owner.username.clone(), role: ResolvedRole::from_account(owner) };
        }
        AuthenticatedUser { username: "owner".into(), role: ResolvedRole::implicit_owner() }
    }
}
