// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Shared state threaded through every axum handler.

use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::Arc;

use argon2::password_hash::{PasswordHash, PasswordVerifier};
use argon2::Argon2;
use governor::{clock::DefaultClock, state::keyed::DashMapStateStore, Quota, RateLimiter};
use tokio::sync::RwLock;

use gateway_bus::EventBus;
use gateway_config::{Config, UserRole};
use gateway_core::Kernel;

/// Verifies HTTP Basic credentials against the configured user accounts.
/// Holds only the PHC-format Argon2id hashes `gateway users set-password`
/// wrote into the config; plaintext passwords never touch this struct.
pub struct UserRegistry {
    accounts: HashMap<String, (String, UserRole)>,
}

impl UserRegistry {
    pub fn from_config(config: &Config) -> Self {
        let accounts = config
            .users
            .accounts
            .iter()
            .map(|a| (a.username.clone(), (a.password_hash.clone(), a.role)))
            .collect();
        Self { accounts }
    }

    /// Returns the account's role if `username`/`password` verify. Argon2's
    /// own comparison is constant-time; no extra care is needed here.
    pub fn verify(&self, username: &str, password: &str) -> Option<UserRole> {
        let (hash, role) = self.accounts.get(username)?;
        let parsed = PasswordHash::new(hash).ok()?;
        Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .ok()?;
        Some(*role)
    }
}

/// One issued session cookie.
struct CookieSession {
    username: String,
    role: UserRole,
    expires_at: chrono::DateTime<chrono::Utc>,
}

/// In-memory session-cookie store. A successful Basic auth issues a token
/// here so the browser doesn't have to resend credentials on every request;
/// cookies outlive the process, but the process doesn't outlive a restart —
/// there is deliberately no persistence layer for this, it's cheaper for an
/// operator to log back in than to design a cookie store migration.
pub struct SessionCookies {
    sessions: RwLock<HashMap<String, CookieSession>>,
}

/// How long an issued session cookie stays valid.
pub const COOKIE_LIFETIME_DAYS: i64 = 30;

impl SessionCookies {
    pub fn new() -> Self {
        Self { sessions: RwLock::new(HashMap::new()) }
    }

    pub async fn issue(&self, username: &str, role: UserRole) -> String {
        let token = random_token();
        let session = CookieSession {
            username: username.to_string(),
            role,
            expires_at: chrono::Utc::now() + chrono::Duration::days(COOKIE_LIFETIME_DAYS),
        };
        self.sessions.write().await.insert(token.clone(), session);
        token
    }

    pub async fn resolve(&self, token: &str) -> Option<(String, UserRole)> {
        let sessions = self.sessions.read().await;
        let session = sessions.get(token)?;
        if session.expires_at < chrono::Utc::now() {
            return None;
        }
        Some((session.username.clone(), session.role))
    }
}

impl Default for SessionCookies {
    fn default() -> Self {
        Self::new()
    }
}

fn random_token() -> String {
    use rand::RngCore;
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

type IpLimiter = RateLimiter<std::net::IpAddr, DashMapStateStore<std::net::IpAddr>, DefaultClock>;

/// Per-IP failed-auth rate limiter. Consumed only on a failed attempt, same
/// reasoning as the teacher's bearer-token gateway: legitimate traffic is
/// never throttled by its own requests, and loopback is exempt because a
/// local process already has local access to the machine.
pub struct AuthLimiter {
    limiter: IpLimiter,
}

impl AuthLimiter {
    pub fn new(max_per_minute: u32, burst: u32) -> Self {
        let quota = Quota::per_minute(NonZeroU32::new(max_per_minute.max(1)).unwrap())
            .allow_burst(NonZeroU32::new(burst.max(1)).unwrap());
        Self { limiter: RateLimiter::keyed(quota) }
    }

    pub fn check(&self, ip: std::net::IpAddr) -> bool {
        is_loopback(ip) || self.limiter.check_key(&ip).is_ok()
    }
}

fn is_loopback(ip: std::net::IpAddr) -> bool {
    match ip {
        std::net::IpAddr::V4(v4) => v4 == std::net::Ipv4Addr::LOCALHOST,
        std::net::IpAddr::V6(v6) => v6.is_loopback(),
    }
}

#[derive(Clone)]
pub struct AppState {
    pub kernel: Arc<Kernel>,
    pub events: Arc<EventBus>,
    pub config: Arc<Config>,
    pub users: Arc<UserRegistry>,
    pub cookies: Arc<SessionCookies>,
    pub auth_limiter: Arc<AuthLimiter>,
}

impl AppState {
    pub fn new(kernel: Arc<Kernel>, events: Arc<EventBus>, config: Arc<Config>) -> Self {
        let users = Arc::new(UserRegistry::from_config(&config));
        let auth_limiter = Arc::new(AuthLimiter::new(
            config.http.max_auth_failures_per_minute,
            config.http.auth_failure_burst,
        ));
        Self {
            kernel,
            events,
            config,
            users,
            cookies: Arc::new(SessionCookies::new()),
            auth_limiter,
        }
    }
}
