// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Ordered failover chain over concrete `ModelProvider`s, each carrying a
//! cooldown timer. Wraps the whole chain as a single `ModelProvider` so the
//! rest of the gateway never has to know whether it's talking to one model
//! or several.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use anyhow::Context as _;
use async_trait::async_trait;
use gateway_config::ModelConfig;
use tracing::warn;

use crate::provider::ResponseStream;
use crate::{from_config, CompletionRequest, ModelProvider};

/// Classification of a provider-call failure, driving the failover decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderErrorKind {
    /// The model's context window was exceeded. Not handled here — the
    /// caller (the agent loop) compacts and retries against the same model.
    ContextOverflow,
    RateLimit,
    Timeout,
    Transient,
    /// Bad credentials or a malformed request. Surfaced immediately; no
    /// failover, since the next chain entry would fail identically or has
    /// nothing to do with the cause.
    Auth,
    Unknown,
}

/// Heuristically classify an error returned by `ModelProvider::complete`.
///
/// Providers in this workspace format transport failures as
/// `"{driver} error {status}: {body}"` (see `openai_wire.rs`), so a leading
/// HTTP status code after " error " is the primary signal.
pub fn classify_error(err: &anyhow::Error) -> ProviderErrorKind {
    let msg = err.to_string();
    if msg.contains("exceed_context_size_error") || msg.contains("context_length_exceeded") {
        return ProviderErrorKind::ContextOverflow;
    }
    if msg.to_lowercase().contains("timed out") || msg.to_lowercase().contains("timeout") {
        return ProviderErrorKind::Timeout;
    }
    match extract_status_code(&msg) {
        Some(401) | Some(403) | Some(400) => ProviderErrorKind::Auth,
        Some(429) => ProviderErrorKind::RateLimit,
        Some(code) if (500..600).contains(&code) => ProviderErrorKind::Transient,
        _ => ProviderErrorKind::Unknown,
    }
}

fn extract_status_code(msg: &str) -> Option<u16> {
    let idx = msg.find(" error ")?;
    let rest = &msg[idx + " error ".len()..];
    rest.split_whitespace().next()?.parse().ok()
}

/// One entry in a call's attempt log, returned alongside a successful stream
/// so callers (the kernel, status endpoints) can surface which models were
/// skipped or failed before the one that answered.
#[derive(Debug, Clone)]
pub struct Attempt {
    pub model: String,
    pub skipped: bool,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct FailoverResult {
    pub attempts: Vec<Attempt>,
    /// Set when an earlier chain entry that had been in cooldown answered
    /// successfully on this call.
    pub recovered: Option<String>,
}

fn cooldown_for(kind: ProviderErrorKind) -> Duration {
    match kind {
        ProviderErrorKind::RateLimit => Duration::from_secs(60),
        ProviderErrorKind::Timeout => Duration::from_secs(20),
        ProviderErrorKind::Transient => Duration::from_secs(30),
        ProviderErrorKind::ContextOverflow | ProviderErrorKind::Auth | ProviderErrorKind::Unknown => {
            Duration::from_secs(30)
        }
    }
}

struct ChainEntry {
    label: String,
    provider: Box<dyn ModelProvider>,
    cooldown_until: Mutex<Option<Instant>>,
}

impl ChainEntry {
    fn is_cooling(&self) -> bool {
        matches!(*self.cooldown_until.lock().unwrap(), Some(until) if until > Instant::now())
    }
}

/// A `ModelProvider` over an ordered failover chain: the configured model
/// plus its `fallbacks`, each with an independent cooldown.
pub struct FailoverProvider {
    chain: Vec<ChainEntry>,
}

impl FailoverProvider {
    /// Build the chain from `primary` and its `fallbacks`, constructing a
    /// concrete provider for every entry up front so a bad `provider` id is
    /// reported at startup rather than the first time it's needed.
    pub fn new(primary: &ModelConfig) -> anyhow::Result<Self> {
        let mut configs = vec![primary.clone()];
        configs.extend(primary.fallbacks.iter().cloned());

        let mut chain = Vec::with_capacity(configs.len());
        for config in &configs {
            let provider = from_config(config)?;
            let label = format!("{}/{}", config.provider, config.name);
            chain.push(ChainEntry {
                label,
                provider,
                cooldown_until: Mutex::new(None),
            });
        }
        Ok(Self { chain })
    }

    /// The entry currently preferred for display/catalog purposes: the first
    /// one not in cooldown, falling back to the primary if the whole chain
    /// is cooling down.
    fn active(&self) -> &ChainEntry {
        self.chain
            .iter()
            .find(|e| !e.is_cooling())
            .unwrap_or(&self.chain[0])
    }

    /// Number of configured chain entries (primary + fallbacks).
    pub fn chain_len(&self) -> usize {
        self.chain.len()
    }

    /// Run the failover algorithm: skip entries in cooldown, call each
    /// remaining entry in order, and either return the first successful
    /// stream or the last error once the whole chain is exhausted.
    pub async fn complete_with_failover(
        &self,
        req: CompletionRequest,
    ) -> anyhow::Result<(ResponseStream, FailoverResult)> {
        let mut result = FailoverResult::default();
        let mut last_err: Option<anyhow::Error> = None;

        for entry in &self.chain {
            if entry.is_cooling() {
                result.attempts.push(Attempt {
                    model: entry.label.clone(),
                    skipped: true,
                    reason: Some("in cooldown".into()),
                });
                continue;
            }
            let recovering = entry.cooldown_until.lock().unwrap().is_some();

            match entry.provider.complete(req.clone()).await {
                Ok(stream) => {
                    *entry.cooldown_until.lock().unwrap() = None;
                    if recovering {
                        result.recovered = Some(entry.label.clone());
                    }
                    return Ok((stream, result));
                }
                Err(e) => {
                    let kind = classify_error(&e);
                    if kind == ProviderErrorKind::Auth || kind == ProviderErrorKind::ContextOverflow {
                        // No failover: auth failures won't be fixed by trying
                        // the next model, and context overflow is the agent
                        // loop's job to recover from against this same model.
                        return Err(e);
                    }
                    let will_cooldown = !matches!(kind, ProviderErrorKind::Unknown);
                    warn!(
                        model = %entry.label,
                        ?kind,
                        will_cooldown,
                        "model call failed: {e}"
                    );
                    if will_cooldown {
                        *entry.cooldown_until.lock().unwrap() = Some(Instant::now() + cooldown_for(kind));
                    }
                    result.attempts.push(Attempt {
                        model: entry.label.clone(),
                        skipped: false,
                        reason: Some(e.to_string()),
                    });
                    last_err = Some(e);
                }
            }
        }

        Err(last_err
            .unwrap_or_else(|| anyhow::anyhow!("no model configured in the failover chain")))
        .context("every model in the failover chain is unavailable")
    }
}

#[async_trait]
impl ModelProvider for FailoverProvider {
    fn name(&self) -> &str {
        self.active().provider.name()
    }

    fn model_name(&self) -> &str {
        self.active().provider.model_name()
    }

    async fn complete(&self, req: CompletionRequest) -> anyhow::Result<ResponseStream> {
        self.complete_with_failover(req).await.map(|(stream, _)| stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mock_config(name: &str) -> ModelConfig {
        ModelConfig {
            provider: "mock".into(),
            name: name.into(),
            ..ModelConfig::default()
        }
    }

    #[test]
    fn classify_rate_limit_status() {
        let err = anyhow::anyhow!("openai error 429 Too Many Requests: slow down");
        assert_eq!(classify_error(&err), ProviderErrorKind::RateLimit);
    }

    #[test]
    fn classify_auth_status() {
        let err = anyhow::anyhow!("openai error 401 Unauthorized: bad key");
        assert_eq!(classify_error(&err), ProviderErrorKind::Auth);
    }

    #[test]
    fn classify_server_error_as_transient() {
        let err = anyhow::anyhow!("anthropic error 503 Service Unavailable: try again");
        assert_eq!(classify_error(&err), ProviderErrorKind::Transient);
    }

    #[test]
    fn classify_context_overflow() {
        let err = anyhow::anyhow!("llama error 400: {\"error\":{\"type\":\"exceed_context_size_error\",\"n_ctx\":4096}}");
        assert_eq!(classify_error(&err), ProviderErrorKind::ContextOverflow);
    }

    #[tokio::test]
    async fn single_entry_chain_behaves_like_the_underlying_provider() {
        let registry = FailoverProvider::new(&mock_config("primary")).unwrap();
        assert_eq!(registry.chain_len(), 1);
        let req = CompletionRequest {
            messages: vec![crate::Message::user("hi")],
            stream: true,
            ..Default::default()
        };
        let (mut stream, result) = registry.complete_with_failover(req).await.unwrap();
        assert!(result.attempts.is_empty());
        use futures::StreamExt;
        let mut got_any = false;
        while let Some(event) = stream.next().await {
            if event.is_ok() {
                got_any = true;
            }
        }
        assert!(got_any);
    }

    #[tokio::test]
    async fn fallback_chain_is_built_in_order() {
        let mut primary = mock_config("primary");
        primary.fallbacks.push(mock_config("backup"));
        let registry = FailoverProvider::new(&primary).unwrap();
        assert_eq!(registry.chain_len(), 2);
        assert_eq!(registry.chain[0].label, "mock/primary");
        assert_eq!(registry.chain[1].label, "mock/backup");
    }
}
