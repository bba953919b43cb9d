// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Background checkpoint generation: produce a recoverable mid-conversation
//! summary without ever mutating the live session log. Unlike
//! [`crate::compact`], which rewrites `messages` in place on the assumption
//! the next turn will replace it with a summary, a checkpoint is a read-only
//! side artifact the Compactor may later consult via `PreferCheckpoint`.

use futures::StreamExt;

use gateway_config::CompactionStrategy;
use gateway_model::{CompletionRequest, Message, ResponseEvent, Role};

use crate::compact::structured_prompt_for;

/// A single checkpoint or compaction record, kept alongside (never inside)
/// the live message log.
#[derive(Debug, Clone)]
pub struct StoredCompaction {
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub tokens_before: usize,
    pub tokens_after: usize,
    pub message_count_after: usize,
    pub summary: String,
    pub model: String,
    pub from_checkpoint: bool,
    pub emergency_truncation: bool,
    pub used_fallback: bool,
}

/// Decides whether a checkpoint should fire for the given turn count and
/// token-usage fraction, per `AgentConfig::checkpoint_turn_threshold` /
/// `checkpoint_token_threshold`. A threshold of `0` disables its trigger.
pub fn should_trigger(
    turns_since_last: usize,
    token_fraction: f32,
    turn_threshold: usize,
    token_threshold: f32,
) -> bool {
    let turn_fired = turn_threshold > 0 && turns_since_last >= turn_threshold;
    let token_fired = token_threshold > 0.0 && token_fraction >= token_threshold;
    turn_fired || token_fired
}

/// Ask the model for a structured checkpoint of `messages` without touching
/// the caller's copy. Returns `Err` if the completion call itself fails;
/// callers should log and drop the trigger rather than propagate, per
/// "if the background task is already running, further triggers are
/// dropped" — a failed checkpoint is just another dropped trigger.
pub async fn generate_checkpoint(
    model: &dyn gateway_model::ModelProvider,
    messages: &[Message],
    strategy: &CompactionStrategy,
    max_tokens_before: usize,
) -> anyhow::Result<StoredCompaction> {
    let prompt_text = structured_prompt_for(messages, strategy);
    let request = CompletionRequest {
        messages: vec![Message::user(prompt_text)],
        tools: Vec::new(),
        stream: true,
        system_dynamic_suffix: None,
        cache_key: None,
        provider_state: None,
    };

    let mut stream = model.complete(request).await?;
    let mut summary = String::new();
    while let Some(event) = stream.next().await {
        if let ResponseEvent::TextDelta(delta) = event? {
            summary.push_str(&delta);
        }
    }

    let message_count_after = messages
        .iter()
        .filter(|m| m.role != Role::System)
        .count();

    Ok(StoredCompaction {
        created_at: chrono::Utc::now(),
        tokens_before: max_tokens_before,
        tokens_after: summary.len() / 4,
        message_count_after,
        summary,
        model: model.model_name().to_string(),
        from_checkpoint: true,
        emergency_truncation: false,
        used_fallback: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn turn_threshold_alone_fires_at_exact_count() {
        assert!(should_trigger(8, 0.0, 8, 0.0));
        assert!(!should_trigger(7, 0.0, 8, 0.0));
    }

    #[test]
    fn token_threshold_alone_fires_past_fraction() {
        assert!(should_trigger(0, 0.61, 0, 0.6));
        assert!(!should_trigger(0, 0.59, 0, 0.6));
    }

    #[test]
    fn zero_threshold_disables_its_own_trigger() {
        assert!(!should_trigger(1000, 0.0, 0, 0.0));
    }

    #[test]
    fn either_trigger_independently_fires() {
        // turns satisfied, tokens not: still fires.
        assert!(should_trigger(10, 0.1, 8, 0.6));
        // tokens satisfied, turns not: still fires.
        assert!(should_trigger(1, 0.9, 8, 0.6));
    }
}
