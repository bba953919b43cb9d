// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use serde::{Deserialize, Serialize};

/// Serde default helper — returns `true`.
///
/// Used for config fields that should be enabled unless the user explicitly
/// sets them to `false`.  `#[serde(default)]` on a `bool` always falls back
/// to `bool::default()` (i.e. `false`), so a named function is required.
fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub tui: TuiConfig,
    /// HTTP/SSE front-end configuration.
    #[serde(default)]
    pub http: HttpConfig,
    /// Bot-style channel configuration (Telegram-style, WhatsApp-style).
    #[serde(default)]
    pub channels: ChannelsConfig,
    /// Operator accounts allowed to authenticate against the HTTP surface.
    #[serde(default)]
    pub users: UsersConfig,
    /// Media store used to enrich `{{media:<path>}}` tokens in agent replies.
    #[serde(default)]
    pub media: MediaConfig,
    /// Named provider configurations.
    ///
    /// Define custom endpoints, local models, or additional accounts here and
    /// reference them by name with `--model <key>` or `--model <key>/<model>`.
    ///
    /// ```yaml
    /// providers:
    ///   my_ollama:
    ///     provider: openai        # uses the OpenAI-compatible wire format
    ///     base_url: http://localhost:11434/v1
    ///     name: llama3.2          # default model for this provider
    ///   work_groq:
    ///     provider: groq
    ///     api_key_env: WORK_GROQ_KEY
    ///     name: llama-3.3-70b-versatile
    /// ```
    #[serde(default)]
    pub providers: std::collections::HashMap<String, ModelConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Provider identifier.  Run `gateway list-providers` for the full list.
    /// Common values: "openai" | "azure" | "groq" | "openrouter" | "ollama" |
    /// "mistral" | "deepseek" | "mock"
    pub provider: String,
    /// Model name forwarded to the provider API
    pub name: String,
    /// Environment variable that holds the API key (read at runtime)
    pub api_key_env: Option<String>,
    /// Explicit API key; prefer api_key_env in config files to avoid secrets
    /// in version-controlled files
    pub api_key: Option<String>,
    /// Base URL override.  Useful for local proxies, LiteLLM, or Cloudflare.
    /// For most hosted providers the correct default is auto-selected.
    pub base_url: Option<String>,
    /// Maximum tokens to request in a single completion
    pub max_tokens: Option<u32>,
    /// Sampling temperature (0.0–2.0)
    pub temperature: Option<f32>,

    // ── Azure OpenAI ─────────────────────────────────────────────────────────
    /// Azure resource name (the subdomain of `.openai.azure.com`).
    /// Required when provider = "azure" and base_url is not set.
    pub azure_resource: Option<String>,
    /// Azure deployment name.  Defaults to `model.name` when not set.
    pub azure_deployment: Option<String>,
    /// Azure REST API version string, e.g. `"2024-02-01"`.
    pub azure_api_version: Option<String>,

    // ── Provider-specific extras ──────────────────────────────────────────────
    /// Free-form provider-specific options forwarded as-is to the driver.
    /// Useful for headers or parameters not covered by the standard fields.
    #[serde(default)]
    pub driver_options: serde_json::Value,

    // ── Mock provider ─────────────────────────────────────────────────────────
    /// Path to YAML mock-responses file (used when provider = "mock").
    /// Can also be set via the SVEN_MOCK_RESPONSES environment variable.
    pub mock_responses_file: Option<String>,

    // ── Failover ──────────────────────────────────────────────────────────────
    /// Ordered list of backup models tried, in order, when this model and
    /// every earlier fallback is in cooldown or returns an auth error.
    /// Each entry is a complete model config in its own right (own provider,
    /// own credentials); fields not relevant to failover (e.g. mock settings)
    /// are still honoured per-entry.
    #[serde(default)]
    pub fallbacks: Vec<ModelConfig>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: "openai".into(),
            name: "gpt-4o".into(),
            // api_key_env is intentionally None here.  resolve_api_key() falls
            // through to the driver registry, which already knows the canonical
            // env-var name for each provider (OPENAI_API_KEY, GROQ_API_KEY,
            // etc.).  Hard-coding it here would shadow the registry lookup and
            // cause the wrong key to be sent whenever the provider is overridden
            // at the step level (e.g. <!-- gateway: provider=groq -->).
            api_key_env: None,
            api_key: None,
            base_url: None,
            max_tokens: Some(4096),
            temperature: Some(0.2),
            azure_resource: None,
            azure_deployment: None,
            azure_api_version: None,
            driver_options: serde_json::Value::Null,
            mock_responses_file: None,
            fallbacks: Vec::new(),
        }
    }
}

fn default_agent_mode() -> AgentMode {
    AgentMode::Agent
}
fn default_max_tool_rounds() -> u32 {
    200
}
fn default_compaction_threshold() -> f32 {
    0.85
}

/// Strategy used when compacting the session context.
///
/// `Structured` (default) instructs the model to produce a typed Markdown
/// checkpoint with fixed sections (Active Task, Key Decisions, Files &
/// Artifacts, Constraints, Pending Items, Session Narrative).  This produces
/// checkpoints that are easier for the model to navigate on future turns.
///
/// `Narrative` uses the original free-form summarisation prompt and is
/// available for backward-compatibility or when a simpler output is preferred.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CompactionStrategy {
    #[default]
    Structured,
    Narrative,
}

impl std::fmt::Display for CompactionStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CompactionStrategy::Structured => write!(f, "structured"),
            CompactionStrategy::Narrative => write!(f, "narrative"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Default mode when none is specified on the CLI
    #[serde(default = "default_agent_mode")]
    pub default_mode: AgentMode,
    /// Maximum number of autonomous tool-call rounds before stopping
    #[serde(default = "default_max_tool_rounds")]
    pub max_tool_rounds: u32,
    /// Token fraction at which proactive compaction triggers (0.0–1.0).
    /// The budget gate compares effective tokens (calibrated estimate + schema
    /// overhead) against the model's usable input budget, which is
    /// context_window minus max_output_tokens.
    #[serde(default = "default_compaction_threshold")]
    pub compaction_threshold: f32,
    /// Number of recent non-system messages preserved verbatim during
    /// compaction.  The oldest messages beyond this tail are summarised by
    /// the LLM.  Higher values retain more recent context but reduce the
    /// compression benefit.
    ///
    /// A value of 6 corresponds to roughly 3 back-and-forth turns
    /// (user + assistant per turn, tool results excluded from the count).
    /// Set to 0 to summarise the full history (original behaviour).
    #[serde(default = "default_compaction_keep_recent")]
    pub compaction_keep_recent: usize,
    /// Compaction checkpoint format.
    ///
    /// `structured` (default): produces a typed Markdown checkpoint with
    /// fixed sections preserving tasks, decisions, files, and constraints.
    /// `narrative`: uses the original free-form summarisation prompt.
    #[serde(default)]
    pub compaction_strategy: CompactionStrategy,
    /// Maximum tokens allowed for a single tool result before it is
    /// deterministically truncated before entering the session.
    ///
    /// Truncation is content-aware: shell output keeps head+tail lines, grep
    /// keeps leading matches, read_file keeps head+tail lines.  A value of
    /// 0 disables per-result truncation entirely.
    #[serde(default = "default_tool_result_token_cap")]
    pub tool_result_token_cap: usize,
    /// Fraction of the context window reserved for tool schemas, the dynamic
    /// context block (git/CI info), and measurement error in the token
    /// approximation.  Reduces the effective compaction trigger threshold.
    ///
    /// Example: threshold=0.85, reserve=0.10 → compaction fires when
    /// calibrated session tokens reach 75% of the input budget.
    #[serde(default = "default_compaction_overhead_reserve")]
    pub compaction_overhead_reserve: f32,
    /// System prompt override; leave None to use the built-in prompt
    #[serde(default)]
    pub system_prompt: Option<String>,

    /// Per-step wall-clock timeout in seconds (0 = no limit).
    /// Can be set in config, overridden by frontmatter or CLI flag.
    #[serde(default)]
    pub max_step_timeout_secs: u64,

    /// Total run wall-clock timeout in seconds (0 = no limit).
    #[serde(default)]
    pub max_run_timeout_secs: u64,

    /// Fire an asynchronous checkpoint after this many completed turns since
    /// the last one. 0 disables the turn-count trigger.
    #[serde(default = "default_checkpoint_turn_threshold")]
    pub checkpoint_turn_threshold: usize,

    /// Also fire a checkpoint once calibrated token usage crosses this
    /// fraction of the input budget (0.0–1.0), independent of turn count.
    #[serde(default = "default_checkpoint_token_threshold")]
    pub checkpoint_token_threshold: f32,

    /// Prepended to a supervisor's guidance text before it enters the
    /// session as a user-role message, so the model (and anyone reading the
    /// transcript) can tell it apart from the user's own words.
    #[serde(default = "default_guidance_prefix")]
    pub guidance_prefix: String,

    /// Also compact once the non-system message count reaches this cap,
    /// independent of token usage — bounds compaction latency on sessions
    /// built from many small messages that never trip the token threshold.
    /// 0 disables the message-count trigger.
    #[serde(default)]
    pub compaction_message_cap: usize,
}

fn default_checkpoint_turn_threshold() -> usize {
    8
}
fn default_checkpoint_token_threshold() -> f32 {
    0.6
}
fn default_guidance_prefix() -> String {
    "[supervisor guidance] ".to_string()
}

fn default_compaction_keep_recent() -> usize {
    6
}
fn default_tool_result_token_cap() -> usize {
    4000
}
fn default_compaction_overhead_reserve() -> f32 {
    0.10
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            default_mode: AgentMode::Agent,
            max_tool_rounds: 200,
            compaction_threshold: 0.85,
            compaction_keep_recent: default_compaction_keep_recent(),
            compaction_strategy: CompactionStrategy::Structured,
            tool_result_token_cap: default_tool_result_token_cap(),
            compaction_overhead_reserve: default_compaction_overhead_reserve(),
            system_prompt: None,
            max_step_timeout_secs: 0,
            max_run_timeout_secs: 0,
            checkpoint_turn_threshold: default_checkpoint_turn_threshold(),
            checkpoint_token_threshold: default_checkpoint_token_threshold(),
            guidance_prefix: default_guidance_prefix(),
            compaction_message_cap: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum AgentMode {
    /// Pure research – read-only tools, no writes
    Research,
    /// Generate a structured plan, no code changes
    Plan,
    /// Full agent with read/write tools
    Agent,
}

impl std::fmt::Display for AgentMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentMode::Research => write!(f, "research"),
            AgentMode::Plan => write!(f, "plan"),
            AgentMode::Agent => write!(f, "agent"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Automatically approve shell commands matching these glob patterns
    pub auto_approve_patterns: Vec<String>,
    /// Block shell commands matching these glob patterns
    pub deny_patterns: Vec<String>,
    /// Timeout in seconds for a single tool call
    pub timeout_secs: u64,
    /// Use Docker sandbox for shell execution
    pub use_docker: bool,
    /// Docker image to use when use_docker is true
    pub docker_image: Option<String>,
    /// Web fetch and search configuration
    #[serde(default)]
    pub web: WebConfig,
    /// Persistent memory configuration
    #[serde(default)]
    pub memory: MemoryConfig,
    /// Linter configuration
    #[serde(default)]
    pub lints: LintsConfig,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            auto_approve_patterns: vec![
                "cat *".into(),
                "ls *".into(),
                "find *".into(),
                "rg *".into(),
                "grep *".into(),
            ],
            deny_patterns: vec!["rm -rf /*".into(), "dd if=*".into()],
            timeout_secs: 30,
            use_docker: false,
            docker_image: None,
            web: WebConfig::default(),
            memory: MemoryConfig::default(),
            lints: LintsConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WebSearchConfig {
    /// Brave Search API key (also checked via BRAVE_API_KEY env var)
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebConfig {
    /// Search backend configuration
    #[serde(default)]
    pub search: WebSearchConfig,
    /// Default maximum characters for web_fetch (default 50000)
    pub fetch_max_chars: usize,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            search: WebSearchConfig::default(),
            fetch_max_chars: 50_000,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Path to the memory JSON file (default: ~/.config/gateway/memory.json)
    pub memory_file: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MediaConfig {
    /// Root directory `{{media:<relative-path>}}` tokens resolve against
    /// (default: `.gateway/media`). Conventional subdirectories underneath:
    /// `camera/`, `browser/`, `screenshots/`, `inbound/`, `generated/`,
    /// `downloads/`.
    pub root_dir: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LintsConfig {
    /// Override the lint command for Rust projects
    pub rust_command: Option<String>,
    /// Override the lint command for TypeScript/JS projects
    pub typescript_command: Option<String>,
    /// Override the lint command for Python projects
    pub python_command: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TuiConfig {
    /// Colour theme: "dark" | "light" | "solarized"
    pub theme: String,
    /// Show line numbers in code blocks
    pub code_line_numbers: bool,
    /// Width used for markdown wrapping (0 = auto)
    pub wrap_width: u16,
    /// Use plain ASCII borders/indicators instead of Unicode box-drawing and
    /// Braille characters.  Enable this when the terminal font lacks wide
    /// Unicode support (the font renders replacement glyphs / "gibberish").
    /// Can also be forced with the SVEN_ASCII_BORDERS=1 environment variable.
    #[serde(default)]
    pub ascii_borders: bool,
}

impl Default for TuiConfig {
    fn default() -> Self {
        Self {
            theme: "dark".into(),
            code_line_numbers: false,
            wrap_width: 0,
            ascii_borders: false,
        }
    }
}

fn default_http_bind() -> String {
    "127.0.0.1:8787".into()
}

fn default_max_auth_failures_per_minute() -> u32 {
    5
}

fn default_auth_failure_burst() -> u32 {
    2
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Address the HTTP/SSE server binds to.
    #[serde(default = "default_http_bind")]
    pub bind: String,
    /// Skip TLS for local development. Never set this when `bind` is not a
    /// loopback address.
    #[serde(default)]
    pub insecure_dev_mode: bool,
    /// Failed HTTP Basic auth attempts allowed per minute before an IP is
    /// rate-limited. Loopback addresses are exempt.
    #[serde(default = "default_max_auth_failures_per_minute")]
    pub max_auth_failures_per_minute: u32,
    #[serde(default = "default_auth_failure_burst")]
    pub auth_failure_burst: u32,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind: default_http_bind(),
            insecure_dev_mode: false,
            max_auth_failures_per_minute: default_max_auth_failures_per_minute(),
            auth_failure_burst: default_auth_failure_burst(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChannelsConfig {
    #[serde(default)]
    pub telegram: Vec<TelegramAccountConfig>,
    #[serde(default)]
    pub whatsapp: Vec<WhatsAppAccountConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramAccountConfig {
    /// Human-readable label used in logs and `/status`.
    pub label: String,
    /// Bot token, or the name of an environment variable holding it when
    /// `token_env` is set instead of `token`.
    pub token: Option<String>,
    pub token_env: Option<String>,
    /// Chat/user IDs allowed to use this bot. Empty means "reject everyone"
    /// until explicitly configured — the gateway never defaults to open.
    #[serde(default)]
    pub allowed_chat_ids: Vec<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhatsAppAccountConfig {
    pub label: String,
    /// Shared secret used to verify the webhook signature header.
    pub webhook_secret_env: String,
    #[serde(default)]
    pub allowed_numbers: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UsersConfig {
    #[serde(default)]
    pub accounts: Vec<UserAccountConfig>,
}

impl UsersConfig {
    /// The single `owner` account, if the table has one.
    pub fn owner(&self) -> Option<&UserAccountConfig> {
        self.accounts.iter().find(|a| a.role == UserRole::Owner)
    }

    /// Exactly one `owner` account is required once any accounts are
    /// configured at all; a table with no accounts is the implicit
    /// single-local-operator case and is left to the Implicit authenticator.
    pub fn validate_owner_invariant(&self) -> Result<(), String> {
        if self.accounts.is_empty() {
            return Ok(());
        }
        match self.accounts.iter().filter(|a| a.role == UserRole::Owner).count() {
            1 => Ok(()),
            0 => Err("users.accounts: no account has role \"owner\"".into()),
            n => Err(format!("users.accounts: {n} accounts have role \"owner\", expected exactly 1")),
        }
    }

    /// Look up an account by its external identity on a given channel
    /// provider (e.g. `("telegram", "123456")`).
    pub fn by_platform_id(&self, provider: &str, platform_id: &str) -> Option<&UserAccountConfig> {
        self.accounts
            .iter()
            .find(|a| a.platform_ids.get(provider).map(|id| id.as_str()) == Some(platform_id))
    }

    pub fn by_username(&self, username: &str) -> Option<&UserAccountConfig> {
        self.accounts.iter().find(|a| a.username == username)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserAccountConfig {
    pub username: String,
    /// Argon2id PHC hash of the user's password, as produced by
    /// `gateway users set-password`. Never the plaintext.
    pub password_hash: String,
    #[serde(default)]
    pub role: UserRole,
    /// External identities this account answers to, keyed by channel
    /// provider name (e.g. `"telegram"` -> platform user id). Populated once
    /// at load time; consulted by Platform authentication.
    #[serde(default)]
    pub platform_ids: std::collections::HashMap<String, String>,
    /// Tool names this account may invoke. Empty means every tool.
    #[serde(default)]
    pub tool_allow: Vec<String>,
    /// Whether this account may issue `/`-prefixed commands.
    #[serde(default = "default_true")]
    pub commands: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    /// The single account with unrestricted access to every tool, every
    /// channel, and the owner-only commands. Exactly one account must carry
    /// this role whenever any accounts are configured at all.
    Owner,
    #[default]
    Operator,
    Viewer,
}

impl UserRole {
    /// Whether accounts with this role may issue `/`-prefixed commands by
    /// default, absent a per-account override.
    pub fn commands_allowed_by_default(self) -> bool {
        !matches!(self, UserRole::Viewer)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
