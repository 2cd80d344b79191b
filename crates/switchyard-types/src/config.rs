//! Gateway configuration types for Switchyard.
//!
//! `GatewayConfig` represents the top-level `gateway.toml` that controls
//! quota tiers, dispatch policy, stream relay behaviour, the provider list
//! and pricing overrides. Every field has a default so an empty file (or no
//! file at all) yields a working gateway backed by simulated providers.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::budget::Quota;
use crate::dispatch::DispatchPolicy;
use crate::provider::CostTable;

/// Top-level configuration for the gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub budget: BudgetConfig,

    #[serde(default)]
    pub dispatch: DispatchConfig,

    #[serde(default)]
    pub relay: RelayConfig,

    #[serde(default = "default_providers")]
    pub providers: Vec<ProviderConfig>,

    /// Pricing overrides by model pattern.
    #[serde(default)]
    pub pricing: Vec<ProviderPricing>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            budget: BudgetConfig::default(),
            dispatch: DispatchConfig::default(),
            relay: RelayConfig::default(),
            providers: default_providers(),
            pricing: Vec::new(),
        }
    }
}

/// Longest accepted budget window: ten years.
pub const MAX_BUDGET_WINDOW_SECS: u64 = 10 * 366 * 24 * 3_600;

/// Quota tiers and per-user tier assignment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetConfig {
    /// Length of the accounting window in seconds.
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,

    /// Tier for users without an explicit assignment.
    #[serde(default = "default_tier")]
    pub default_tier: String,

    #[serde(default = "default_tiers")]
    pub tiers: HashMap<String, Quota>,

    /// user id -> tier name
    #[serde(default)]
    pub users: HashMap<String, String>,
}

fn default_window_secs() -> u64 {
    3_600
}

fn default_tier() -> String {
    "free".to_string()
}

fn default_tiers() -> HashMap<String, Quota> {
    HashMap::from([
        (
            "free".to_string(),
            Quota {
                max_tokens: Some(10_000),
                max_requests: Some(10),
                max_output_tokens: Some(1_024),
            },
        ),
        (
            "pro".to_string(),
            Quota {
                max_tokens: Some(200_000),
                max_requests: Some(100),
                max_output_tokens: Some(4_096),
            },
        ),
        ("admin".to_string(), Quota::unlimited()),
    ])
}

impl BudgetConfig {
    /// The accounting window, clamped to [`MAX_BUDGET_WINDOW_SECS`].
    pub fn window(&self) -> chrono::Duration {
        let secs = self.window_secs.min(MAX_BUDGET_WINDOW_SECS);
        i64::try_from(secs)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .unwrap_or(chrono::Duration::MAX)
    }
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            window_secs: default_window_secs(),
            default_tier: default_tier(),
            tiers: default_tiers(),
            users: HashMap::new(),
        }
    }
}

/// Which dispatch policy a `DispatchConfig` selects.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyKind {
    #[default]
    Failover,
    Race,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    #[serde(default)]
    pub policy: PolicyKind,

    /// How many top candidates the race policy invokes at once.
    #[serde(default = "default_race_fan_out")]
    pub race_fan_out: usize,

    /// Warn when a fallback candidate costs more than this multiple of the primary.
    #[serde(default = "default_cost_warning_multiplier")]
    pub cost_warning_multiplier: f64,
}

fn default_race_fan_out() -> usize {
    2
}

fn default_cost_warning_multiplier() -> f64 {
    3.0
}

impl DispatchConfig {
    pub fn policy(&self) -> DispatchPolicy {
        match self.policy {
            PolicyKind::Failover => DispatchPolicy::Failover,
            PolicyKind::Race => DispatchPolicy::Race {
                fan_out: self.race_fan_out.max(1),
            },
        }
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            policy: PolicyKind::default(),
            race_fan_out: default_race_fan_out(),
            cost_warning_multiplier: default_cost_warning_multiplier(),
        }
    }
}

/// Stream relay behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Chunks buffered between the relay task and a slow consumer.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,

    /// Persist partial text when a provider fails mid-stream.
    #[serde(default = "default_true")]
    pub persist_on_interrupt: bool,

    /// Persist relayed text when the caller cancels.
    #[serde(default)]
    pub persist_on_cancel: bool,
}

fn default_channel_capacity() -> usize {
    32
}

fn default_true() -> bool {
    true
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
            persist_on_interrupt: true,
            persist_on_cancel: false,
        }
    }
}

/// One `[[providers]]` entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub name: String,

    #[serde(default)]
    pub priority: u32,

    /// Model-name patterns this provider serves.
    #[serde(default = "default_models")]
    pub models: Vec<String>,

    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Explicit price; when absent it is looked up from the pricing table.
    #[serde(default)]
    pub cost: Option<CostTable>,

    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Behaviour of the simulated upstream.
    #[serde(default)]
    pub script: ScriptConfig,
}

fn default_models() -> Vec<String> {
    vec!["*".to_string()]
}

fn default_timeout_ms() -> u64 {
    30_000
}

impl ProviderConfig {
    pub fn named(name: impl Into<String>, priority: u32) -> Self {
        Self {
            name: name.into(),
            priority,
            models: default_models(),
            timeout_ms: default_timeout_ms(),
            cost: None,
            enabled: true,
            script: ScriptConfig::default(),
        }
    }
}

fn default_providers() -> Vec<ProviderConfig> {
    vec![
        ProviderConfig::named("primary", 0),
        ProviderConfig::named("backup", 1),
    ]
}

/// Scripted behaviour for a simulated provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptConfig {
    /// Canned reply text. `{prompt}` is replaced by the last user message.
    #[serde(default = "default_reply")]
    pub reply: String,

    #[serde(default = "default_chunk_chars")]
    pub chunk_chars: usize,

    #[serde(default)]
    pub chunk_delay_ms: u64,

    /// Latency before the first byte (or the full response).
    #[serde(default)]
    pub first_byte_ms: u64,

    /// HTTP-like status to fail with (e.g. 429, 503, 401).
    #[serde(default)]
    pub fail_status: Option<u16>,

    #[serde(default)]
    pub fail_body: Option<String>,

    /// Fail after emitting this many chunks instead of before the first.
    #[serde(default)]
    pub fail_after_chunks: Option<u32>,
}

fn default_reply() -> String {
    "You said: {prompt}".to_string()
}

fn default_chunk_chars() -> usize {
    16
}

impl Default for ScriptConfig {
    fn default() -> Self {
        Self {
            reply: default_reply(),
            chunk_chars: default_chunk_chars(),
            chunk_delay_ms: 0,
            first_byte_ms: 0,
            fail_status: None,
            fail_body: None,
            fail_after_chunks: None,
        }
    }
}

/// Cost information for a model pattern.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderPricing {
    /// Glob-like pattern for matching model names (e.g., "claude-sonnet-*").
    pub model_pattern: String,
    /// Cost per million input tokens in USD.
    pub input_cost_per_million: f64,
    /// Cost per million output tokens in USD.
    pub output_cost_per_million: f64,
}
