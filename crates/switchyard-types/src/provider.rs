//! Provider registry entries.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::llm::Usage;

/// USD price per million tokens.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CostTable {
    pub input_cost_per_million: f64,
    pub output_cost_per_million: f64,
}

impl CostTable {
    pub fn new(input_cost_per_million: f64, output_cost_per_million: f64) -> Self {
        Self {
            input_cost_per_million,
            output_cost_per_million,
        }
    }

    /// Mean of input and output price, used for ranking and cost warnings.
    pub fn average(&self) -> f64 {
        (self.input_cost_per_million + self.output_cost_per_million) / 2.0
    }

    pub fn cost_usd(&self, usage: &Usage) -> f64 {
        (f64::from(usage.input_tokens) * self.input_cost_per_million
            + f64::from(usage.output_tokens) * self.output_cost_per_million)
            / 1_000_000.0
    }
}

/// Static description of one registered provider.
///
/// Built once at startup and read-only afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderDescriptor {
    pub name: String,
    /// Lower ranks are tried first.
    pub priority: u32,
    /// Model-name patterns; `*` matches any run of characters.
    pub model_patterns: Vec<String>,
    pub timeout_ms: u64,
    pub cost: CostTable,
}

impl ProviderDescriptor {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn matches_model(&self, model: &str) -> bool {
        self.model_patterns.iter().any(|p| glob_match(p, model))
    }
}

/// Match `text` against a pattern where `*` stands for any (possibly empty)
/// run of characters. All other characters match literally.
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let mut parts = pattern.split('*');
    let Some(first) = parts.next() else {
        return text.is_empty();
    };
    let Some(mut rest) = text.strip_prefix(first) else {
        return false;
    };

    let tail: Vec<&str> = parts.collect();
    let Some((last, middle)) = tail.split_last() else {
        // No `*` in the pattern: exact match.
        return rest.is_empty();
    };

    for segment in middle {
        match rest.find(segment) {
            Some(idx) => rest = &rest[idx + segment.len()..],
            None => return false,
        }
    }
    rest.len() >= last.len() && rest.ends_with(last)
}
