//! Pricing tables for provider cost accounting.
//!
//! Provides a default table for well-known model families with override
//! capability from `gateway.toml`. Costs shown to users are labeled as
//! approximate (`~$0.12`).

use switchyard_types::config::{ProviderConfig, ProviderPricing};
use switchyard_types::provider::{CostTable, glob_match};

struct PricingEntry {
    model_prefix: &'static str,
    input_cost_per_million: f64,
    output_cost_per_million: f64,
}

/// Conservative fallback pricing when no model match is found.
const FALLBACK_INPUT_COST: f64 = 5.0;
const FALLBACK_OUTPUT_COST: f64 = 15.0;

/// USD per million tokens. More specific prefixes come first.
const DEFAULT_PRICING: &[PricingEntry] = &[
    PricingEntry {
        model_prefix: "claude-opus-4",
        input_cost_per_million: 15.0,
        output_cost_per_million: 75.0,
    },
    PricingEntry {
        model_prefix: "claude-sonnet-4",
        input_cost_per_million: 3.0,
        output_cost_per_million: 15.0,
    },
    PricingEntry {
        model_prefix: "claude-haiku-3",
        input_cost_per_million: 0.25,
        output_cost_per_million: 1.25,
    },
    PricingEntry {
        model_prefix: "gpt-4o-mini",
        input_cost_per_million: 0.15,
        output_cost_per_million: 0.60,
    },
    PricingEntry {
        model_prefix: "gpt-4o",
        input_cost_per_million: 2.50,
        output_cost_per_million: 10.0,
    },
    PricingEntry {
        model_prefix: "gemini-2",
        input_cost_per_million: 1.25,
        output_cost_per_million: 5.0,
    },
    PricingEntry {
        model_prefix: "mistral-large",
        input_cost_per_million: 2.0,
        output_cost_per_million: 6.0,
    },
];

/// Price for `model`.
///
/// Lookup order:
/// 1. `[[pricing]]` overrides whose pattern matches the model
/// 2. The default table, by prefix
pub fn lookup(model: &str, overrides: &[ProviderPricing]) -> Option<CostTable> {
    if let Some(pricing) = overrides.iter().find(|p| glob_match(&p.model_pattern, model)) {
        return Some(CostTable::new(
            pricing.input_cost_per_million,
            pricing.output_cost_per_million,
        ));
    }

    DEFAULT_PRICING
        .iter()
        .find(|entry| model.starts_with(entry.model_prefix))
        .map(|entry| CostTable::new(entry.input_cost_per_million, entry.output_cost_per_million))
}

/// Price for a configured provider: its explicit `cost`, else the first of
/// its model patterns with a known price, else the conservative fallback.
pub fn cost_for_provider(provider: &ProviderConfig, overrides: &[ProviderPricing]) -> CostTable {
    if let Some(cost) = provider.cost {
        return cost;
    }

    provider
        .models
        .iter()
        .find_map(|pattern| {
            // "gpt-4o*" is priced as "gpt-4o".
            let literal = pattern.split('*').next().unwrap_or_default();
            lookup(pattern, overrides).or_else(|| {
                if literal.is_empty() {
                    None
                } else {
                    lookup(literal, &[])
                }
            })
        })
        .unwrap_or_else(|| {
            tracing::debug!(
                provider = %provider.name,
                "No price known for provider models, using fallback pricing"
            );
            CostTable::new(FALLBACK_INPUT_COST, FALLBACK_OUTPUT_COST)
        })
}

/// Format a cost estimate, always prefixed with `~`.
///
/// - Below $0.01: 3 decimal places (`~$0.001`)
/// - Otherwise: 2 decimal places (`~$0.12`)
pub fn format_cost(cost: f64) -> String {
    if cost < 0.01 {
        format!("~${cost:.3}")
    } else {
        format!("~${cost:.2}")
    }
}
