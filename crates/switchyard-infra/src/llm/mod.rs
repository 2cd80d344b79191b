//! Provider implementations and registry construction.
//!
//! Every `[[providers]]` entry of `gateway.toml` becomes a
//! [`ScriptedProvider`] registered under its name, priority, model
//! patterns, timeout and resolved price.

pub mod classify;
pub mod pricing;
pub mod scripted;

use switchyard_core::llm::box_provider::BoxProviderClient;
use switchyard_core::llm::registry::{ProviderRegistry, RegistryError};
use switchyard_types::config::GatewayConfig;
use switchyard_types::provider::ProviderDescriptor;

use self::scripted::ScriptedProvider;

/// Build the registry from the enabled providers in `config`.
pub fn build_registry(config: &GatewayConfig) -> Result<ProviderRegistry, RegistryError> {
    let mut registry = ProviderRegistry::new();

    for provider in &config.providers {
        if !provider.enabled {
            tracing::debug!(provider = %provider.name, "Skipping disabled provider");
            continue;
        }
        let descriptor = ProviderDescriptor {
            name: provider.name.clone(),
            priority: provider.priority,
            model_patterns: provider.models.clone(),
            timeout_ms: provider.timeout_ms,
            cost: pricing::cost_for_provider(provider, &config.pricing),
        };
        let client = ScriptedProvider::new(&provider.name, provider.script.clone());
        registry.register(descriptor, BoxProviderClient::new(client))?;
    }

    if registry.is_empty() {
        tracing::warn!("No enabled providers configured; every model will be unknown");
    }
    Ok(registry)
}
