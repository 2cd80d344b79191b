//! Provider registry: resolves a model name to a ranked candidate list.
//!
//! Built once at startup. After that it is shared read-only (behind an `Arc`)
//! by every request, so no locking is needed.

use std::cmp::Ordering;
use std::sync::Arc;

use switchyard_types::error::GatewayError;
use switchyard_types::provider::ProviderDescriptor;

use super::box_provider::BoxProviderClient;

/// One resolved provider: its static descriptor plus the client to call.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub descriptor: Arc<ProviderDescriptor>,
    pub client: Arc<BoxProviderClient>,
}

impl Candidate {
    pub fn name(&self) -> &str {
        &self.descriptor.name
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RegistryError {
    #[error("no provider serves model '{0}'")]
    UnknownModel(String),

    #[error("provider '{0}' is already registered")]
    DuplicateProvider(String),
}

impl From<RegistryError> for GatewayError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::UnknownModel(model) => GatewayError::UnknownModel { model },
            RegistryError::DuplicateProvider(name) => GatewayError::Internal {
                message: format!("duplicate provider '{name}'"),
            },
        }
    }
}

#[derive(Debug, Default)]
pub struct ProviderRegistry {
    entries: Vec<Candidate>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        descriptor: ProviderDescriptor,
        client: BoxProviderClient,
    ) -> Result<(), RegistryError> {
        if self.entries.iter().any(|c| c.descriptor.name == descriptor.name) {
            return Err(RegistryError::DuplicateProvider(descriptor.name));
        }
        tracing::debug!(
            provider = %descriptor.name,
            priority = descriptor.priority,
            models = ?descriptor.model_patterns,
            "Registered provider"
        );
        self.entries.push(Candidate {
            descriptor: Arc::new(descriptor),
            client: Arc::new(client),
        });
        Ok(())
    }

    /// Candidates serving `model`, ranked by priority, then average cost
    /// ascending, then name for a stable order.
    pub fn resolve(&self, model: &str) -> Result<Vec<Candidate>, RegistryError> {
        let mut matches: Vec<Candidate> = self
            .entries
            .iter()
            .filter(|c| c.descriptor.matches_model(model))
            .cloned()
            .collect();

        if matches.is_empty() {
            return Err(RegistryError::UnknownModel(model.to_string()));
        }

        matches.sort_by(|a, b| {
            let (a, b) = (&a.descriptor, &b.descriptor);
            a.priority
                .cmp(&b.priority)
                .then_with(|| {
                    a.cost
                        .average()
                        .partial_cmp(&b.cost.average())
                        .unwrap_or(Ordering::Equal)
                })
                .then_with(|| a.name.cmp(&b.name))
        });
        Ok(matches)
    }

    /// All registered descriptors in registration order.
    pub fn descriptors(&self) -> impl Iterator<Item = &ProviderDescriptor> {
        self.entries.iter().map(|c| c.descriptor.as_ref())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{MockProvider, descriptor};
    use switchyard_types::provider::CostTable;

    fn registry() -> ProviderRegistry {
        let mut registry = ProviderRegistry::new();
        let entries = [
            ("expensive", 1, vec!["claude-*"], CostTable::new(15.0, 75.0)),
            ("cheap", 1, vec!["claude-*"], CostTable::new(0.8, 4.0)),
            ("first", 0, vec!["claude-sonnet-*"], CostTable::new(3.0, 15.0)),
            ("openai", 0, vec!["gpt-*"], CostTable::new(2.5, 10.0)),
        ];
        for (name, priority, models, cost) in entries {
            let mut d = descriptor(name, priority, 1_000);
            d.model_patterns = models.into_iter().map(String::from).collect();
            d.cost = cost;
            registry
                .register(d, BoxProviderClient::new(MockProvider::replying(name, "ok")))
                .unwrap();
        }
        registry
    }

    #[test]
    fn resolve_ranks_by_priority_then_cost() {
        let names: Vec<String> = registry()
            .resolve("claude-sonnet-4")
            .unwrap()
            .iter()
            .map(|c| c.name().to_string())
            .collect();
        assert_eq!(names, vec!["first", "cheap", "expensive"]);
    }

    #[test]
    fn resolve_filters_by_pattern() {
        let candidates = registry().resolve("claude-haiku-3").unwrap();
        assert_eq!(candidates.len(), 2);
        assert!(candidates.iter().all(|c| c.name() != "first"));
    }

    #[test]
    fn unknown_model_is_client_error() {
        let err = registry().resolve("llama-3").unwrap_err();
        assert_eq!(err, RegistryError::UnknownModel("llama-3".into()));
        let gateway: GatewayError = err.into();
        assert_eq!(gateway.status_code(), 404);
    }

    #[test]
    fn duplicate_names_rejected() {
        let mut registry = registry();
        let err = registry
            .register(
                descriptor("cheap", 5, 1_000),
                BoxProviderClient::new(MockProvider::replying("cheap", "ok")),
            )
            .unwrap_err();
        assert_eq!(err, RegistryError::DuplicateProvider("cheap".into()));
        assert_eq!(registry.len(), 4);
    }
}
