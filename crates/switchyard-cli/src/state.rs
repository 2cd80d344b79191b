//! Application state wiring config, database and the gateway together.
//!
//! The gateway is generic over its budget store and completion sink;
//! AppState pins both to the SQLite adapters.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use switchyard_core::dispatch::{AttemptSinks, TracingAttemptSink};
use switchyard_core::gateway::Gateway;
use switchyard_infra::config::{load_gateway_config, load_gateway_config_strict};
use switchyard_infra::llm::build_registry;
use switchyard_infra::sqlite::budget::SqliteBudgetStore;
use switchyard_infra::sqlite::completion::SqliteCompletionStore;
use switchyard_infra::sqlite::pool::{DatabasePool, database_url};
use switchyard_types::config::GatewayConfig;

pub type ConcreteGateway = Gateway<SqliteBudgetStore, SqliteCompletionStore>;

pub struct AppState {
    pub gateway: ConcreteGateway,
    pub completions: Arc<SqliteCompletionStore>,
    pub config: GatewayConfig,
    pub data_dir: PathBuf,
}

impl AppState {
    /// Load config, open the database and build the gateway.
    ///
    /// An explicit `config_path` is loaded strictly; otherwise
    /// `{data_dir}/gateway.toml` is optional and falls back to defaults.
    pub async fn init(data_dir: PathBuf, config_path: Option<&Path>) -> anyhow::Result<Self> {
        tokio::fs::create_dir_all(&data_dir)
            .await
            .with_context(|| format!("failed to create data directory {}", data_dir.display()))?;

        let config = match config_path {
            Some(path) => load_gateway_config_strict(path).await?,
            None => load_gateway_config(&data_dir).await,
        };

        let db_pool = DatabasePool::new(&database_url(&data_dir))
            .await
            .context("failed to open the gateway database")?;

        let registry = build_registry(&config)?;
        let completions = Arc::new(SqliteCompletionStore::new(db_pool.clone()));
        let attempts = AttemptSinks::new().with(Arc::new(TracingAttemptSink));

        let gateway = Gateway::from_config(
            &config,
            registry,
            SqliteBudgetStore::new(db_pool),
            Arc::clone(&completions),
            Arc::new(attempts),
        );

        tracing::debug!(
            data_dir = %data_dir.display(),
            providers = gateway.registry().len(),
            "Gateway initialized"
        );

        Ok(Self {
            gateway,
            completions,
            config,
            data_dir,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use switchyard_types::llm::CompletionRequest;

    #[tokio::test]
    async fn init_with_defaults_serves_and_records_completions() {
        let dir = tempfile::tempdir().unwrap();
        let state = AppState::init(dir.path().join("data"), None).await.unwrap();
        assert_eq!(state.gateway.registry().len(), 2);

        let result = state
            .gateway
            .complete(CompletionRequest::new("alice", "sim-1", "hi", 64))
            .await
            .unwrap();
        assert_eq!(result.content, "You said: hi");

        let history = state.completions.recent("alice", 5).await.unwrap();
        assert_eq!(history.len(), 1);
        assert!(state.data_dir.join("switchyard.db").exists());
    }

    #[tokio::test]
    async fn explicit_config_errors_are_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("broken.toml");
        tokio::fs::write(&config_path, "[budget\n").await.unwrap();

        let result = AppState::init(dir.path().join("data"), Some(&config_path)).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn missing_explicit_config_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = AppState::init(dir.path().to_path_buf(), Some(&dir.path().join("nope.toml"))).await;
        assert!(result.is_err());
    }
}
