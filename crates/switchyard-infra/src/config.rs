//! Gateway configuration loader.
//!
//! Reads `gateway.toml` from the data directory (`~/.switchyard/` in
//! production) and deserializes it into [`GatewayConfig`]. The lenient
//! loader falls back to defaults when the file is missing or malformed; the
//! strict loader is for paths the operator named explicitly.

use std::path::{Path, PathBuf};

use switchyard_types::config::{GatewayConfig, MAX_BUDGET_WINDOW_SECS};

pub const CONFIG_FILE: &str = "gateway.toml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Resolve the data directory.
///
/// Priority:
/// 1. `SWITCHYARD_DATA_DIR` environment variable
/// 2. `~/.switchyard`
pub fn resolve_data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("SWITCHYARD_DATA_DIR") {
        return PathBuf::from(dir);
    }

    if let Some(home) = dirs::home_dir() {
        return home.join(".switchyard");
    }

    PathBuf::from(".switchyard")
}

/// Load configuration from `{data_dir}/gateway.toml`.
///
/// - Missing file: defaults (two simulated providers, stock tiers).
/// - Unreadable or malformed file: a warning, then defaults.
pub async fn load_gateway_config(data_dir: &Path) -> GatewayConfig {
    let config_path = data_dir.join(CONFIG_FILE);

    let content = match tokio::fs::read_to_string(&config_path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No {CONFIG_FILE} found at {}, using defaults", config_path.display());
            return GatewayConfig::default();
        }
        Err(err) => {
            tracing::warn!("Failed to read {}: {err}, using defaults", config_path.display());
            return GatewayConfig::default();
        }
    };

    match parse(&content, &config_path) {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!("{err}, using defaults");
            GatewayConfig::default()
        }
    }
}

/// Load configuration from an explicit path. Every failure is an error.
pub async fn load_gateway_config_strict(path: &Path) -> Result<GatewayConfig, ConfigError> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
    parse(&content, path)
}

fn parse(content: &str, path: &Path) -> Result<GatewayConfig, ConfigError> {
    let config: GatewayConfig = toml::from_str(content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    validate(&config)?;
    Ok(config)
}

/// Checks serde cannot express: unique provider names and sane limits.
fn validate(config: &GatewayConfig) -> Result<(), ConfigError> {
    let mut seen = std::collections::HashSet::new();
    for provider in &config.providers {
        if !seen.insert(provider.name.as_str()) {
            return Err(ConfigError::Invalid(format!(
                "provider '{}' is defined twice",
                provider.name
            )));
        }
        if provider.timeout_ms == 0 {
            return Err(ConfigError::Invalid(format!(
                "provider '{}' has a zero timeout",
                provider.name
            )));
        }
        if provider.script.chunk_chars == 0 {
            return Err(ConfigError::Invalid(format!(
                "provider '{}' has a zero chunk size",
                provider.name
            )));
        }
    }
    if config.budget.window_secs == 0 {
        return Err(ConfigError::Invalid("budget window must be positive".to_string()));
    }
    if config.budget.window_secs > MAX_BUDGET_WINDOW_SECS {
        return Err(ConfigError::Invalid(format!(
            "budget window of {}s exceeds the maximum of {MAX_BUDGET_WINDOW_SECS}s",
            config.budget.window_secs
        )));
    }
    Ok(())
}
