use std::path::Path;

use contracts::EngineConfig;
use thiserror::Error;
use tracing::info;

pub const CONFIG_PATH_ENV: &str = "LEDGER_CONFIG";
pub const SQLITE_PATH_ENV: &str = "LEDGER_SQLITE_PATH";
const DEFAULT_SQLITE_PATH: &str = "ledger.sqlite";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: String,
        source: serde_json::Error,
    },
}

/// Reads `EngineConfig` from the JSON file named by `LEDGER_CONFIG`, or the
/// defaults when unset. `LEDGER_SQLITE_PATH` overrides the database path.
pub fn load_engine_config() -> Result<EngineConfig, ConfigError> {
    let mut config = match env_value(CONFIG_PATH_ENV) {
        Some(path) => load_config_file(&path)?,
        None => EngineConfig::default(),
    };
    if let Some(path) = env_value(SQLITE_PATH_ENV) {
        config.sqlite_path = Some(path);
    }
    Ok(config)
}

pub fn load_config_file(path: impl AsRef<Path>) -> Result<EngineConfig, ConfigError> {
    let path = path.as_ref();
    let label = path.display().to_string();
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: label.clone(),
        source,
    })?;
    let config = serde_json::from_str::<EngineConfig>(&raw).map_err(|source| {
        ConfigError::Parse {
            path: label.clone(),
            source,
        }
    })?;
    info!(path = %label, policy = ?config.commission_policy, "engine config loaded");
    Ok(config)
}

pub fn sqlite_path(config: &EngineConfig) -> String {
    config
        .sqlite_path
        .clone()
        .filter(|path| !path.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_SQLITE_PATH.to_string())
}

fn env_value(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .filter(|value| !value.trim().is_empty())
}
