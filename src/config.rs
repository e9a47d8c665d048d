use crate::engine::SettlementScope;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_path: String,
    pub max_connections: u32,
    pub settlement_scope: SettlementScope,
    pub merge_timeout_ms: u64,
    pub merge_max_attempts: u32,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnv(String),
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_map(std::env::vars().collect())
    }

    pub fn from_env_map(env_map: HashMap<String, String>) -> Result<Self, ConfigError> {
        let database_path = env_map
            .get("DATABASE_PATH")
            .cloned()
            .ok_or_else(|| ConfigError::MissingEnv("DATABASE_PATH".to_string()))?;

        let max_connections = env_map
            .get("DB_MAX_CONNECTIONS")
            .map(|s| s.as_str())
            .unwrap_or("5")
            .parse::<u32>()
            .ok()
            .filter(|n| *n > 0)
            .ok_or_else(|| {
                ConfigError::InvalidValue(
                    "DB_MAX_CONNECTIONS".to_string(),
                    "must be a positive integer".to_string(),
                )
            })?;

        let settlement_scope = match env_map
            .get("SETTLEMENT_SCOPE")
            .map(|s| s.as_str())
            .unwrap_or("pending")
        {
            "pending" => SettlementScope::Pending,
            "pending_and_completed" => SettlementScope::PendingAndCompleted,
            other => {
                return Err(ConfigError::InvalidValue(
                    "SETTLEMENT_SCOPE".to_string(),
                    format!("must be pending or pending_and_completed, got {}", other),
                ))
            }
        };

        let merge_timeout_ms = env_map
            .get("MERGE_TIMEOUT_MS")
            .map(|s| s.as_str())
            .unwrap_or("5000")
            .parse::<u64>()
            .ok()
            .filter(|n| *n > 0)
            .ok_or_else(|| {
                ConfigError::InvalidValue(
                    "MERGE_TIMEOUT_MS".to_string(),
                    "must be a positive integer".to_string(),
                )
            })?;

        let merge_max_attempts = env_map
            .get("MERGE_MAX_ATTEMPTS")
            .map(|s| s.as_str())
            .unwrap_or("3")
            .parse::<u32>()
            .ok()
            .filter(|n| *n > 0)
            .ok_or_else(|| {
                ConfigError::InvalidValue(
                    "MERGE_MAX_ATTEMPTS".to_string(),
                    "must be a positive integer".to_string(),
                )
            })?;

        Ok(Config {
            database_path,
            max_connections,
            settlement_scope,
            merge_timeout_ms,
            merge_max_attempts,
        })
    }
}
