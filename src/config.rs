//! Runtime configuration.
//!
//! Defaults cover everything; a YAML file named by `BLOOD_BANK_CONFIG` may
//! override any subset of fields.
use super::policy::Policy;
use serde::Deserialize;
use std::path::PathBuf;

/// ENV pointing at a YAML configuration file
const CONFIG_PATH_ENV: &str = "BLOOD_BANK_CONFIG";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Directory of the sled database.
    pub db_path: PathBuf,
    /// Lifetime of a bearer session issued at login.
    pub session_ttl_minutes: i64,
    /// Include internal error detail in API responses. Off in production.
    pub expose_error_detail: bool,
    pub policy: Policy,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("blood_bank.db"),
            session_ttl_minutes: 60,
            expose_error_detail: false,
            policy: Policy::default(),
        }
    }
}

impl AppConfig {
    pub fn from_yaml(yaml: &str) -> anyhow::Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Load config from the YAML file named by the env var, or use defaults.
    pub fn load_from_env_and_defaults() -> anyhow::Result<Self> {
        let Ok(config_path) = std::env::var(CONFIG_PATH_ENV) else {
            return Ok(Self::default());
        };
        tracing::info!("Loading blood bank config from: {}", config_path);
        let yaml = std::fs::read_to_string(&config_path)
            .map_err(|e| anyhow::anyhow!("Failed to read config file {}: {}", config_path, e))?;
        Self::from_yaml(&yaml)
    }
}
