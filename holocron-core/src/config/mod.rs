//! Configuration management for holocron.
//!
//! Secrets come from environment variables, settings from a TOML file.
//!
//! # Configuration Sources
//!
//! ## Secrets (Environment Variables)
//! - `HOLOCRON_LLM_API_KEY` - LLM API key (the variable name is configurable
//!   through `llm.api_key_env`)
//!
//! ## Settings (TOML File)
//! Located at `~/.config/holocron/config.toml`:
//! ```toml
//! [llm]
//! base_url = "https://api.openai.com/v1"
//! model = "gpt-4o-mini"
//!
//! [extraction]
//! era = "rebellion"
//!
//! [storage]
//! chunk_db_path = "/data/chunks.sqlite3"
//!
//! [logging]
//! level = "info"
//! ```
//!
//! ## Paths
//! - `HOLOCRON_CONFIG_DIR` overrides the settings directory
//! - `HOLOCRON_DATA_DIR` overrides the data root holding `graph.sqlite3`

mod paths;
mod secrets;
mod settings;

use std::path::PathBuf;

pub use paths::{GRAPH_DB_FILE, data_root, graph_db_path};
pub use secrets::{Secrets, SecretsError};
pub use settings::{
    ExtractionSettings, LlmSettings, LoggingSettings, OPENAI_COMPATIBLE, RetrievalSettings,
    Settings, SettingsError, StorageSettings,
};

/// Combined configuration containing both secrets and settings.
#[derive(Debug, Clone)]
pub struct Config {
    /// Secrets loaded from environment variables
    pub secrets: Secrets,
    /// Settings loaded from TOML configuration file
    pub settings: Settings,
}

/// Errors that can occur when loading configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Secrets error: {0}")]
    Secrets(#[from] SecretsError),

    #[error("Settings error: {0}")]
    Settings(#[from] SettingsError),

    #[error("Unsupported LLM provider '{0}'")]
    UnsupportedProvider(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

impl Config {
    /// Load configuration from all sources.
    ///
    /// Settings are read (and created with defaults if needed) first, since
    /// they name the env var holding the API key. A missing key is not an
    /// error here; callers that need an LLM use [`Config::llm_api_key`].
    pub fn load() -> ConfigResult<Self> {
        let settings = Settings::load()?;
        Self::from_settings(settings)
    }

    pub fn from_settings(settings: Settings) -> ConfigResult<Self> {
        if settings.llm.provider != OPENAI_COMPATIBLE {
            return Err(ConfigError::UnsupportedProvider(settings.llm.provider));
        }
        let secrets = Secrets::from_env(&settings.llm.api_key_env);
        Ok(Self { secrets, settings })
    }

    /// Get the LLM API key, failing with the variable name when unset.
    pub fn llm_api_key(&self) -> ConfigResult<&str> {
        Ok(self
            .secrets
            .require_llm_api_key(&self.settings.llm.api_key_env)?)
    }

    /// Check if an LLM is usable.
    pub fn has_llm(&self) -> bool {
        self.secrets.llm_api_key.is_some()
    }

    /// Era applied to extraction and retrieval.
    pub fn era(&self) -> &str {
        &self.settings.extraction.era
    }

    /// Resolved graph database path.
    pub fn graph_db_path(&self) -> ConfigResult<PathBuf> {
        Ok(graph_db_path(&self.settings.storage)?)
    }
}

/// Load .env file if it exists (for development convenience).
pub fn load_dotenv() {
    let _ = dotenvy::dotenv();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsupported_provider_rejected() {
        let mut settings = Settings::default();
        settings.llm.provider = "carrier_pigeon".to_string();
        assert!(matches!(
            Config::from_settings(settings),
            Err(ConfigError::UnsupportedProvider(name)) if name == "carrier_pigeon"
        ));
        assert!(Config::from_settings(Settings::default()).is_ok());
    }

    #[test]
    fn test_missing_key_reports_env_name() {
        let mut settings = Settings::default();
        settings.llm.api_key_env = "HOLOCRON_CONFIG_TEST_UNSET_KEY".to_string();
        let config = Config::from_settings(settings).unwrap();

        assert!(!config.has_llm());
        let err = config.llm_api_key().unwrap_err();
        assert!(err.to_string().contains("HOLOCRON_CONFIG_TEST_UNSET_KEY"));
    }

    #[test]
    fn test_era_accessor() {
        let mut settings = Settings::default();
        settings.extraction.era = "legacy".to_string();
        let config = Config {
            secrets: Secrets::default(),
            settings,
        };
        assert_eq!(config.era(), "legacy");
    }
}
