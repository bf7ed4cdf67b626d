//! Settings configuration loaded from TOML files.
//!
//! Non-sensitive configuration lives in `~/.config/holocron/config.toml`
//! (or `$HOLOCRON_CONFIG_DIR/config.toml`). Every field has a serde default,
//! so a partial file is always valid.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Default TOML configuration file content
const DEFAULT_CONFIG_TOML: &str = r#"# holocron configuration file
# Located at: ~/.config/holocron/config.toml
#
# This file contains non-sensitive configuration.
# The LLM API key is read from the environment variable named by
# `llm.api_key_env` (HOLOCRON_LLM_API_KEY unless changed below).

[llm]
provider = "openai_compatible"
base_url = "https://api.openai.com/v1"
model = "gpt-4o-mini"
api_key_env = "HOLOCRON_LLM_API_KEY"
timeout_seconds = 120
max_retries = 3
temperature = 0.2

[extraction]
era = "rebellion"
chunks_per_call = 3
seconds_per_call = 12.0
stub_confidence = 0.3

[storage]
# graph_db_path = "/path/to/graph.sqlite3"   # defaults to <data dir>/holocron/graph.sqlite3
# chunk_db_path = "/path/to/chunks.sqlite3"
chunk_table = "chunks"
# alias_table_path = "/path/to/aliases.json"

[retrieval]
max_characters = 6
max_relationships = 8
max_events = 5
token_budget = 1200

[logging]
level = "info"
"#;

/// Settings loaded from TOML configuration file.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Settings {
    /// LLM endpoint used by extraction and synthesis
    #[serde(default)]
    pub llm: LlmSettings,

    /// Extraction run tuning
    #[serde(default)]
    pub extraction: ExtractionSettings,

    /// Database and input file locations
    #[serde(default)]
    pub storage: StorageSettings,

    /// Read-path limits
    #[serde(default)]
    pub retrieval: RetrievalSettings,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingSettings,
}

/// The one built-in LLM provider.
pub const OPENAI_COMPATIBLE: &str = "openai_compatible";

/// LLM provider settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LlmSettings {
    /// Provider name (only [`OPENAI_COMPATIBLE`] is built in)
    #[serde(default = "default_llm_provider")]
    pub provider: String,

    /// Base URL of the chat completions API, without `/chat/completions`
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,

    /// Model identifier
    #[serde(default = "default_llm_model")]
    pub model: String,

    /// Env var holding the API key
    #[serde(default = "default_llm_api_key_env")]
    pub api_key_env: String,

    /// Per-call timeout
    #[serde(default = "default_llm_timeout_seconds")]
    pub timeout_seconds: u64,

    /// Correction attempts after the first call before falling back
    #[serde(default = "default_llm_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_llm_temperature")]
    pub temperature: f32,
}

/// Extraction settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExtractionSettings {
    /// Era tag applied to every extracted row
    #[serde(default = "default_era")]
    pub era: String,

    /// Chunks sent per LLM call
    #[serde(default = "default_chunks_per_call")]
    pub chunks_per_call: usize,

    /// Average latency used by the workload estimate
    #[serde(default = "default_seconds_per_call")]
    pub seconds_per_call: f64,

    /// Confidence assigned to auto-created stub entities
    #[serde(default = "default_stub_confidence")]
    pub stub_confidence: f64,
}

/// Storage locations
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageSettings {
    /// Graph database file (defaults under the data root)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub graph_db_path: Option<PathBuf>,

    /// Chunk store database file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_db_path: Option<PathBuf>,

    /// Table holding source chunks
    #[serde(default = "default_chunk_table")]
    pub chunk_table: String,

    /// JSON or TOML alias table
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias_table_path: Option<PathBuf>,
}

/// Retrieval limits
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetrievalSettings {
    #[serde(default = "default_max_characters")]
    pub max_characters: usize,

    #[serde(default = "default_max_relationships")]
    pub max_relationships: usize,

    #[serde(default = "default_max_events")]
    pub max_events: usize,

    /// Token budget for composed context blocks
    #[serde(default = "default_token_budget")]
    pub token_budget: usize,
}

/// Logging settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingSettings {
    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_llm_provider() -> String {
    OPENAI_COMPATIBLE.to_string()
}

fn default_llm_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_llm_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_llm_api_key_env() -> String {
    "HOLOCRON_LLM_API_KEY".to_string()
}

fn default_llm_timeout_seconds() -> u64 {
    120
}

fn default_llm_max_retries() -> u32 {
    3
}

fn default_llm_temperature() -> f32 {
    0.2
}

fn default_era() -> String {
    "rebellion".to_string()
}

fn default_chunks_per_call() -> usize {
    3
}

fn default_seconds_per_call() -> f64 {
    12.0
}

fn default_stub_confidence() -> f64 {
    0.3
}

fn default_chunk_table() -> String {
    "chunks".to_string()
}

fn default_max_characters() -> usize {
    6
}

fn default_max_relationships() -> usize {
    8
}

fn default_max_events() -> usize {
    5
}

fn default_token_budget() -> usize {
    1200
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            provider: default_llm_provider(),
            base_url: default_llm_base_url(),
            model: default_llm_model(),
            api_key_env: default_llm_api_key_env(),
            timeout_seconds: default_llm_timeout_seconds(),
            max_retries: default_llm_max_retries(),
            temperature: default_llm_temperature(),
        }
    }
}

impl Default for ExtractionSettings {
    fn default() -> Self {
        Self {
            era: default_era(),
            chunks_per_call: default_chunks_per_call(),
            seconds_per_call: default_seconds_per_call(),
            stub_confidence: default_stub_confidence(),
        }
    }
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            graph_db_path: None,
            chunk_db_path: None,
            chunk_table: default_chunk_table(),
            alias_table_path: None,
        }
    }
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self {
            max_characters: default_max_characters(),
            max_relationships: default_max_relationships(),
            max_events: default_max_events(),
            token_budget: default_token_budget(),
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Errors that can occur when loading settings
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Config directory not found")]
    ConfigDirNotFound,
}

impl Settings {
    /// Load settings from the TOML configuration file.
    ///
    /// If the config file doesn't exist, creates it with default values.
    pub fn load() -> Result<Self, SettingsError> {
        let config_path = Self::config_path()?;
        Self::load_from_path(&config_path)
    }

    /// Load settings from a specific path, creating the default file if absent.
    pub fn load_from_path(config_path: &Path) -> Result<Self, SettingsError> {
        if !config_path.exists() {
            tracing::info!("Creating default configuration at {:?}", config_path);
            Self::create_default_config(config_path)?;
        }

        let content = fs::read_to_string(config_path)?;
        Self::from_toml(&content)
    }

    /// Parse settings from TOML content.
    pub fn from_toml(content: &str) -> Result<Self, SettingsError> {
        let settings: Self = toml::from_str(content)?;
        Ok(settings)
    }

    /// Get the configuration file path.
    ///
    /// Uses XDG config directory: `~/.config/holocron/config.toml`
    pub fn config_path() -> Result<PathBuf, SettingsError> {
        if let Ok(override_dir) = std::env::var("HOLOCRON_CONFIG_DIR") {
            let dir = PathBuf::from(override_dir);
            return Ok(dir.join("config.toml"));
        }

        let config_dir = dirs::config_dir()
            .ok_or(SettingsError::ConfigDirNotFound)?
            .join("holocron");

        Ok(config_dir.join("config.toml"))
    }

    fn create_default_config(path: &Path) -> Result<(), SettingsError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        fs::write(path, DEFAULT_CONFIG_TOML)?;

        Ok(())
    }
}
