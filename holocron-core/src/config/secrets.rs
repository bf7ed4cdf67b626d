//! Secrets configuration loaded from environment variables only.
//!
//! The LLM API key should never be stored in files. It is read from the
//! environment variable named by `llm.api_key_env`.

use std::env;

/// Secrets loaded exclusively from environment variables.
#[derive(Clone, Default)]
pub struct Secrets {
    /// LLM API key (env: value of `llm.api_key_env`)
    pub llm_api_key: Option<String>,
}

impl std::fmt::Debug for Secrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Secrets")
            .field("llm_api_key", &self.llm_api_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Errors that can occur when loading secrets
#[derive(Debug, thiserror::Error)]
pub enum SecretsError {
    #[error("Missing required secret: {0}")]
    MissingSecret(String),
}

impl Secrets {
    /// Load secrets from environment variables.
    ///
    /// Also loads a `.env` file if present (development convenience).
    pub fn from_env(api_key_env: &str) -> Self {
        let _ = dotenvy::dotenv();

        Self::from_env_inner(api_key_env)
    }

    /// Load from environment without touching `.env`.
    pub(crate) fn from_env_inner(api_key_env: &str) -> Self {
        let llm_api_key = env::var(api_key_env)
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty());
        Self { llm_api_key }
    }

    /// The API key, or an error naming the variable that should hold it.
    pub fn require_llm_api_key(&self, api_key_env: &str) -> Result<&str, SecretsError> {
        self.llm_api_key
            .as_deref()
            .ok_or_else(|| SecretsError::MissingSecret(api_key_env.to_string()))
    }
}
