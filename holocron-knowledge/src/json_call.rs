//! JSON-reliability wrapper around [`LlmClient`].
//!
//! One logical call may take several attempts:
//!
//! 1. `Plain`: the caller's prompt.
//! 2. `Repair`: after unparsable output, the prompt plus a strict
//!    JSON-only reminder.
//! 3. `Correction`: after a second parse failure or a schema mismatch, the
//!    previous reply and the error are quoted back to the model.
//!
//! Transport failures (timeouts, HTTP errors) repeat the current prompt.
//! When attempts run out the caller's fallback value is returned; the error
//! never escapes.

use std::sync::LazyLock;
use std::time::Duration;

use holocron_core::LlmSettings;
use regex::Regex;
use serde_json::Value;
use tracing::{debug, warn};

use crate::llm::{LlmClient, LlmError};

static FENCE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```(?:json|JSON)?\s*(.*?)```").expect("fence regex"));

const REPAIR_SUFFIX: &str = "\n\nIMPORTANT: your previous reply could not be parsed. \
Respond with exactly one valid JSON object and nothing else: no markdown fences, \
no commentary.";

const PREVIEW_CHARS: usize = 600;

/// Retry/timeout bounds for one logical call.
#[derive(Debug, Clone, Copy)]
pub struct JsonCallPolicy {
    /// Attempts after the first one
    pub max_retries: u32,
    /// Per-attempt timeout
    pub timeout: Duration,
}

impl Default for JsonCallPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            timeout: Duration::from_secs(120),
        }
    }
}

impl From<&LlmSettings> for JsonCallPolicy {
    fn from(settings: &LlmSettings) -> Self {
        Self {
            max_retries: settings.max_retries,
            timeout: Duration::from_secs(settings.timeout_seconds),
        }
    }
}

/// Result of a logical call.
#[derive(Debug, Clone)]
pub struct JsonOutcome {
    pub value: Value,
    pub attempts: u32,
    pub fell_back: bool,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Prompt {
    Plain,
    Repair,
    Correction { previous: String, error: String },
}

#[derive(Debug)]
enum Failure {
    Transport(String),
    Unparsable { raw: String, error: String },
    Invalid { raw: String, error: String },
}

impl Failure {
    fn describe(&self) -> String {
        match self {
            Failure::Transport(error) => format!("transport: {error}"),
            Failure::Unparsable { error, .. } => format!("unparsable JSON: {error}"),
            Failure::Invalid { error, .. } => format!("schema mismatch: {error}"),
        }
    }
}

impl Prompt {
    fn next(self, failure: &Failure) -> Prompt {
        match failure {
            Failure::Transport(_) => self,
            Failure::Unparsable { raw, error } => match self {
                Prompt::Plain => Prompt::Repair,
                _ => Prompt::Correction {
                    previous: preview(raw),
                    error: error.clone(),
                },
            },
            Failure::Invalid { raw, error } => Prompt::Correction {
                previous: preview(raw),
                error: error.clone(),
            },
        }
    }

    fn render(&self, user: &str) -> String {
        match self {
            Prompt::Plain => user.to_string(),
            Prompt::Repair => format!("{user}{REPAIR_SUFFIX}"),
            Prompt::Correction { previous, error } => format!(
                "{user}\n\nYour previous reply was rejected.\nError: {error}\n\
                 Previous reply:\n{previous}\n\n\
                 Return a corrected reply as exactly one JSON object matching the schema above."
            ),
        }
    }
}

fn preview(raw: &str) -> String {
    raw.chars().take(PREVIEW_CHARS).collect()
}

/// Run one logical JSON call.
///
/// `validate` checks the parsed value's structure; `fallback` is returned
/// unchanged once every attempt has failed.
pub async fn call_json<F>(
    client: &dyn LlmClient,
    system: &str,
    user: &str,
    policy: JsonCallPolicy,
    validate: F,
    fallback: Value,
) -> JsonOutcome
where
    F: Fn(&Value) -> Result<(), String>,
{
    let total_attempts = policy.max_retries.saturating_add(1);
    let mut prompt = Prompt::Plain;
    let mut warnings = Vec::new();

    for attempt in 1..=total_attempts {
        let rendered = prompt.render(user);
        let reply = match tokio::time::timeout(
            policy.timeout,
            client.complete(system, &rendered, true),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(LlmError::Timeout(policy.timeout)),
        };

        let failure = match reply {
            Err(error) => Failure::Transport(error.to_string()),
            Ok(raw) => match extract_json(&raw) {
                Err(error) => Failure::Unparsable { raw, error },
                Ok(value) => match validate(&value) {
                    Ok(()) => {
                        debug!(client = client.name(), attempt, "json call succeeded");
                        return JsonOutcome {
                            value,
                            attempts: attempt,
                            fell_back: false,
                            warnings,
                        };
                    }
                    Err(error) => Failure::Invalid { raw, error },
                },
            },
        };

        let message = failure.describe();
        warn!(client = client.name(), attempt, error = %message, "json call attempt failed");
        warnings.push(format!("attempt {attempt}: {message}"));
        prompt = prompt.next(&failure);
    }

    warn!(
        client = client.name(),
        attempts = total_attempts,
        "json call exhausted retries, using fallback"
    );
    warnings.push(format!(
        "fell back after {total_attempts} failed attempts"
    ));
    JsonOutcome {
        value: fallback,
        attempts: total_attempts,
        fell_back: true,
        warnings,
    }
}

/// Parse JSON out of a reply that may wrap it in fences or prose.
pub fn extract_json(raw: &str) -> Result<Value, String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err("empty reply".to_string());
    }

    let first_error = match serde_json::from_str::<Value>(trimmed) {
        Ok(value) => return Ok(value),
        Err(error) => error.to_string(),
    };

    for captures in FENCE_RE.captures_iter(trimmed) {
        if let Some(body) = captures.get(1)
            && let Ok(value) = serde_json::from_str::<Value>(body.as_str().trim())
        {
            return Ok(value);
        }
    }

    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}'))
        && start < end
        && let Ok(value) = serde_json::from_str::<Value>(&trimmed[start..=end])
    {
        return Ok(value);
    }

    Err(first_error)
}
