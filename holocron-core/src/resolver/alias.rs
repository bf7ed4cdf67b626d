use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use tracing::warn;

#[derive(Debug, thiserror::Error)]
pub enum AliasError {
    #[error("IO error reading alias table: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid JSON alias table: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid TOML alias table: {0}")]
    Toml(#[from] toml::de::Error),
}

pub type AliasResult<T> = Result<T, AliasError>;

/// Externally authored `canonical_id → [aliases]` lookup, keyed by lowercase
/// alias.
#[derive(Debug, Clone, Default)]
pub struct AliasTable {
    by_alias: HashMap<String, String>,
}

impl AliasTable {
    /// Build the lookup from a canonical map.
    ///
    /// The canonical id and its space-substituted form are registered as
    /// aliases of themselves. When two ids claim the same alias the first one
    /// (in id order) keeps it.
    pub fn from_canonical_map(map: BTreeMap<String, Vec<String>>) -> Self {
        let mut by_alias = HashMap::new();
        for (canonical, aliases) in &map {
            let canonical = canonical.trim();
            if canonical.is_empty() {
                continue;
            }
            let implicit = [canonical.to_string(), canonical.replace('_', " ")];
            for alias in implicit.iter().chain(aliases.iter()) {
                let key = alias.trim().to_lowercase();
                if key.is_empty() {
                    continue;
                }
                match by_alias.get(&key) {
                    Some(existing) if existing != canonical => {
                        warn!(
                            alias = %key,
                            kept = %existing,
                            ignored = %canonical,
                            "alias claimed by more than one entity"
                        );
                    }
                    Some(_) => {}
                    None => {
                        by_alias.insert(key, canonical.to_string());
                    }
                }
            }
        }
        Self { by_alias }
    }

    /// Load a JSON or TOML alias file (chosen by extension, JSON otherwise).
    ///
    /// A missing file yields an empty table; a malformed one is an error.
    pub fn load(path: &Path) -> AliasResult<Self> {
        if !path.exists() {
            warn!(path = %path.display(), "alias table not found, continuing without aliases");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let is_toml = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
        let map: BTreeMap<String, Vec<String>> = if is_toml {
            toml::from_str(&content)?
        } else {
            serde_json::from_str(&content)?
        };
        Ok(Self::from_canonical_map(map))
    }

    /// Canonical id for an already lowercased, trimmed alias.
    pub fn lookup(&self, alias_lower: &str) -> Option<&str> {
        self.by_alias.get(alias_lower).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.by_alias.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_alias.is_empty()
    }
}
