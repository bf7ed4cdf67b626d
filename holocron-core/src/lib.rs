pub mod config;
pub mod resolver;
pub mod vocabulary;

// Config re-exports
pub use config::{
    Config, ConfigError, ConfigResult, ExtractionSettings, LlmSettings, LoggingSettings,
    OPENAI_COMPATIBLE, RetrievalSettings, Secrets, SecretsError, Settings, SettingsError,
    StorageSettings, load_dotenv,
};

// Resolver re-exports
pub use resolver::{
    AliasError, AliasResult, AliasTable, SessionCache, merge_properties, remember, resolve,
    slugify, title_case_id,
};

// Vocabulary re-exports
pub use vocabulary::{EntityType, Predicate, PredicateGroup, Vocabulary};
