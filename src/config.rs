//! # Configuration Management Module
//!
//! ## Purpose
//! Centralized configuration for the rulebook search core, supporting TOML
//! files and environment-variable overrides with validation and type-safe
//! access to all settings.
//!
//! ## Input/Output Specification
//! - **Input**: Configuration files (TOML), environment variables
//! - **Output**: Validated configuration structs with defaults and overrides
//! - **Validation**: Type checking, range validation, dependency verification
//!
//! ## Configuration Sources (in order of precedence)
//! 1. Environment variables (highest priority)
//! 2. Configuration files
//! 3. Default values (lowest priority)
//!
//! Season and jurisdiction are request context, not configuration: they are
//! threaded explicitly through every call so retrieval and resolution stay
//! pure and testable.
//!
//! ## Usage
//! ```rust,no_run
//! use rulebook_search::config::Config;
//!
//! let config = Config::from_file("config.toml").unwrap();
//! println!("Index endpoint: {}", config.search_index.base_url);
//! ```

use crate::errors::{Result, RulebookError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main configuration structure containing all system settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Chunking behavior
    pub chunker: ChunkerConfig,
    /// External search index client settings
    pub search_index: SearchIndexConfig,
    /// External completion service client settings
    pub completion: CompletionConfig,
    /// Answer pipeline behavior
    pub answer: AnswerConfig,
    /// Local persistence settings
    pub storage: StorageConfig,
    /// Logging settings
    pub logging: LoggingConfig,
}

/// Chunking configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkerConfig {
    /// Minimum chunk size in characters; shorter sections are discarded
    pub min_chunk_size: usize,
    /// Target size for sub-chunks when splitting an oversize section
    pub target_chunk_size: usize,
    /// Hard cap on chunk size in characters
    pub max_chunk_size: usize,
}

/// External search index client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchIndexConfig {
    /// Index service base URL
    pub base_url: String,
    /// Index name to upsert into and query against
    pub index_name: String,
    /// API key for the index service (optional)
    pub api_key: Option<String>,
    /// Request timeout in seconds
    pub timeout_seconds: u64,
}

/// External completion service client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionConfig {
    /// Completion service base URL
    pub base_url: String,
    /// Model identifier to request
    pub model: String,
    /// API key for the completion service (optional)
    pub api_key: Option<String>,
    /// Request timeout in seconds; on timeout the answerer falls back to the
    /// deterministic template
    pub timeout_seconds: u64,
    /// Maximum completion tokens to request
    pub max_tokens: u32,
    /// Sampling temperature
    pub temperature: f32,
}

/// Answer pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerConfig {
    /// Minimum relevance score for a retrieved hit to be considered evidence
    pub min_relevance_score: f32,
    /// Candidate over-fetch factor: retrieve `multiplier * max_context` hits
    /// so precedence grouping has enough material
    pub retrieval_multiplier: usize,
    /// Default number of context chunks when the caller does not specify one
    pub default_max_context: usize,
    /// Maximum excerpt length (characters) in fallback answers and citations
    pub excerpt_chars: usize,
}

/// Local persistence configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Database file path
    pub db_path: PathBuf,
    /// Gzip-compress persisted chunk blobs
    pub enable_compression: bool,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Enable structured JSON logging
    pub json_format: bool,
}

impl Config {
    /// Load configuration from the default location
    pub fn load() -> Result<Self> {
        Self::from_file("config.toml")
    }

    /// Load configuration from a specific file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            tracing::warn!("Configuration file not found: {:?}, using defaults", path);
            let mut config = Self::default();
            config.apply_env_overrides()?;
            config.validate()?;
            return Ok(config);
        }

        let content = std::fs::read_to_string(path).map_err(|e| RulebookError::Config {
            message: format!("Failed to read config file {:?}: {}", path, e),
        })?;

        let mut config: Config = toml::from_str(&content).map_err(|e| RulebookError::Config {
            message: format!("Failed to parse config file {:?}: {}", path, e),
        })?;

        config.apply_env_overrides()?;
        config.validate()?;

        Ok(config)
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(url) = std::env::var("RULEBOOK_SEARCH_INDEX_URL") {
            self.search_index.base_url = url;
        }
        if let Ok(key) = std::env::var("RULEBOOK_SEARCH_INDEX_API_KEY") {
            self.search_index.api_key = Some(key);
        }
        if let Ok(url) = std::env::var("RULEBOOK_COMPLETION_URL") {
            self.completion.base_url = url;
        }
        if let Ok(key) = std::env::var("RULEBOOK_COMPLETION_API_KEY") {
            self.completion.api_key = Some(key);
        }
        if let Ok(db_path) = std::env::var("RULEBOOK_DB_PATH") {
            self.storage.db_path = PathBuf::from(db_path);
        }
        if let Ok(level) = std::env::var("RULEBOOK_LOG_LEVEL") {
            self.logging.level = level;
        }
        Ok(())
    }

    /// Validate configuration values
    fn validate(&self) -> Result<()> {
        if self.chunker.min_chunk_size == 0 {
            return Err(RulebookError::ValidationFailed {
                field: "chunker.min_chunk_size".to_string(),
                reason: "Minimum chunk size must be greater than zero".to_string(),
            });
        }

        if self.chunker.target_chunk_size > self.chunker.max_chunk_size {
            return Err(RulebookError::ValidationFailed {
                field: "chunker.target_chunk_size".to_string(),
                reason: "Target chunk size cannot exceed the hard cap".to_string(),
            });
        }

        if self.chunker.min_chunk_size >= self.chunker.target_chunk_size {
            return Err(RulebookError::ValidationFailed {
                field: "chunker.min_chunk_size".to_string(),
                reason: "Minimum chunk size must be below the target size".to_string(),
            });
        }

        if self.answer.retrieval_multiplier == 0 {
            return Err(RulebookError::ValidationFailed {
                field: "answer.retrieval_multiplier".to_string(),
                reason: "Retrieval multiplier must be at least 1".to_string(),
            });
        }

        if self.answer.default_max_context == 0 {
            return Err(RulebookError::ValidationFailed {
                field: "answer.default_max_context".to_string(),
                reason: "Context size must be at least 1".to_string(),
            });
        }

        if !(0.0..=2.0).contains(&self.completion.temperature) {
            return Err(RulebookError::ValidationFailed {
                field: "completion.temperature".to_string(),
                reason: "Temperature must be within [0.0, 2.0]".to_string(),
            });
        }

        Ok(())
    }

    /// Get configuration as TOML string
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| RulebookError::Config {
            message: format!("Failed to serialize config to TOML: {}", e),
        })
    }

    /// Save configuration to file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = self.to_toml()?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            chunker: ChunkerConfig {
                min_chunk_size: 200,
                target_chunk_size: 2500,
                max_chunk_size: 4000,
            },
            search_index: SearchIndexConfig {
                base_url: "http://127.0.0.1:9200".to_string(),
                index_name: "rulebook-chunks".to_string(),
                api_key: None,
                timeout_seconds: 10,
            },
            completion: CompletionConfig {
                base_url: "http://127.0.0.1:11434".to_string(),
                model: "default".to_string(),
                api_key: None,
                timeout_seconds: 30,
                max_tokens: 1024,
                temperature: 0.1,
            },
            answer: AnswerConfig {
                min_relevance_score: 0.5,
                retrieval_multiplier: 3,
                default_max_context: 5,
                excerpt_chars: 400,
            },
            storage: StorageConfig {
                db_path: PathBuf::from("./data/rulebook_search.db"),
                enable_compression: true,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                json_format: false,
            },
        }
    }
}

/// Initialize the global tracing subscriber from logging configuration.
/// Safe to call more than once; later calls are ignored.
pub fn init_logging(config: &LoggingConfig) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.clone()));

    if config.json_format {
        let _ = tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .try_init();
    } else {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .try_init();
    }
}
