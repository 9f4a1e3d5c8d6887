//! # Error Handling Module
//!
//! ## Purpose
//! Centralized error handling for the rulebook search core, providing
//! structured error types for every pipeline stage and external boundary.
//!
//! ## Input/Output Specification
//! - **Input**: Error conditions from extraction, chunking, storage, retrieval
//! - **Output**: Structured error types with context and error chains
//! - **Error Categories**: Extraction, Ingestion, Storage, Retrieval, Answer,
//!   Configuration
//!
//! ## Key Features
//! - Hierarchical error types with detailed context
//! - Automatic error conversion and chaining
//! - Validation errors distinguishable from backing-service failures, so the
//!   caller boundary can map them to client vs. generic server errors
//! - Recoverability hints for retry decisions

use thiserror::Error;

/// Result type used throughout the application
pub type Result<T> = std::result::Result<T, RulebookError>;

/// Error types for the rulebook search core
#[derive(Debug, Error)]
pub enum RulebookError {
    /// Unreadable or corrupt PDF; fatal to the ingestion job that hit it
    #[error("PDF extraction failed for '{path}': {details}")]
    ExtractionFailed { path: String, details: String },

    /// Document produced no extractable text on any page
    #[error("Document '{path}' contains no extractable text")]
    EmptyDocument { path: String },

    /// Chunking could not produce a valid chunk set
    #[error("Chunking failed: {details}")]
    ChunkingFailed { details: String },

    /// Search index rejected an upsert or query
    #[error("Search index error: {details}")]
    SearchIndex { details: String },

    /// Completion service unavailable (non-2xx, malformed body, or timeout).
    /// Always absorbed by the deterministic fallback path, never surfaced.
    #[error("Completion service unavailable: {details}")]
    CompletionUnavailable { details: String },

    /// Caller-side validation failure; maps to a synchronous client error
    #[error("Validation failed for '{field}': {reason}")]
    ValidationFailed { field: String, reason: String },

    /// Disallowed override-mapping state transition
    #[error("Invalid override transition from {from} for mapping '{mapping_id}'")]
    InvalidOverrideTransition { mapping_id: String, from: String },

    /// Requested entity does not exist
    #[error("{entity} '{key}' not found")]
    NotFound { entity: String, key: String },

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Local database errors
    #[error("Database error: {0}")]
    Database(#[from] sled::Error),

    /// Binary serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// HTTP client errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON parsing errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing errors
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Generic I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal system errors
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl RulebookError {
    /// Check if the error is recoverable (can be retried)
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            RulebookError::Http(_)
                | RulebookError::SearchIndex { .. }
                | RulebookError::CompletionUnavailable { .. }
        )
    }

    /// Whether the error is the caller's fault. Used at the request boundary
    /// to choose between a client error and a generic server error.
    pub fn is_client_error(&self) -> bool {
        matches!(self, RulebookError::ValidationFailed { .. })
    }

    /// Get error category for metrics and logging
    pub fn category(&self) -> &'static str {
        match self {
            RulebookError::ExtractionFailed { .. } | RulebookError::EmptyDocument { .. } => {
                "extraction"
            }
            RulebookError::ChunkingFailed { .. } => "chunking",
            RulebookError::SearchIndex { .. } => "search_index",
            RulebookError::CompletionUnavailable { .. } => "completion",
            RulebookError::ValidationFailed { .. } => "validation",
            RulebookError::InvalidOverrideTransition { .. } => "overrides",
            RulebookError::Database(_) | RulebookError::Serialization(_) => "storage",
            RulebookError::Config { .. } | RulebookError::Toml(_) => "configuration",
            RulebookError::Http(_) | RulebookError::Json(_) => "network",
            RulebookError::NotFound { .. }
            | RulebookError::Io(_)
            | RulebookError::Internal { .. } => "generic",
        }
    }
}

// Helper macros for common error patterns
#[macro_export]
macro_rules! internal_error {
    ($msg:expr) => {
        $crate::errors::RulebookError::Internal {
            message: $msg.to_string(),
        }
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::errors::RulebookError::Internal {
            message: format!($fmt, $($arg)*),
        }
    };
}

#[macro_export]
macro_rules! validation_error {
    ($field:expr, $reason:expr) => {
        $crate::errors::RulebookError::ValidationFailed {
            field: $field.to_string(),
            reason: $reason.to_string(),
        }
    };
}
