//! # Rulebook Search Core
//!
//! ## Overview
//! This library ingests multi-jurisdiction rulebook PDFs (national, provincial,
//! regional) and answers natural-language questions with citation-grounded
//! excerpts, respecting a strict jurisdiction precedence order.
//!
//! ## Architecture
//! The system is composed of several key modules:
//! - `extraction`: PDF byte stream to ordered per-page plain text
//! - `chunker`: Rule-aligned chunking with stable IDs and page provenance
//! - `overrides`: Cross-jurisdiction override detection and review lifecycle
//! - `precedence`: Collapses jurisdiction-scoped rule versions into one primary
//! - `answer`: Retrieval, context assembly, and citation-grounded answering
//! - `search_index`: Query construction against the external keyword index
//! - `completion`: External completion-service client with local fallback
//! - `storage`: Job status, override mappings, and chunk blob persistence
//! - `ingestion`: Job-driven pipeline from upload message to indexed chunks
//! - `config`: Configuration management and settings
//! - `errors`: Centralized error handling and types
//!
//! ## Input/Output Specification
//! - **Input**: Rulebook PDFs (one per ingestion job), user queries (text)
//! - **Output**: Chunk sets indexed externally; answers with rule citations
//! - **Guarantee**: Every answer is traceable to retrieved chunks, or the
//!   system refuses to answer (`not_found`)
//!
//! ## Usage
//! ```rust,no_run
//! use rulebook_search::{Config, GroundedAnswerer};
//!
//! # async fn run(index: std::sync::Arc<dyn rulebook_search::search_index::SearchIndex>,
//! #              storage: std::sync::Arc<rulebook_search::storage::StorageManager>)
//! #              -> rulebook_search::Result<()> {
//! let config = Config::default();
//! let answerer = GroundedAnswerer::new(config.answer.clone(), index, None, storage);
//! let answer = answerer.answer("pitch clock violations", "2025", Some("ABC"), 5, false).await?;
//! println!("{} citations", answer.citations.len());
//! # Ok(())
//! # }
//! ```

// Core modules
pub mod config;
pub mod errors;
pub mod extraction;
pub mod chunker;
pub mod overrides;
pub mod precedence;
pub mod answer;
pub mod search_index;
pub mod completion;
pub mod storage;
pub mod ingestion;

// Utilities
pub mod utils;

// Re-exports for convenience
pub use answer::{ChatAnswer, Citation, GroundedAnswerer};
pub use chunker::Chunker;
pub use config::Config;
pub use errors::{Result, RulebookError};
pub use extraction::TextExtractor;
pub use overrides::{OverrideDetector, OverrideMapping, OverrideProposal, OverrideStatus};
pub use precedence::{PrecedenceGroup, PrecedenceResolver};

use serde::{Deserialize, Serialize};

/// Jurisdiction tier of a rule source.
///
/// Precedence when answering for a given jurisdiction is
/// Regional (matching) > Provincial > National; a Regional source for a
/// different jurisdiction is excluded entirely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScopeLevel {
    National,
    Provincial,
    Regional,
}

impl ScopeLevel {
    /// Base precedence rank ignoring jurisdiction matching.
    /// Regional matching is resolved by the precedence module.
    pub fn base_rank(&self) -> u8 {
        match self {
            ScopeLevel::National => 1,
            ScopeLevel::Provincial => 2,
            ScopeLevel::Regional => 3,
        }
    }

    /// String form used as the derived `scope` field in the search index.
    pub fn as_str(&self) -> &'static str {
        match self {
            ScopeLevel::National => "National",
            ScopeLevel::Provincial => "Provincial",
            ScopeLevel::Regional => "Regional",
        }
    }
}

impl std::fmt::Display for ScopeLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Language a rulebook document is written in.
///
/// The override detector selects its phrase table by this tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Primary,
    Secondary,
}

/// One page of extracted PDF text. Produced once per document and immutable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    /// 1-based page number within the source document
    pub page_number: u32,
    /// Extracted plain text for the page
    pub text: String,
}

/// A rule-aligned slice of a rulebook document.
///
/// Chunks are logically immutable: re-running ingestion on the same source
/// upserts chunks with identical IDs, it never partially updates one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// Stable opaque identifier; a pure function of
    /// (season, jurisdiction-or-GLOBAL, document type, start page, text prefix)
    pub chunk_id: String,
    /// Jurisdiction tier of the source document
    pub scope_level: ScopeLevel,
    /// Jurisdiction identifier; required iff `scope_level` is Regional
    pub jurisdiction_id: Option<String>,
    /// Rule identifier detected at the start of the parent section, verbatim
    /// (e.g. "6.01(a)"). `None` for standalone content without a header.
    pub canonical_rule_key: Option<String>,
    /// Rule number as displayed in the document, including any prefix word
    pub display_rule_number: Option<String>,
    /// Section title following the rule number, if one was detected
    pub title: Option<String>,
    /// First source page this chunk's text appears on (1-based)
    pub page_start: u32,
    /// Last source page this chunk's text appears on; `page_end >= page_start`
    pub page_end: u32,
    /// Path of the source document in external blob storage
    pub source_document_path: String,
    /// Chunk text
    pub text: String,
    /// Language of the source document
    pub language: Language,
}

impl Chunk {
    /// Rule number with any title, for display in citations and fallbacks.
    pub fn rule_label(&self) -> String {
        match (&self.display_rule_number, &self.title) {
            (Some(num), Some(title)) => format!("{} {}", num, title),
            (Some(num), None) => num.clone(),
            (None, Some(title)) => title.clone(),
            (None, None) => "untitled section".to_string(),
        }
    }
}

/// A chunk returned from the external search index with its relevance score
/// and the season/jurisdiction context echoed back from the query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    /// The matched chunk
    pub chunk: Chunk,
    /// Relevance score from the external index (opaque, higher is better)
    pub score: f32,
    /// Season the query was scoped to
    pub season_id: String,
    /// Jurisdiction the query was scoped to, if any
    pub jurisdiction_id: Option<String>,
}
