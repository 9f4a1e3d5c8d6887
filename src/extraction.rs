//! # PDF Text Extraction Module
//!
//! ## Purpose
//! Turns a rulebook PDF byte stream into ordered per-page plain text. This is
//! thin glue over the PDF parser; everything rule-aware happens downstream in
//! the chunker.
//!
//! ## Input/Output Specification
//! - **Input**: PDF bytes, source document path (for error context)
//! - **Output**: Ordered `Page` list, 1-based page numbers preserved
//! - **Failure**: An unreadable or corrupt PDF is fatal to the ingestion job
//!   that supplied it; no partial output is produced
//!
//! Pages with no extractable text are skipped entirely. A document where every
//! page is empty is reported as an error rather than an empty page list, so
//! the job is marked Failed instead of silently producing zero chunks.

use crate::errors::{Result, RulebookError};
use crate::Page;
use lopdf::Document;

/// Extracts per-page plain text from PDF bytes.
pub struct TextExtractor;

impl TextExtractor {
    pub fn new() -> Self {
        Self
    }

    /// Extract ordered pages from a PDF byte stream.
    pub fn extract_pages(&self, bytes: &[u8], source_path: &str) -> Result<Vec<Page>> {
        let document = Document::load_mem(bytes).map_err(|e| RulebookError::ExtractionFailed {
            path: source_path.to_string(),
            details: e.to_string(),
        })?;

        let mut pages = Vec::new();

        for (&page_number, _) in document.get_pages().iter() {
            let text = match document.extract_text(&[page_number]) {
                Ok(text) => text,
                Err(e) => {
                    tracing::warn!(
                        page = page_number,
                        path = source_path,
                        "Page text extraction failed, skipping page: {}",
                        e
                    );
                    continue;
                }
            };

            if text.trim().is_empty() {
                tracing::debug!(page = page_number, "Skipping page with no extractable text");
                continue;
            }

            pages.push(Page { page_number, text });
        }

        if pages.is_empty() {
            return Err(RulebookError::EmptyDocument {
                path: source_path.to_string(),
            });
        }

        tracing::debug!(
            path = source_path,
            pages = pages.len(),
            "Extracted text from document"
        );

        Ok(pages)
    }
}

impl Default for TextExtractor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn corrupt_bytes_are_a_fatal_extraction_error() {
        let extractor = TextExtractor::new();
        let result = extractor.extract_pages(b"not a pdf at all", "docs/bad.pdf");
        match result {
            Err(RulebookError::ExtractionFailed { path, .. }) => {
                assert_eq!(path, "docs/bad.pdf");
            }
            other => panic!("expected ExtractionFailed, got {:?}", other.err()),
        }
    }
}
