//! # Rule-Aligned Chunking Module
//!
//! ## Purpose
//! Consumes ordered rulebook pages and emits rule-aligned chunks with stable
//! identifiers and page-range provenance. Rule boundaries are preserved across
//! page breaks: a rule split over several pages keeps its identity on every
//! derived chunk.
//!
//! ## Input/Output Specification
//! - **Input**: Ordered `Page` list plus the document context (season,
//!   jurisdiction, document type, scope, language, source path)
//! - **Output**: Deterministic, order-stable `Chunk` list
//! - **Idempotence**: Identical inputs always produce byte-identical chunk IDs,
//!   so re-ingestion upserts rather than duplicates
//!
//! ## Key Features
//! - Rule-header detection via an ordered, per-language pattern table
//! - Blank-line paragraph fallback for documents without detectable headers
//! - Sentence-boundary splitting of oversize sections, with the parent
//!   section's rule key and title stamped onto every sub-chunk
//! - Absolute-offset to page-range mapping for citation provenance
//! - SHA-256 chunk identifiers stable across runs and across hosts

use crate::config::ChunkerConfig;
use crate::errors::{Result, RulebookError};
use crate::{Chunk, Language, Page, ScopeLevel};
use regex::Regex;
use sha2::{Digest, Sha256};
use unicode_normalization::UnicodeNormalization;

/// Number of leading characters of chunk text that participate in the chunk ID.
const ID_TEXT_PREFIX_CHARS: usize = 100;

/// Everything about the source document a chunk needs to carry.
/// Built from the ingestion job message; the chunker never reads ambient state.
#[derive(Debug, Clone)]
pub struct DocumentContext {
    pub season_id: String,
    pub jurisdiction_id: Option<String>,
    pub document_type: String,
    pub scope_level: ScopeLevel,
    pub language: Language,
    pub source_document_path: String,
}

/// One entry in the rule-header detection table.
///
/// Patterns are tried in order; the table can be extended per locale without
/// touching the chunking control flow.
struct HeaderPattern {
    language: Language,
    regex: Regex,
}

/// A detected rule header at the start of a section.
#[derive(Debug, Clone)]
struct RuleHeader {
    /// Rule identifier verbatim, e.g. "6.01(a)"; the canonical rule key
    rule_key: String,
    /// Rule number as displayed, including any "Rule"-style prefix
    display_number: String,
    /// Title text following the number, if present
    title: Option<String>,
    /// Byte offset in the buffer where the header's body begins
    body_start: usize,
}

/// A span of the concatenated buffer between two header boundaries.
struct CandidateSection {
    start: usize,
    end: usize,
    header: Option<RuleHeader>,
}

/// Deterministic rule-aligned chunker.
pub struct Chunker {
    config: ChunkerConfig,
    header_patterns: Vec<HeaderPattern>,
    sentence_end: Regex,
    paragraph_break: Regex,
}

impl Chunker {
    pub fn new(config: ChunkerConfig) -> Result<Self> {
        // Rule id: digits, optional dotted segments, optional sub-letter
        // groups, e.g. "6", "6.01", "6.01(a)". The header must start a line
        // and be followed by a dash/colon or a capitalized word so ordinary
        // in-text rule references do not open a new section.
        let header_sources: Vec<(Language, &str)> = vec![
            (
                Language::Primary,
                r"(?m)^[ \t]*(?:(?P<prefix>Rule)\s+)?(?P<num>\d{1,3}(?:\.\d{1,3})*(?:\([a-z0-9]{1,3}\))*)\s*(?:[-–—:]\s*(?P<dtitle>[^\n]{1,120})|\s(?P<ctitle>[A-Z][^\n]{0,120}))",
            ),
            (
                Language::Secondary,
                r"(?m)^[ \t]*(?:(?P<prefix>Règle|Regla)\s+)?(?P<num>\d{1,3}(?:\.\d{1,3})*(?:\([a-z0-9]{1,3}\))*)\s*(?:[-–—:]\s*(?P<dtitle>[^\n]{1,120})|\s(?P<ctitle>[A-ZÀÂÇÉÈÊËÎÏÔÙÛÜ][^\n]{0,120}))",
            ),
        ];

        let mut header_patterns = Vec::new();
        for (language, source) in header_sources {
            header_patterns.push(HeaderPattern {
                language,
                regex: Regex::new(source)
                    .map_err(|e| crate::internal_error!("Invalid header regex: {}", e))?,
            });
        }

        let sentence_end = Regex::new(r"[.!?]+[\s\n]+")
            .map_err(|e| crate::internal_error!("Invalid sentence regex: {}", e))?;
        let paragraph_break = Regex::new(r"\n[ \t]*\n")
            .map_err(|e| crate::internal_error!("Invalid paragraph regex: {}", e))?;

        Ok(Self {
            config,
            header_patterns,
            sentence_end,
            paragraph_break,
        })
    }

    /// Chunk ordered pages into rule-aligned chunks.
    ///
    /// Deterministic: identical inputs produce an identical, order-stable
    /// output list with identical chunk IDs.
    pub fn chunk(&self, pages: &[Page], context: &DocumentContext) -> Result<Vec<Chunk>> {
        if context.scope_level == ScopeLevel::Regional && context.jurisdiction_id.is_none() {
            return Err(crate::validation_error!(
                "jurisdiction_id",
                "Regional documents require a jurisdiction"
            ));
        }

        let (buffer, page_offsets) = self.concatenate_pages(pages);
        if buffer.trim().is_empty() {
            return Err(RulebookError::ChunkingFailed {
                details: "No text to chunk after page concatenation".to_string(),
            });
        }

        let sections = self.split_sections(&buffer, context.language);

        let mut chunks = Vec::new();
        for section in &sections {
            self.emit_section(section, &buffer, &page_offsets, context, &mut chunks);
        }

        tracing::debug!(
            sections = sections.len(),
            chunks = chunks.len(),
            season = %context.season_id,
            "Chunked document"
        );

        Ok(chunks)
    }

    /// Concatenate page texts into one buffer, recording the absolute offset
    /// at which each page begins so any substring maps back to a page range.
    fn concatenate_pages(&self, pages: &[Page]) -> (String, Vec<(usize, u32)>) {
        let mut buffer = String::new();
        let mut offsets = Vec::with_capacity(pages.len());

        for page in pages {
            let normalized: String = page.text.nfc().collect();
            if normalized.trim().is_empty() {
                continue;
            }
            offsets.push((buffer.len(), page.page_number));
            buffer.push_str(&normalized);
            if !normalized.ends_with('\n') {
                buffer.push('\n');
            }
        }

        (buffer, offsets)
    }

    /// Detect header boundaries and build candidate sections. Falls back to
    /// blank-line paragraph splitting when no header matches anywhere.
    fn split_sections(&self, buffer: &str, language: Language) -> Vec<CandidateSection> {
        let headers = self.detect_headers(buffer, language);

        if headers.is_empty() {
            return self
                .paragraph_spans(buffer)
                .into_iter()
                .map(|(start, end)| CandidateSection {
                    start,
                    end,
                    header: None,
                })
                .collect();
        }

        let mut sections = Vec::new();

        // Preamble before the first header is standalone content.
        let first_start = headers[0].0;
        if first_start > 0 {
            sections.push(CandidateSection {
                start: 0,
                end: first_start,
                header: None,
            });
        }

        for (i, (start, header)) in headers.iter().enumerate() {
            let end = headers
                .get(i + 1)
                .map(|(next_start, _)| *next_start)
                .unwrap_or(buffer.len());
            sections.push(CandidateSection {
                start: *start,
                end,
                header: Some(header.clone()),
            });
        }

        sections
    }

    /// Run the header pattern table over the whole buffer.
    /// Returns (match start offset, parsed header) sorted by offset.
    fn detect_headers(&self, buffer: &str, language: Language) -> Vec<(usize, RuleHeader)> {
        let mut headers: Vec<(usize, RuleHeader)> = Vec::new();

        for pattern in self
            .header_patterns
            .iter()
            .filter(|p| p.language == language)
        {
            for captures in pattern.regex.captures_iter(buffer) {
                let whole = captures.get(0).expect("capture group 0 always present");
                let num = match captures.name("num") {
                    Some(m) => m.as_str().to_string(),
                    None => continue,
                };

                let display_number = match captures.name("prefix") {
                    Some(prefix) => format!("{} {}", prefix.as_str(), num),
                    None => num.clone(),
                };

                let title = captures
                    .name("dtitle")
                    .or_else(|| captures.name("ctitle"))
                    .map(|m| m.as_str().trim().to_string())
                    .filter(|t| !t.is_empty());

                headers.push((
                    whole.start(),
                    RuleHeader {
                        rule_key: num,
                        display_number,
                        title,
                        body_start: whole.end(),
                    },
                ));
            }
        }

        headers.sort_by_key(|(start, _)| *start);
        headers.dedup_by_key(|(start, _)| *start);
        headers
    }

    /// Paragraph spans for fallback mode (no detectable rule headers).
    fn paragraph_spans(&self, buffer: &str) -> Vec<(usize, usize)> {
        let mut spans = Vec::new();
        let mut cursor = 0;

        for m in self.paragraph_break.find_iter(buffer) {
            if m.start() > cursor {
                spans.push((cursor, m.start()));
            }
            cursor = m.end();
        }
        if cursor < buffer.len() {
            spans.push((cursor, buffer.len()));
        }

        spans
    }

    /// Turn one candidate section into zero or more chunks.
    ///
    /// The section's header (if any) is detected once and stamped onto every
    /// sub-chunk produced from it, so a rule split across pages never loses
    /// its identity.
    fn emit_section(
        &self,
        section: &CandidateSection,
        buffer: &str,
        page_offsets: &[(usize, u32)],
        context: &DocumentContext,
        chunks: &mut Vec<Chunk>,
    ) {
        let text = &buffer[section.start..section.end];
        if text.trim().len() < self.config.min_chunk_size {
            return;
        }

        // A header with no body before the next header carries no content.
        if let Some(header) = &section.header {
            let body = &buffer[header.body_start.min(section.end)..section.end];
            if body.trim().is_empty() {
                return;
            }
        }

        let spans = if text.len() > self.config.max_chunk_size {
            self.split_at_sentences(text, section.start)
        } else {
            vec![(section.start, section.end)]
        };

        for (start, end) in spans {
            let chunk_text = buffer[start..end].trim();
            if chunk_text.len() < self.config.min_chunk_size {
                // Tiny trailing remainder; dropped rather than padded.
                continue;
            }

            let (page_start, page_end) = page_range(page_offsets, start, end);
            let chunk_id = compute_chunk_id(
                &context.season_id,
                context.jurisdiction_id.as_deref(),
                &context.document_type,
                page_start,
                chunk_text,
            );

            chunks.push(Chunk {
                chunk_id,
                scope_level: context.scope_level,
                jurisdiction_id: context.jurisdiction_id.clone(),
                canonical_rule_key: section.header.as_ref().map(|h| h.rule_key.clone()),
                display_rule_number: section.header.as_ref().map(|h| h.display_number.clone()),
                title: section.header.as_ref().and_then(|h| h.title.clone()),
                page_start,
                page_end,
                source_document_path: context.source_document_path.clone(),
                text: chunk_text.to_string(),
                language: context.language,
            });
        }
    }

    /// Split an oversize section at sentence boundaries into spans no larger
    /// than the target size. A single sentence longer than the target is
    /// emitted whole up to the hard cap; past the cap it is cut at whitespace
    /// so no chunk ever exceeds `max_chunk_size`.
    fn split_at_sentences(&self, text: &str, base_offset: usize) -> Vec<(usize, usize)> {
        let mut boundaries: Vec<usize> = self
            .sentence_end
            .find_iter(text)
            .map(|m| m.end())
            .collect();
        if boundaries.last() != Some(&text.len()) {
            boundaries.push(text.len());
        }

        let mut spans = Vec::new();
        let mut span_start = 0;
        let mut previous = 0;

        for boundary in boundaries {
            if boundary - span_start > self.config.target_chunk_size && previous > span_start {
                spans.push((base_offset + span_start, base_offset + previous));
                span_start = previous;
            }
            previous = boundary;
        }
        if span_start < text.len() {
            spans.push((base_offset + span_start, base_offset + text.len()));
        }

        // Hard-cap pass: a span still over the cap has no usable sentence
        // boundaries (tables, run-on extracted text), so cut at whitespace.
        let mut capped = Vec::new();
        for (start, end) in spans {
            if end - start <= self.config.max_chunk_size {
                capped.push((start, end));
                continue;
            }

            let mut cursor = start;
            while end - cursor > self.config.max_chunk_size {
                let slice = &text[cursor - base_offset..end - base_offset];
                let limit = floor_char_boundary(slice, self.config.target_chunk_size);
                let cut = slice[..limit]
                    .rfind(char::is_whitespace)
                    .filter(|&i| i > 0)
                    .unwrap_or(limit);
                capped.push((cursor, cursor + cut));
                cursor += cut;
            }
            if cursor < end {
                capped.push((cursor, end));
            }
        }

        capped
    }
}

/// Largest char-boundary index not exceeding `index`.
fn floor_char_boundary(s: &str, index: usize) -> usize {
    let mut index = index.min(s.len());
    while index > 0 && !s.is_char_boundary(index) {
        index -= 1;
    }
    index
}

/// Map a buffer span back to its (page_start, page_end) range via the
/// offset→page map recorded during concatenation.
fn page_range(page_offsets: &[(usize, u32)], start: usize, end: usize) -> (u32, u32) {
    let page_at = |offset: usize| -> u32 {
        let idx = page_offsets.partition_point(|(page_start, _)| *page_start <= offset);
        page_offsets[idx.saturating_sub(1)].1
    };

    let page_start = page_at(start);
    let page_end = page_at(end.saturating_sub(1).max(start));
    (page_start, page_end.max(page_start))
}

/// Deterministic chunk identifier.
///
/// A pure function of (season, jurisdiction-or-GLOBAL, document type, start
/// page, first 100 chars of chunk text): re-ingesting identical input yields
/// an identical ID, which is what makes index upserts idempotent.
pub fn compute_chunk_id(
    season_id: &str,
    jurisdiction_id: Option<&str>,
    document_type: &str,
    page_start: u32,
    text: &str,
) -> String {
    let prefix: String = text.chars().take(ID_TEXT_PREFIX_CHARS).collect();

    let mut hasher = Sha256::new();
    hasher.update(season_id.as_bytes());
    hasher.update(b"|");
    hasher.update(jurisdiction_id.unwrap_or("GLOBAL").as_bytes());
    hasher.update(b"|");
    hasher.update(document_type.as_bytes());
    hasher.update(b"|");
    hasher.update(page_start.to_be_bytes());
    hasher.update(b"|");
    hasher.update(prefix.as_bytes());

    let digest = hasher.finalize();
    digest
        .iter()
        .take(16)
        .map(|b| format!("{:02x}", b))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChunkerConfig;

    fn default_chunker() -> Chunker {
        Chunker::new(ChunkerConfig {
            min_chunk_size: 200,
            target_chunk_size: 2500,
            max_chunk_size: 4000,
        })
        .unwrap()
    }

    fn context() -> DocumentContext {
        DocumentContext {
            season_id: "2025".to_string(),
            jurisdiction_id: None,
            document_type: "rulebook".to_string(),
            scope_level: ScopeLevel::National,
            language: Language::Primary,
            source_document_path: "docs/national-2025.pdf".to_string(),
        }
    }

    fn body(sentences: usize) -> String {
        "The batter must keep at least one foot inside the box between pitches. "
            .repeat(sentences)
    }

    fn ruled_pages() -> Vec<Page> {
        vec![
            Page {
                page_number: 1,
                text: format!("6.01 Interference\n{}", body(5)),
            },
            Page {
                page_number: 2,
                text: format!("6.02(a) Illegal Pitches\n{}", body(5)),
            },
        ]
    }

    #[test]
    fn chunk_ids_are_deterministic_across_runs() {
        let chunker = default_chunker();
        let pages = ruled_pages();

        let first = chunker.chunk(&pages, &context()).unwrap();
        let second = chunker.chunk(&pages, &context()).unwrap();

        let first_ids: Vec<_> = first.iter().map(|c| c.chunk_id.clone()).collect();
        let second_ids: Vec<_> = second.iter().map(|c| c.chunk_id.clone()).collect();
        assert!(!first_ids.is_empty());
        assert_eq!(first_ids, second_ids);
    }

    #[test]
    fn chunk_id_changes_with_season() {
        let id_a = compute_chunk_id("2024", None, "rulebook", 1, "some rule text");
        let id_b = compute_chunk_id("2025", None, "rulebook", 1, "some rule text");
        assert_ne!(id_a, id_b);
    }

    #[test]
    fn detects_rule_headers_and_keys_verbatim() {
        let chunker = default_chunker();
        let chunks = chunker.chunk(&ruled_pages(), &context()).unwrap();

        let keys: Vec<_> = chunks
            .iter()
            .filter_map(|c| c.canonical_rule_key.clone())
            .collect();
        assert!(keys.contains(&"6.01".to_string()));
        assert!(keys.contains(&"6.02(a)".to_string()));
    }

    #[test]
    fn rule_prefix_is_kept_in_display_number_only() {
        let chunker = default_chunker();
        let pages = vec![Page {
            page_number: 1,
            text: format!("Rule 6.01(a) - Batter Interference\n{}", body(5)),
        }];

        let chunks = chunker.chunk(&pages, &context()).unwrap();
        assert_eq!(chunks[0].canonical_rule_key.as_deref(), Some("6.01(a)"));
        assert_eq!(chunks[0].display_rule_number.as_deref(), Some("Rule 6.01(a)"));
        assert_eq!(chunks[0].title.as_deref(), Some("Batter Interference"));
    }

    #[test]
    fn oversize_section_sub_chunks_share_key_and_title() {
        let chunker = default_chunker();
        let pages = vec![Page {
            page_number: 1,
            text: format!("7.13 Home Plate Collisions\n{}", body(120)),
        }];

        let chunks = chunker.chunk(&pages, &context()).unwrap();
        assert!(chunks.len() > 1, "expected an oversize section to split");
        for chunk in &chunks {
            assert_eq!(chunk.canonical_rule_key.as_deref(), Some("7.13"));
            assert_eq!(chunk.title.as_deref(), Some("Home Plate Collisions"));
            assert!(chunk.text.len() <= 4000);
        }
    }

    #[test]
    fn sentence_free_section_is_capped_at_whitespace() {
        let chunker = default_chunker();
        // Table-like extraction: thousands of chars with no sentence
        // punctuation anywhere.
        let pages = vec![Page {
            page_number: 1,
            text: format!("8.01 Distance Table\n{}", "column value ".repeat(700)),
        }];

        let chunks = chunker.chunk(&pages, &context()).unwrap();
        assert!(chunks.len() > 1, "expected the capped section to split");
        for chunk in &chunks {
            assert!(chunk.text.len() <= 4000);
            assert_eq!(chunk.canonical_rule_key.as_deref(), Some("8.01"));
            assert_eq!(chunk.title.as_deref(), Some("Distance Table"));
        }
    }

    #[test]
    fn page_ranges_stay_within_source_bounds() {
        let chunker = default_chunker();
        let pages = ruled_pages();
        let chunks = chunker.chunk(&pages, &context()).unwrap();

        for chunk in &chunks {
            assert!(chunk.page_start <= chunk.page_end);
            assert!(chunk.page_start >= 1);
            assert!(chunk.page_end <= 2);
        }
    }

    #[test]
    fn rule_spanning_a_page_break_keeps_one_key() {
        let chunker = default_chunker();
        let pages = vec![
            Page {
                page_number: 1,
                text: format!("5.09(b) Retired Runners\n{}", body(3)),
            },
            Page {
                page_number: 2,
                // Continuation text, no header on this page.
                text: body(3),
            },
        ];

        let chunks = chunker.chunk(&pages, &context()).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].canonical_rule_key.as_deref(), Some("5.09(b)"));
        assert_eq!(chunks[0].page_start, 1);
        assert_eq!(chunks[0].page_end, 2);
    }

    #[test]
    fn short_sections_are_dropped() {
        let chunker = default_chunker();
        let pages = vec![Page {
            page_number: 1,
            text: format!("6.01 Interference\nToo short to keep.\n\n6.02 Pitching\n{}", body(5)),
        }];

        let chunks = chunker.chunk(&pages, &context()).unwrap();
        let keys: Vec<_> = chunks
            .iter()
            .filter_map(|c| c.canonical_rule_key.as_deref())
            .collect();
        assert!(!keys.contains(&"6.01"));
        assert!(keys.contains(&"6.02"));
    }

    #[test]
    fn headerless_document_falls_back_to_paragraphs() {
        let chunker = default_chunker();
        let pages = vec![Page {
            page_number: 1,
            text: format!("{}\n\n{}", body(5).to_lowercase(), body(6).to_lowercase()),
        }];

        let chunks = chunker.chunk(&pages, &context()).unwrap();
        assert_eq!(chunks.len(), 2);
        for chunk in &chunks {
            assert!(chunk.canonical_rule_key.is_none());
            assert!(chunk.title.is_none());
        }
    }

    #[test]
    fn regional_scope_requires_jurisdiction() {
        let chunker = default_chunker();
        let mut ctx = context();
        ctx.scope_level = ScopeLevel::Regional;
        ctx.jurisdiction_id = None;

        let result = chunker.chunk(&ruled_pages(), &ctx);
        assert!(matches!(
            result,
            Err(RulebookError::ValidationFailed { .. })
        ));
    }

    #[test]
    fn secondary_language_header_prefix_is_recognized() {
        let chunker = default_chunker();
        let mut ctx = context();
        ctx.language = Language::Secondary;

        let pages = vec![Page {
            page_number: 1,
            text: format!("Règle 6.01(a) - Obstruction du frappeur\n{}", body(5)),
        }];

        let chunks = chunker.chunk(&pages, &ctx).unwrap();
        assert_eq!(chunks[0].canonical_rule_key.as_deref(), Some("6.01(a)"));
        assert_eq!(chunks[0].display_rule_number.as_deref(), Some("Règle 6.01(a)"));
    }
}
