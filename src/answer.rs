//! # Grounded Answering Module
//!
//! ## Purpose
//! Turns a natural-language question into a citation-grounded answer.
//! Retrieval over-fetches from the search index, precedence resolution picks
//! the authoritative version of each rule, and the completion service phrases
//! the answer from those excerpts only.
//!
//! ## Input/Output Specification
//! - **Input**: Question text, season, optional jurisdiction, context size
//! - **Output**: `ChatAnswer` with one citation per context chunk, or a
//!   `NotFound` refusal when no retrieved evidence clears the relevance bar
//! - **Guarantee**: Answer text either cites the provided excerpts or is the
//!   deterministic template built from them; it is never free-floating
//!
//! ## Key Features
//! - Over-fetch by a configured multiplier so precedence grouping has enough
//!   candidates to collapse
//! - Completion failures and ungrounded completions degrade to a
//!   deterministic fallback template, never to an error
//! - Alternates (lower-precedence versions of cited rules) are returned on
//!   request for transparency

use crate::completion::CompletionClient;
use crate::config::AnswerConfig;
use crate::errors::{Result, RulebookError};
use crate::precedence::{PrecedenceGroup, PrecedenceResolver};
use crate::search_index::{SearchIndex, SearchRequest};
use crate::storage::StorageManager;
use crate::utils::TextUtils;
use crate::{Chunk, SearchHit};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// How the answer text was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AnswerStatus {
    /// Phrased by the completion service and verified against the citations
    Answered,
    /// Deterministic template built directly from the cited excerpts
    Fallback,
    /// No retrieved evidence cleared the relevance threshold
    NotFound,
}

/// One citation backing an answer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Citation {
    pub chunk_id: String,
    /// Rule number and title as displayed in the source document
    pub rule_label: String,
    pub scope: String,
    pub jurisdiction_id: Option<String>,
    pub page_start: u32,
    pub page_end: u32,
    pub source_document_path: String,
    /// Verbatim excerpt from the cited chunk
    pub excerpt: String,
}

impl Citation {
    fn from_chunk(chunk: &Chunk, excerpt_chars: usize) -> Self {
        Self {
            chunk_id: chunk.chunk_id.clone(),
            rule_label: chunk.rule_label(),
            scope: chunk.scope_level.as_str().to_string(),
            jurisdiction_id: chunk.jurisdiction_id.clone(),
            page_start: chunk.page_start,
            page_end: chunk.page_end,
            source_document_path: chunk.source_document_path.clone(),
            excerpt: TextUtils::truncate(&chunk.text, excerpt_chars),
        }
    }
}

/// A complete answer to one question.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatAnswer {
    pub status: AnswerStatus,
    /// The question as asked
    pub query: String,
    pub answer_text: String,
    /// One citation per context chunk the answer was built from
    pub citations: Vec<Citation>,
    /// Lower-precedence versions of the cited rules, when requested
    pub alternates: Vec<Citation>,
    /// Context chunks the answer was built from
    pub context_used: usize,
    /// Hits retrieved before thresholding and precedence resolution
    pub total_retrieved: usize,
}

impl ChatAnswer {
    fn not_found(query: &str, total_retrieved: usize) -> Self {
        Self {
            status: AnswerStatus::NotFound,
            query: query.to_string(),
            answer_text: NOT_FOUND_TEXT.to_string(),
            citations: Vec::new(),
            alternates: Vec::new(),
            context_used: 0,
            total_retrieved,
        }
    }
}

const NOT_FOUND_TEXT: &str =
    "No provision covering this question was found in the selected season and jurisdiction.";

/// Answers questions from retrieved rulebook chunks.
pub struct GroundedAnswerer {
    config: AnswerConfig,
    index: Arc<dyn SearchIndex>,
    completion: Option<Arc<dyn CompletionClient>>,
    storage: Arc<StorageManager>,
    resolver: PrecedenceResolver,
    rule_reference: Regex,
}

impl GroundedAnswerer {
    pub fn new(
        config: AnswerConfig,
        index: Arc<dyn SearchIndex>,
        completion: Option<Arc<dyn CompletionClient>>,
        storage: Arc<StorageManager>,
    ) -> Self {
        // Dotted rule numbers only, so plain counts ("4 balls") never read
        // as rule references. Static pattern, verified by the module tests.
        let rule_reference =
            Regex::new(r"\d{1,3}\.\d{1,3}(?:\.\d{1,3})*(?:\([a-z0-9]{1,3}\))*")
                .expect("rule reference pattern must compile");

        Self {
            config,
            index,
            completion,
            storage,
            resolver: PrecedenceResolver::new(),
            rule_reference,
        }
    }

    /// Answer a question against one season and jurisdiction context.
    ///
    /// `max_context` of zero means the configured default. When
    /// `include_alternates` is set, demoted versions of each cited rule are
    /// returned alongside the citations.
    pub async fn answer(
        &self,
        question: &str,
        season_id: &str,
        jurisdiction_id: Option<&str>,
        max_context: usize,
        include_alternates: bool,
    ) -> Result<ChatAnswer> {
        let max_context = if max_context == 0 {
            self.config.default_max_context
        } else {
            max_context
        };

        let request = SearchRequest {
            query_text: question.to_string(),
            season_id: season_id.to_string(),
            jurisdiction_id: jurisdiction_id.map(|j| j.to_string()),
            scope_level: None,
            limit: self.config.retrieval_multiplier * max_context,
        };

        let hits = self.index.query(&request).await?;
        let total_retrieved = hits.len();
        let evidence: Vec<SearchHit> = hits
            .into_iter()
            .filter(|hit| hit.score >= self.config.min_relevance_score)
            .collect();

        if evidence.is_empty() {
            tracing::debug!(season = season_id, "No evidence above relevance threshold");
            return Ok(ChatAnswer::not_found(question, total_retrieved));
        }

        let confirmed = self
            .storage
            .list_confirmed_mappings(season_id, jurisdiction_id)
            .await?;
        let groups = self.resolver.resolve(evidence, jurisdiction_id, &confirmed);

        // Rule-keyed groups carry the precedence signal, so they claim
        // context slots first; standalone keyless hits fill what remains.
        let mut context: Vec<&PrecedenceGroup> = groups
            .iter()
            .filter(|g| g.rule_key.is_some())
            .take(max_context)
            .collect();
        context.extend(
            groups
                .iter()
                .filter(|g| g.rule_key.is_none())
                .take(max_context - context.len()),
        );

        if context.is_empty() {
            return Ok(ChatAnswer::not_found(question, total_retrieved));
        }

        let citations: Vec<Citation> = context
            .iter()
            .map(|group| Citation::from_chunk(&group.primary.chunk, self.config.excerpt_chars))
            .collect();

        let alternates = if include_alternates {
            context
                .iter()
                .flat_map(|group| group.alternates.iter())
                .map(|hit| Citation::from_chunk(&hit.chunk, self.config.excerpt_chars))
                .collect()
        } else {
            Vec::new()
        };

        let (status, answer_text) = self.phrase_answer(question, &context, &citations).await;

        Ok(ChatAnswer {
            status,
            query: question.to_string(),
            answer_text,
            context_used: citations.len(),
            total_retrieved,
            citations,
            alternates,
        })
    }

    /// Produce the answer text, degrading to the template when the completion
    /// service is absent, fails, or returns text that cites nothing.
    async fn phrase_answer(
        &self,
        question: &str,
        context: &[&PrecedenceGroup],
        citations: &[Citation],
    ) -> (AnswerStatus, String) {
        let Some(completion) = &self.completion else {
            return (AnswerStatus::Fallback, self.fallback_text(context));
        };

        let system_prompt = "You answer questions about rulebook provisions. \
            Use only the numbered excerpts provided. Cite every claim with its \
            excerpt marker, e.g. [1]. If the excerpts do not answer the \
            question, say exactly that.";
        let user_prompt = self.build_user_prompt(question, context);

        match completion.complete(system_prompt, &user_prompt).await {
            Ok(text) => {
                if let Some(reference) = self.ungrounded_reference(&text, citations) {
                    tracing::warn!(
                        reference = %reference,
                        "Completion referenced an uncited rule, using fallback template"
                    );
                    (AnswerStatus::Fallback, self.fallback_text(context))
                } else if !cites_context(&text, context.len()) {
                    tracing::warn!("Completion cited no provided excerpt, using fallback template");
                    (AnswerStatus::Fallback, self.fallback_text(context))
                } else {
                    (AnswerStatus::Answered, text)
                }
            }
            Err(RulebookError::CompletionUnavailable { details }) => {
                tracing::warn!("Completion unavailable, using fallback template: {}", details);
                (AnswerStatus::Fallback, self.fallback_text(context))
            }
            Err(e) => {
                tracing::warn!("Completion failed, using fallback template: {}", e);
                (AnswerStatus::Fallback, self.fallback_text(context))
            }
        }
    }

    /// First rule-number-looking reference in the answer text that maps to no
    /// citation, if any. Such an answer is unverifiable and must not surface.
    fn ungrounded_reference(&self, text: &str, citations: &[Citation]) -> Option<String> {
        for m in self.rule_reference.find_iter(text) {
            let reference = m.as_str();
            let grounded = citations
                .iter()
                .any(|c| c.rule_label.contains(reference) || reference.contains(&c.rule_label));
            if !grounded {
                return Some(reference.to_string());
            }
        }
        None
    }

    fn build_user_prompt(&self, question: &str, context: &[&PrecedenceGroup]) -> String {
        let mut prompt = format!("Question: {}\n\nExcerpts:\n", question);

        for (i, group) in context.iter().enumerate() {
            let chunk = &group.primary.chunk;
            let tier = if group.primary.score >= self.config.min_relevance_score * 1.5 {
                "high relevance"
            } else {
                "moderate relevance"
            };
            prompt.push_str(&format!(
                "[{}] {} ({}, pages {}-{}, {})",
                i + 1,
                chunk.rule_label(),
                chunk.scope_level,
                chunk.page_start,
                chunk.page_end,
                tier,
            ));
            if !group.alternates.is_empty() {
                // The model sees that lower-precedence wording exists without
                // being given text it might quote instead of the primary.
                prompt.push_str(&format!(
                    " [supersedes {} lower-precedence version(s)]",
                    group.alternates.len()
                ));
            }
            prompt.push('\n');
            prompt.push_str(&TextUtils::truncate(&chunk.text, self.config.excerpt_chars));
            prompt.push_str("\n\n");
        }

        prompt
    }

    /// Deterministic answer built from the same excerpts the citations carry.
    fn fallback_text(&self, context: &[&PrecedenceGroup]) -> String {
        let primary = &context[0].primary.chunk;
        let mut text = format!(
            "The most authoritative provision found is {} ({}, pages {}-{}):\n\n{}",
            primary.rule_label(),
            primary.scope_level,
            primary.page_start,
            primary.page_end,
            TextUtils::truncate(&primary.text, self.config.excerpt_chars),
        );

        if context.len() > 1 {
            text.push_str("\n\nRelated provisions:");
            for group in &context[1..] {
                let chunk = &group.primary.chunk;
                text.push_str(&format!(
                    "\n- {} ({}, pages {}-{})",
                    chunk.rule_label(),
                    chunk.scope_level,
                    chunk.page_start,
                    chunk.page_end,
                ));
            }
        }

        text
    }
}

/// A grounded completion must reference at least one provided excerpt marker.
fn cites_context(text: &str, context_len: usize) -> bool {
    (1..=context_len).any(|i| text.contains(&format!("[{}]", i)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::CompletionClient;
    use crate::config::StorageConfig;
    use crate::overrides::{OverrideMapping, OverrideProposal, OverrideStatus};
    use crate::search_index::{IndexDocument, MemorySearchIndex};
    use crate::{Language, ScopeLevel};
    use async_trait::async_trait;

    struct CannedCompletion(String);

    #[async_trait]
    impl CompletionClient for CannedCompletion {
        async fn complete(&self, _system: &str, _user: &str) -> Result<String> {
            Ok(self.0.clone())
        }
    }

    struct BrokenCompletion;

    #[async_trait]
    impl CompletionClient for BrokenCompletion {
        async fn complete(&self, _system: &str, _user: &str) -> Result<String> {
            Err(RulebookError::CompletionUnavailable {
                details: "down".to_string(),
            })
        }
    }

    fn chunk(id: &str, key: Option<&str>, scope: ScopeLevel, jurisdiction: Option<&str>, text: &str) -> Chunk {
        Chunk {
            chunk_id: id.to_string(),
            scope_level: scope,
            jurisdiction_id: jurisdiction.map(|j| j.to_string()),
            canonical_rule_key: key.map(|k| k.to_string()),
            display_rule_number: key.map(|k| k.to_string()),
            title: None,
            page_start: 12,
            page_end: 13,
            source_document_path: "docs/rulebook.pdf".to_string(),
            text: text.to_string(),
            language: Language::Primary,
        }
    }

    async fn storage() -> (Arc<StorageManager>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let manager = StorageManager::new(StorageConfig {
            db_path: dir.path().join("test.db"),
            enable_compression: false,
        })
        .await
        .unwrap();
        (Arc::new(manager), dir)
    }

    async fn seeded_index(chunks: &[Chunk]) -> Arc<MemorySearchIndex> {
        let index = Arc::new(MemorySearchIndex::new());
        let documents: Vec<IndexDocument> = chunks
            .iter()
            .map(|c| IndexDocument::from_chunk(c, "2025"))
            .collect();
        index.upsert_chunks(&documents).await.unwrap();
        index
    }

    fn answerer(
        index: Arc<MemorySearchIndex>,
        completion: Option<Arc<dyn CompletionClient>>,
        storage: Arc<StorageManager>,
    ) -> GroundedAnswerer {
        GroundedAnswerer::new(AnswerConfig {
            min_relevance_score: 0.5,
            retrieval_multiplier: 3,
            default_max_context: 5,
            excerpt_chars: 400,
        }, index, completion, storage)
    }

    #[tokio::test]
    async fn unanswerable_question_returns_not_found_with_no_citations() {
        let (store, _dir) = storage().await;
        let index = seeded_index(&[chunk(
            "a",
            Some("6.01"),
            ScopeLevel::National,
            None,
            "interference by a runner",
        )])
        .await;

        let answerer = answerer(index, None, store);
        let answer = answerer
            .answer("helmet sticker colors", "2025", None, 5, false)
            .await
            .unwrap();

        assert_eq!(answer.status, AnswerStatus::NotFound);
        assert!(answer.citations.is_empty());
        assert_eq!(answer.answer_text, NOT_FOUND_TEXT);
        assert_eq!(answer.query, "helmet sticker colors");
        assert_eq!(answer.context_used, 0);
    }

    #[tokio::test]
    async fn every_context_chunk_yields_exactly_one_citation() {
        let (store, _dir) = storage().await;
        let index = seeded_index(&[
            chunk("a", Some("6.01"), ScopeLevel::National, None, "pitch clock violation rules"),
            chunk("b", Some("7.02"), ScopeLevel::National, None, "pitch clock reset procedure"),
        ])
        .await;

        let answerer = answerer(index, None, store);
        let answer = answerer
            .answer("pitch clock", "2025", None, 5, false)
            .await
            .unwrap();

        assert_eq!(answer.citations.len(), 2);
        assert_eq!(answer.context_used, 2);
        assert_eq!(answer.total_retrieved, 2);
        let ids: Vec<&str> = answer.citations.iter().map(|c| c.chunk_id.as_str()).collect();
        assert!(ids.contains(&"a"));
        assert!(ids.contains(&"b"));
    }

    #[tokio::test]
    async fn keyless_hits_fill_slots_after_keyed_groups() {
        let (store, _dir) = storage().await;
        let index = seeded_index(&[
            chunk("keyless", None, ScopeLevel::National, None, "pitch clock notes"),
            chunk("keyed", Some("6.01"), ScopeLevel::National, None, "pitch clock rule text"),
        ])
        .await;

        let answerer = answerer(index, None, store);
        let answer = answerer
            .answer("pitch clock", "2025", None, 5, false)
            .await
            .unwrap();

        assert_eq!(answer.citations.len(), 2);
        assert_eq!(answer.citations[0].chunk_id, "keyed");
        assert_eq!(answer.citations[1].chunk_id, "keyless");
    }

    #[tokio::test]
    async fn regional_version_is_cited_over_provincial() {
        let (store, _dir) = storage().await;
        let index = seeded_index(&[
            chunk("prov", Some("6.01"), ScopeLevel::Provincial, None, "mound visit limit five"),
            chunk("reg", Some("6.01"), ScopeLevel::Regional, Some("ABC"), "mound visit limit four"),
        ])
        .await;

        let answerer = answerer(index, None, store);
        let answer = answerer
            .answer("mound visit limit", "2025", Some("ABC"), 5, true)
            .await
            .unwrap();

        assert_eq!(answer.citations.len(), 1);
        assert_eq!(answer.citations[0].chunk_id, "reg");
        assert_eq!(answer.alternates.len(), 1);
        assert_eq!(answer.alternates[0].chunk_id, "prov");
    }

    #[tokio::test]
    async fn alternates_are_omitted_unless_requested() {
        let (store, _dir) = storage().await;
        let index = seeded_index(&[
            chunk("prov", Some("6.01"), ScopeLevel::Provincial, None, "mound visit limit five"),
            chunk("reg", Some("6.01"), ScopeLevel::Regional, Some("ABC"), "mound visit limit four"),
        ])
        .await;

        let answerer = answerer(index, None, store);
        let answer = answerer
            .answer("mound visit limit", "2025", Some("ABC"), 5, false)
            .await
            .unwrap();

        assert!(answer.alternates.is_empty());
    }

    #[tokio::test]
    async fn without_completion_service_the_template_cites_the_primary() {
        let (store, _dir) = storage().await;
        let index = seeded_index(&[chunk(
            "a",
            Some("6.01"),
            ScopeLevel::National,
            None,
            "interference shall be called when a runner obstructs a fielder",
        )])
        .await;

        let answerer = answerer(index, None, store);
        let answer = answerer
            .answer("interference", "2025", None, 5, false)
            .await
            .unwrap();

        assert_eq!(answer.status, AnswerStatus::Fallback);
        assert!(answer.answer_text.contains("6.01"));
        assert!(answer.answer_text.contains("interference shall be called"));
    }

    #[tokio::test]
    async fn completion_outage_degrades_to_fallback_not_error() {
        let (store, _dir) = storage().await;
        let index = seeded_index(&[chunk(
            "a",
            Some("6.01"),
            ScopeLevel::National,
            None,
            "interference provisions",
        )])
        .await;

        let answerer = answerer(index, Some(Arc::new(BrokenCompletion)), store);
        let answer = answerer
            .answer("interference", "2025", None, 5, false)
            .await
            .unwrap();

        assert_eq!(answer.status, AnswerStatus::Fallback);
        assert_eq!(answer.citations.len(), 1);
    }

    #[tokio::test]
    async fn ungrounded_completion_is_replaced_by_the_template() {
        let (store, _dir) = storage().await;
        let index = seeded_index(&[chunk(
            "a",
            Some("6.01"),
            ScopeLevel::National,
            None,
            "interference provisions",
        )])
        .await;

        let completion = CannedCompletion("Rules generally frown on that.".to_string());
        let answerer = answerer(index, Some(Arc::new(completion)), store);
        let answer = answerer
            .answer("interference", "2025", None, 5, false)
            .await
            .unwrap();

        assert_eq!(answer.status, AnswerStatus::Fallback);
        assert!(answer.answer_text.contains("6.01"));
    }

    #[tokio::test]
    async fn completion_referencing_an_uncited_rule_is_replaced() {
        let (store, _dir) = storage().await;
        let index = seeded_index(&[chunk(
            "a",
            Some("6.01"),
            ScopeLevel::National,
            None,
            "interference provisions",
        )])
        .await;

        let completion = CannedCompletion("Per rule 9.99 this is allowed [1].".to_string());
        let answerer = answerer(index, Some(Arc::new(completion)), store);
        let answer = answerer
            .answer("interference", "2025", None, 5, false)
            .await
            .unwrap();

        assert_eq!(answer.status, AnswerStatus::Fallback);
        assert!(!answer.answer_text.contains("9.99"));
    }

    #[tokio::test]
    async fn grounded_completion_is_returned_as_answered() {
        let (store, _dir) = storage().await;
        let index = seeded_index(&[chunk(
            "a",
            Some("6.01"),
            ScopeLevel::National,
            None,
            "interference provisions",
        )])
        .await;

        let completion = CannedCompletion("Interference is covered by rule 6.01 [1].".to_string());
        let answerer = answerer(index, Some(Arc::new(completion)), store);
        let answer = answerer
            .answer("interference", "2025", None, 5, false)
            .await
            .unwrap();

        assert_eq!(answer.status, AnswerStatus::Answered);
        assert!(answer.answer_text.contains("[1]"));
    }

    #[tokio::test]
    async fn confirmed_override_changes_the_cited_chunk() {
        let (store, _dir) = storage().await;
        let chunks = [
            chunk("reg", Some("6.01"), ScopeLevel::Regional, Some("ABC"), "mound visit limit four"),
            chunk("nat", Some("6.01"), ScopeLevel::National, None, "mound visit limit five"),
        ];
        let index = seeded_index(&chunks).await;

        let mut mapping = OverrideMapping::from_proposal(
            OverrideProposal {
                source_rule_key: "6.01".to_string(),
                source_chunk_id: "nat".to_string(),
                source_scope: ScopeLevel::National,
                target_rule_key: "6.01".to_string(),
                target_chunk_id: "reg".to_string(),
                target_scope: ScopeLevel::Regional,
                confidence: 0.8,
                detection_reason: "explicit phrase 'replaces rule'".to_string(),
            },
            "2025",
            Some("ABC"),
        );
        mapping.status = OverrideStatus::Confirmed;
        store.store_mappings(&[mapping]).await.unwrap();

        let answerer = answerer(index, None, store);
        let answer = answerer
            .answer("mound visit limit", "2025", Some("ABC"), 5, false)
            .await
            .unwrap();

        assert_eq!(answer.citations[0].chunk_id, "nat");
    }
}
