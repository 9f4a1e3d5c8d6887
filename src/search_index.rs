//! # Search Index Client Module
//!
//! ## Purpose
//! Client abstraction over the external full-text search service. Ingestion
//! pushes chunk projections into the index; retrieval runs filtered queries
//! and gets back scored hits.
//!
//! ## Input/Output Specification
//! - **Input**: Chunk projections for upsert; validated `SearchRequest` for
//!   queries
//! - **Output**: `SearchHit` lists with service-assigned relevance scores
//! - **Isolation**: Every query is constrained to one season; jurisdiction
//!   filters match either the queried jurisdiction or unscoped content
//!
//! ## Key Features
//! - `SearchIndex` trait so retrieval and ingestion never depend on a
//!   concrete backend
//! - HTTP implementation with bearer authentication and request timeouts
//! - In-memory implementation with token-overlap scoring for tests and
//!   local development

use crate::config::SearchIndexConfig;
use crate::errors::{Result, RulebookError};
use crate::{Chunk, ScopeLevel, SearchHit};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// The projection of a chunk that lives in the search index.
///
/// Upserts are idempotent: the document id is the chunk id, so re-ingesting
/// the same document replaces rather than duplicates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexDocument {
    pub chunk_id: String,
    pub season_id: String,
    /// Scope level as a filterable string ("National", "Provincial", "Regional")
    pub scope: String,
    pub jurisdiction_id: Option<String>,
    pub canonical_rule_key: Option<String>,
    pub display_rule_number: Option<String>,
    pub title: Option<String>,
    pub page_start: u32,
    pub page_end: u32,
    pub source_document_path: String,
    pub text: String,
    pub text_length: usize,
    pub language: crate::Language,
}

impl IndexDocument {
    pub fn from_chunk(chunk: &Chunk, season_id: &str) -> Self {
        Self {
            chunk_id: chunk.chunk_id.clone(),
            season_id: season_id.to_string(),
            scope: chunk.scope_level.as_str().to_string(),
            jurisdiction_id: chunk.jurisdiction_id.clone(),
            canonical_rule_key: chunk.canonical_rule_key.clone(),
            display_rule_number: chunk.display_rule_number.clone(),
            title: chunk.title.clone(),
            page_start: chunk.page_start,
            page_end: chunk.page_end,
            source_document_path: chunk.source_document_path.clone(),
            text: chunk.text.clone(),
            text_length: chunk.text.chars().count(),
            language: chunk.language,
        }
    }

    /// Rebuild the chunk carried inside an index hit.
    pub fn into_hit(self, score: f32) -> Result<SearchHit> {
        let scope_level = match self.scope.as_str() {
            "National" => ScopeLevel::National,
            "Provincial" => ScopeLevel::Provincial,
            "Regional" => ScopeLevel::Regional,
            other => {
                return Err(RulebookError::SearchIndex {
                    details: format!("index returned unknown scope '{}'", other),
                })
            }
        };

        Ok(SearchHit {
            chunk: Chunk {
                chunk_id: self.chunk_id,
                scope_level,
                jurisdiction_id: self.jurisdiction_id.clone(),
                canonical_rule_key: self.canonical_rule_key,
                display_rule_number: self.display_rule_number,
                title: self.title,
                page_start: self.page_start,
                page_end: self.page_end,
                source_document_path: self.source_document_path,
                text: self.text,
                language: self.language,
            },
            score,
            season_id: self.season_id,
            jurisdiction_id: self.jurisdiction_id,
        })
    }
}

/// A validated query against the index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchRequest {
    pub query_text: String,
    /// Season partition; every query is confined to exactly one season
    pub season_id: String,
    /// Jurisdiction context; hits must match it or carry no jurisdiction
    pub jurisdiction_id: Option<String>,
    /// Optional scope restriction
    pub scope_level: Option<ScopeLevel>,
    pub limit: usize,
}

impl SearchRequest {
    /// Reject malformed requests before they reach the service.
    pub fn validate(&self) -> Result<()> {
        if self.query_text.trim().is_empty() {
            return Err(crate::validation_error!(
                "query_text",
                "Query text cannot be empty"
            ));
        }
        if self.season_id.trim().is_empty() {
            return Err(crate::validation_error!(
                "season_id",
                "Season is required on every query"
            ));
        }
        if self.limit == 0 {
            return Err(crate::validation_error!(
                "limit",
                "Result limit must be at least 1"
            ));
        }
        // A regional-only query with no jurisdiction would match nothing
        // meaningful; surface the contradiction instead of running it.
        if self.scope_level == Some(ScopeLevel::Regional) && self.jurisdiction_id.is_none() {
            return Err(crate::validation_error!(
                "scope_level",
                "Regional scope filter requires a jurisdiction"
            ));
        }
        Ok(())
    }
}

/// Backend-agnostic search index interface.
#[async_trait]
pub trait SearchIndex: Send + Sync {
    /// Insert or replace documents, keyed by chunk id.
    async fn upsert_chunks(&self, documents: &[IndexDocument]) -> Result<()>;

    /// Run a validated query and return scored hits, best first.
    async fn query(&self, request: &SearchRequest) -> Result<Vec<SearchHit>>;
}

/// HTTP client for the external search service.
pub struct HttpSearchIndex {
    config: SearchIndexConfig,
    client: Client,
}

#[derive(Debug, Serialize)]
struct UpsertRequestBody<'a> {
    documents: &'a [IndexDocument],
}

#[derive(Debug, Serialize)]
struct QueryRequestBody<'a> {
    query: &'a str,
    filters: QueryFilters<'a>,
    limit: usize,
}

#[derive(Debug, Serialize)]
struct QueryFilters<'a> {
    season_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    jurisdiction_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    scope: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct QueryResponseBody {
    hits: Vec<QueryResponseHit>,
}

#[derive(Debug, Deserialize)]
struct QueryResponseHit {
    score: f32,
    #[serde(flatten)]
    document: IndexDocument,
}

impl HttpSearchIndex {
    pub fn new(config: SearchIndexConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;
        Ok(Self { config, client })
    }

    fn endpoint(&self, suffix: &str) -> String {
        format!(
            "{}/indexes/{}/{}",
            self.config.base_url.trim_end_matches('/'),
            self.config.index_name,
            suffix
        )
    }

    fn with_auth(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.config.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }
}

#[async_trait]
impl SearchIndex for HttpSearchIndex {
    async fn upsert_chunks(&self, documents: &[IndexDocument]) -> Result<()> {
        if documents.is_empty() {
            return Ok(());
        }

        let response = self
            .with_auth(self.client.post(self.endpoint("documents")))
            .json(&UpsertRequestBody { documents })
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(RulebookError::SearchIndex {
                details: format!("upsert failed with status {}: {}", status, body),
            });
        }

        tracing::debug!(documents = documents.len(), "Upserted chunks into index");
        Ok(())
    }

    async fn query(&self, request: &SearchRequest) -> Result<Vec<SearchHit>> {
        request.validate()?;

        let body = QueryRequestBody {
            query: &request.query_text,
            filters: QueryFilters {
                season_id: &request.season_id,
                jurisdiction_id: request.jurisdiction_id.as_deref(),
                scope: request.scope_level.map(|s| s.as_str()),
            },
            limit: request.limit,
        };

        let response = self
            .with_auth(self.client.post(self.endpoint("search")))
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(RulebookError::SearchIndex {
                details: format!("query failed with status {}: {}", status, body),
            });
        }

        let parsed: QueryResponseBody = response.json().await?;
        let mut hits = Vec::with_capacity(parsed.hits.len());
        for hit in parsed.hits {
            hits.push(hit.document.into_hit(hit.score)?);
        }

        tracing::debug!(hits = hits.len(), "Search index query completed");
        Ok(hits)
    }
}

/// In-process index with token-overlap scoring.
///
/// Used by the test suite and for local development without a running search
/// service. Filter semantics match the HTTP backend: season partition is
/// strict, jurisdiction matches the request or is absent.
#[derive(Default)]
pub struct MemorySearchIndex {
    documents: tokio::sync::RwLock<Vec<IndexDocument>>,
}

impl MemorySearchIndex {
    pub fn new() -> Self {
        Self::default()
    }

    fn score(query_tokens: &[String], text: &str) -> f32 {
        if query_tokens.is_empty() {
            return 0.0;
        }
        let haystack = text.to_lowercase();
        let matched = query_tokens
            .iter()
            .filter(|token| haystack.contains(token.as_str()))
            .count();
        matched as f32 / query_tokens.len() as f32
    }
}

#[async_trait]
impl SearchIndex for MemorySearchIndex {
    async fn upsert_chunks(&self, documents: &[IndexDocument]) -> Result<()> {
        let mut store = self.documents.write().await;
        for document in documents {
            store.retain(|existing| existing.chunk_id != document.chunk_id);
            store.push(document.clone());
        }
        Ok(())
    }

    async fn query(&self, request: &SearchRequest) -> Result<Vec<SearchHit>> {
        request.validate()?;

        let query_tokens: Vec<String> = request
            .query_text
            .to_lowercase()
            .split_whitespace()
            .map(|t| t.to_string())
            .collect();

        let store = self.documents.read().await;
        let mut hits = Vec::new();

        for document in store.iter() {
            if document.season_id != request.season_id {
                continue;
            }
            if let Some(jurisdiction) = &document.jurisdiction_id {
                if request.jurisdiction_id.as_deref() != Some(jurisdiction.as_str()) {
                    continue;
                }
            }
            if let Some(scope) = request.scope_level {
                if document.scope != scope.as_str() {
                    continue;
                }
            }

            let score = Self::score(&query_tokens, &document.text);
            if score > 0.0 {
                hits.push(document.clone().into_hit(score)?);
            }
        }

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.chunk.chunk_id.cmp(&b.chunk.chunk_id))
        });
        hits.truncate(request.limit);
        Ok(hits)
    }
}
