//! # Document Ingestion Module
//!
//! ## Purpose
//! Runs the per-document ingestion pipeline: extract text from a rulebook
//! PDF, chunk it along rule boundaries, persist the chunks, push their
//! projections into the search index, and propose cross-jurisdiction
//! overrides for review.
//!
//! ## Input/Output Specification
//! - **Input**: `IngestionJob` messages naming one document and its context
//! - **Output**: `JobRecord` tracing the job through its lifecycle
//! - **Lifecycle**: Queued -> InProgress -> Completed | Failed
//!
//! ## Failure Semantics
//! - Extraction or chunking failure fails the job; no partial chunks are
//!   persisted or indexed
//! - An index upsert failure is logged and the job still completes; the
//!   durable store holds the chunks and a later re-ingestion repairs the
//!   index because upserts are idempotent
//! - Override detection is advisory; its failures never affect job state

use crate::chunker::{Chunker, DocumentContext};
use crate::errors::{Result, RulebookError};
use crate::extraction::TextExtractor;
use crate::overrides::{OverrideDetector, OverrideMapping};
use crate::search_index::{IndexDocument, SearchIndex};
use crate::storage::StorageManager;
use crate::{Language, Page, ScopeLevel};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// One document to ingest, with the context every chunk inherits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionJob {
    pub job_id: Uuid,
    pub season_id: String,
    /// Required when `scope_level` is Regional
    pub jurisdiction_id: Option<String>,
    /// Document family, e.g. "rulebook" or "supplement"
    pub document_type: String,
    pub scope_level: ScopeLevel,
    pub language: Language,
    pub source_document_path: String,
}

impl IngestionJob {
    pub fn new(
        season_id: &str,
        jurisdiction_id: Option<&str>,
        document_type: &str,
        scope_level: ScopeLevel,
        language: Language,
        source_document_path: &str,
    ) -> Self {
        Self {
            job_id: Uuid::new_v4(),
            season_id: season_id.to_string(),
            jurisdiction_id: jurisdiction_id.map(|j| j.to_string()),
            document_type: document_type.to_string(),
            scope_level,
            language,
            source_document_path: source_document_path.to_string(),
        }
    }

    /// Reject jobs that cannot produce valid chunks.
    pub fn validate(&self) -> Result<()> {
        if self.season_id.trim().is_empty() {
            return Err(crate::validation_error!("season_id", "Season is required"));
        }
        if self.scope_level == ScopeLevel::Regional && self.jurisdiction_id.is_none() {
            return Err(crate::validation_error!(
                "jurisdiction_id",
                "Regional documents require a jurisdiction"
            ));
        }
        Ok(())
    }

    fn document_context(&self) -> DocumentContext {
        DocumentContext {
            season_id: self.season_id.clone(),
            jurisdiction_id: self.jurisdiction_id.clone(),
            document_type: self.document_type.clone(),
            scope_level: self.scope_level,
            language: self.language,
            source_document_path: self.source_document_path.clone(),
        }
    }
}

/// Lifecycle state of an ingestion job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobState {
    Queued,
    InProgress,
    Completed,
    Failed,
}

/// Persisted trace of one job through the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub job: IngestionJob,
    pub state: JobState,
    /// Chunks produced; zero until the job completes
    pub chunk_count: usize,
    /// Failure description when `state` is Failed
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobRecord {
    fn queued(job: IngestionJob) -> Self {
        let now = Utc::now();
        Self {
            job,
            state: JobState::Queued,
            chunk_count: 0,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn transition(&mut self, state: JobState) {
        self.state = state;
        self.updated_at = Utc::now();
    }
}

/// Source of per-page text for a job, abstracted so the pipeline is testable
/// without real PDF fixtures.
pub trait PageSource: Send + Sync {
    fn extract_pages(&self, bytes: &[u8], source_path: &str) -> Result<Vec<Page>>;
}

impl PageSource for TextExtractor {
    fn extract_pages(&self, bytes: &[u8], source_path: &str) -> Result<Vec<Page>> {
        TextExtractor::extract_pages(self, bytes, source_path)
    }
}

/// Executes ingestion jobs one document at a time.
///
/// Documents are independent, so callers may run one worker per document
/// concurrently; all cross-document coordination happens through idempotent
/// storage and index writes.
pub struct IngestionWorker {
    extractor: Arc<dyn PageSource>,
    chunker: Chunker,
    detector: OverrideDetector,
    index: Arc<dyn SearchIndex>,
    storage: Arc<StorageManager>,
}

impl IngestionWorker {
    pub fn new(
        extractor: Arc<dyn PageSource>,
        chunker: Chunker,
        index: Arc<dyn SearchIndex>,
        storage: Arc<StorageManager>,
    ) -> Self {
        Self {
            extractor,
            chunker,
            detector: OverrideDetector::new(),
            index,
            storage,
        }
    }

    /// Run one job to a terminal state and return its record.
    ///
    /// Pipeline failures are captured in the record rather than returned;
    /// an `Err` from this method means the record itself could not be
    /// persisted.
    pub async fn run_job(&self, job: IngestionJob) -> Result<JobRecord> {
        if let Err(e) = job.validate() {
            let mut record = JobRecord::queued(job);
            record.error = Some(e.to_string());
            record.transition(JobState::Failed);
            self.storage.store_job(&record).await?;
            return Ok(record);
        }

        let mut record = JobRecord::queued(job);
        self.storage.store_job(&record).await?;

        record.transition(JobState::InProgress);
        self.storage.store_job(&record).await?;

        match self.process(&record.job).await {
            Ok(chunk_count) => {
                record.chunk_count = chunk_count;
                record.transition(JobState::Completed);
                tracing::info!(
                    job_id = %record.job.job_id,
                    chunks = chunk_count,
                    path = %record.job.source_document_path,
                    "Ingestion job completed"
                );
            }
            Err(e) => {
                record.error = Some(e.to_string());
                record.transition(JobState::Failed);
                tracing::error!(
                    job_id = %record.job.job_id,
                    path = %record.job.source_document_path,
                    "Ingestion job failed: {}",
                    e
                );
            }
        }

        self.storage.store_job(&record).await?;
        Ok(record)
    }

    /// Run a batch of jobs concurrently. Documents are independent, so the
    /// batch needs no coordination beyond idempotent writes; records come
    /// back in input order.
    pub async fn run_jobs(&self, jobs: Vec<IngestionJob>) -> Vec<Result<JobRecord>> {
        futures::future::join_all(jobs.into_iter().map(|job| self.run_job(job))).await
    }

    /// The fallible middle of the pipeline; any error fails the whole job
    /// before chunks are persisted.
    async fn process(&self, job: &IngestionJob) -> Result<usize> {
        let timer = crate::utils::Timer::new(format!("ingest {}", job.source_document_path));
        let bytes = tokio::fs::read(&job.source_document_path)
            .await
            .map_err(|e| RulebookError::ExtractionFailed {
                path: job.source_document_path.clone(),
                details: format!("failed to read document: {}", e),
            })?;

        let pages = self
            .extractor
            .extract_pages(&bytes, &job.source_document_path)?;
        let chunks = self.chunker.chunk(&pages, &job.document_context())?;

        self.storage.store_chunks(&chunks).await?;
        self.storage.store_job_chunks(&job.job_id, &chunks).await?;

        let documents: Vec<IndexDocument> = chunks
            .iter()
            .map(|chunk| IndexDocument::from_chunk(chunk, &job.season_id))
            .collect();

        // The store is already consistent at this point; an index failure is
        // repairable by re-running the job, so it does not fail it.
        if let Err(e) = self.index.upsert_chunks(&documents).await {
            tracing::warn!(
                job_id = %job.job_id,
                "Index upsert failed, chunks remain persisted: {}",
                e
            );
        }

        self.propose_overrides(job, &chunks).await;

        timer.stop();
        Ok(chunks.len())
    }

    /// Detect and persist override proposals. Advisory only.
    async fn propose_overrides(&self, job: &IngestionJob, chunks: &[crate::Chunk]) {
        let proposals = self.detector.detect(chunks);
        if proposals.is_empty() {
            return;
        }

        let mappings: Vec<OverrideMapping> = proposals
            .into_iter()
            .map(|p| {
                OverrideMapping::from_proposal(p, &job.season_id, job.jurisdiction_id.as_deref())
            })
            .collect();

        match self.storage.store_mappings(&mappings).await {
            Ok(()) => tracing::info!(
                job_id = %job.job_id,
                proposals = mappings.len(),
                "Stored override proposals for review"
            ),
            Err(e) => tracing::warn!(
                job_id = %job.job_id,
                "Failed to persist override proposals: {}",
                e
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ChunkerConfig, StorageConfig};
    use crate::search_index::{IndexDocument, MemorySearchIndex, SearchRequest};

    struct FixedPages(Vec<Page>);

    impl PageSource for FixedPages {
        fn extract_pages(&self, _bytes: &[u8], _source_path: &str) -> Result<Vec<Page>> {
            Ok(self.0.clone())
        }
    }

    struct BrokenIndex;

    #[async_trait::async_trait]
    impl crate::search_index::SearchIndex for BrokenIndex {
        async fn upsert_chunks(&self, _documents: &[IndexDocument]) -> Result<()> {
            Err(RulebookError::SearchIndex {
                details: "index down".to_string(),
            })
        }

        async fn query(&self, _request: &SearchRequest) -> Result<Vec<crate::SearchHit>> {
            Ok(Vec::new())
        }
    }

    struct FailingExtractor;

    impl PageSource for FailingExtractor {
        fn extract_pages(&self, _bytes: &[u8], source_path: &str) -> Result<Vec<Page>> {
            Err(RulebookError::ExtractionFailed {
                path: source_path.to_string(),
                details: "unreadable".to_string(),
            })
        }
    }

    fn rulebook_page() -> Page {
        let body = "Any runner is out when they interfere with a fielder \
                    attempting to make a play on a batted ball in fair territory. \
                    The umpire shall call time immediately and award bases as the \
                    interference warrants under this section of the code. "
            .repeat(2);
        Page {
            page_number: 1,
            text: format!("6.01 - Interference\n{}", body),
        }
    }

    async fn worker_with(
        extractor: Arc<dyn PageSource>,
    ) -> (IngestionWorker, Arc<StorageManager>, Arc<MemorySearchIndex>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(
            StorageManager::new(StorageConfig {
                db_path: dir.path().join("test.db"),
                enable_compression: false,
            })
            .await
            .unwrap(),
        );
        let index = Arc::new(MemorySearchIndex::new());
        let chunker = Chunker::new(ChunkerConfig {
            min_chunk_size: 100,
            target_chunk_size: 2500,
            max_chunk_size: 4000,
        })
        .unwrap();
        let worker = IngestionWorker::new(extractor, chunker, index.clone(), storage.clone());
        (worker, storage, index, dir)
    }

    fn job_for(dir: &tempfile::TempDir, scope: ScopeLevel, jurisdiction: Option<&str>) -> IngestionJob {
        let path = dir.path().join("rulebook.pdf");
        std::fs::write(&path, b"placeholder bytes").unwrap();
        IngestionJob::new(
            "2025",
            jurisdiction,
            "rulebook",
            scope,
            Language::Primary,
            path.to_str().unwrap(),
        )
    }

    #[tokio::test]
    async fn completed_job_persists_and_indexes_chunks() {
        let (worker, storage, index, dir) =
            worker_with(Arc::new(FixedPages(vec![rulebook_page()]))).await;
        let job = job_for(&dir, ScopeLevel::National, None);
        let job_id = job.job_id;

        let record = worker.run_job(job).await.unwrap();
        assert_eq!(record.state, JobState::Completed);
        assert!(record.chunk_count > 0);
        assert!(record.error.is_none());

        let stored = storage.get_job(&job_id).await.unwrap().unwrap();
        assert_eq!(stored.state, JobState::Completed);

        let hits = index
            .query(&SearchRequest {
                query_text: "interference".to_string(),
                season_id: "2025".to_string(),
                jurisdiction_id: None,
                scope_level: None,
                limit: 10,
            })
            .await
            .unwrap();
        assert!(!hits.is_empty());

        let chunk_id = &hits[0].chunk.chunk_id;
        assert!(storage.get_chunk(chunk_id).await.unwrap().is_some());

        let job_chunks = storage.get_job_chunks(&job_id).await.unwrap().unwrap();
        assert_eq!(job_chunks.len(), record.chunk_count);
    }

    #[tokio::test]
    async fn index_outage_completes_the_job_with_inspectable_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(
            StorageManager::new(crate::config::StorageConfig {
                db_path: dir.path().join("test.db"),
                enable_compression: false,
            })
            .await
            .unwrap(),
        );
        let chunker = Chunker::new(crate::config::ChunkerConfig {
            min_chunk_size: 100,
            target_chunk_size: 2500,
            max_chunk_size: 4000,
        })
        .unwrap();
        let worker = IngestionWorker::new(
            Arc::new(FixedPages(vec![rulebook_page()])),
            chunker,
            Arc::new(BrokenIndex),
            storage.clone(),
        );

        let job = job_for(&dir, ScopeLevel::National, None);
        let job_id = job.job_id;
        let record = worker.run_job(job).await.unwrap();

        assert_eq!(record.state, JobState::Completed);
        assert!(record.chunk_count > 0);

        let job_chunks = storage.get_job_chunks(&job_id).await.unwrap().unwrap();
        assert_eq!(job_chunks.len(), record.chunk_count);
    }

    #[tokio::test]
    async fn extraction_failure_fails_the_job_with_no_chunks() {
        let (worker, storage, index, dir) = worker_with(Arc::new(FailingExtractor)).await;
        let job = job_for(&dir, ScopeLevel::National, None);
        let job_id = job.job_id;

        let record = worker.run_job(job).await.unwrap();
        assert_eq!(record.state, JobState::Failed);
        assert_eq!(record.chunk_count, 0);
        assert!(record.error.as_deref().unwrap().contains("unreadable"));

        let stored = storage.get_job(&job_id).await.unwrap().unwrap();
        assert_eq!(stored.state, JobState::Failed);

        let hits = index
            .query(&SearchRequest {
                query_text: "interference".to_string(),
                season_id: "2025".to_string(),
                jurisdiction_id: None,
                scope_level: None,
                limit: 10,
            })
            .await
            .unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn regional_job_without_jurisdiction_fails_validation() {
        let (worker, _storage, _index, dir) =
            worker_with(Arc::new(FixedPages(vec![rulebook_page()]))).await;
        let job = job_for(&dir, ScopeLevel::Regional, None);

        let record = worker.run_job(job).await.unwrap();
        assert_eq!(record.state, JobState::Failed);
        assert!(record.error.as_deref().unwrap().contains("jurisdiction"));
    }

    #[tokio::test]
    async fn missing_document_fails_the_job() {
        let (worker, _storage, _index, dir) =
            worker_with(Arc::new(FixedPages(vec![rulebook_page()]))).await;
        let mut job = job_for(&dir, ScopeLevel::National, None);
        job.source_document_path = dir.path().join("absent.pdf").to_string_lossy().to_string();

        let record = worker.run_job(job).await.unwrap();
        assert_eq!(record.state, JobState::Failed);
    }

    #[tokio::test]
    async fn rerunning_a_job_converges_instead_of_duplicating() {
        let (worker, _storage, index, dir) =
            worker_with(Arc::new(FixedPages(vec![rulebook_page()]))).await;

        let first = worker.run_job(job_for(&dir, ScopeLevel::National, None)).await.unwrap();
        let second = worker.run_job(job_for(&dir, ScopeLevel::National, None)).await.unwrap();
        assert_eq!(first.chunk_count, second.chunk_count);

        let hits = index
            .query(&SearchRequest {
                query_text: "interference".to_string(),
                season_id: "2025".to_string(),
                jurisdiction_id: None,
                scope_level: None,
                limit: 50,
            })
            .await
            .unwrap();
        assert_eq!(hits.len(), first.chunk_count);
    }
}
