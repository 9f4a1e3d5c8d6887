//! # Storage Management Module
//!
//! ## Purpose
//! Persistent storage for chunk blobs, ingestion job records, and override
//! mappings using an embedded database. The search index holds the queryable
//! projection; this store holds the durable source of truth.
//!
//! ## Input/Output Specification
//! - **Input**: Chunks, job records, override mappings
//! - **Output**: Durable reads and writes, prefix scans per season partition
//! - **Storage**: Sled embedded database, one tree per record family
//!
//! ## Key Features
//! - Chunk blobs keyed by chunk id, so re-ingestion overwrites in place
//! - Override mappings partitioned by `season:jurisdiction`, review state
//!   transitions enforced at the storage boundary
//! - Optional gzip compression of chunk blobs
//! - Job records for ingestion status tracking

use crate::config::StorageConfig;
use crate::errors::{Result, RulebookError};
use crate::ingestion::JobRecord;
use crate::overrides::{partition_key, OverrideMapping, OverrideStatus};
use crate::Chunk;
use std::sync::Arc;
use uuid::Uuid;

/// Main storage manager
pub struct StorageManager {
    config: StorageConfig,
    db: Arc<sled::Db>,
    chunk_tree: Arc<sled::Tree>,
    job_tree: Arc<sled::Tree>,
    job_chunks_tree: Arc<sled::Tree>,
    mapping_tree: Arc<sled::Tree>,
}

impl StorageManager {
    /// Open the database and its trees, creating the directory if needed.
    pub async fn new(config: StorageConfig) -> Result<Self> {
        if let Some(parent) = config.db_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let db = sled::open(&config.db_path)?;
        let chunk_tree = db.open_tree("chunks")?;
        let job_tree = db.open_tree("ingestion_jobs")?;
        let job_chunks_tree = db.open_tree("job_chunks")?;
        let mapping_tree = db.open_tree("override_mappings")?;

        tracing::info!(
            path = %config.db_path.display(),
            chunks = chunk_tree.len(),
            "Storage manager initialized"
        );

        Ok(Self {
            config,
            db: Arc::new(db),
            chunk_tree: Arc::new(chunk_tree),
            job_tree: Arc::new(job_tree),
            job_chunks_tree: Arc::new(job_chunks_tree),
            mapping_tree: Arc::new(mapping_tree),
        })
    }

    /// Store chunk blobs keyed by chunk id.
    ///
    /// Chunk ids are content-derived, so re-ingesting an unchanged document
    /// writes the same keys and the store converges instead of growing.
    pub async fn store_chunks(&self, chunks: &[Chunk]) -> Result<()> {
        for chunk in chunks {
            let blob = bincode::serialize(chunk)?;
            let data = if self.config.enable_compression {
                compress(&blob)?
            } else {
                blob
            };
            self.chunk_tree.insert(chunk.chunk_id.as_bytes(), data)?;
        }

        self.db.flush_async().await?;
        tracing::debug!(chunks = chunks.len(), "Stored chunk blobs");
        Ok(())
    }

    /// Retrieve a chunk blob by id.
    pub async fn get_chunk(&self, chunk_id: &str) -> Result<Option<Chunk>> {
        let Some(data) = self.chunk_tree.get(chunk_id.as_bytes())? else {
            return Ok(None);
        };

        let blob = if self.config.enable_compression {
            decompress(&data)?
        } else {
            data.to_vec()
        };

        Ok(Some(bincode::deserialize(&blob)?))
    }

    /// Persist the complete chunk list a job produced, keyed by job id.
    ///
    /// This blob is what makes a completed job's output inspectable even when
    /// the index upsert failed; individual chunk blobs stay keyed by chunk id.
    pub async fn store_job_chunks(&self, job_id: &Uuid, chunks: &[Chunk]) -> Result<()> {
        let blob = bincode::serialize(chunks)?;
        let data = if self.config.enable_compression {
            compress(&blob)?
        } else {
            blob
        };
        self.job_chunks_tree.insert(job_id.as_bytes(), data)?;
        self.db.flush_async().await?;
        Ok(())
    }

    /// Retrieve the chunk list a job produced.
    pub async fn get_job_chunks(&self, job_id: &Uuid) -> Result<Option<Vec<Chunk>>> {
        let Some(data) = self.job_chunks_tree.get(job_id.as_bytes())? else {
            return Ok(None);
        };

        let blob = if self.config.enable_compression {
            decompress(&data)?
        } else {
            data.to_vec()
        };

        Ok(Some(bincode::deserialize(&blob)?))
    }

    /// Persist an ingestion job record, overwriting any previous state.
    pub async fn store_job(&self, record: &JobRecord) -> Result<()> {
        let value = bincode::serialize(record)?;
        self.job_tree
            .insert(record.job.job_id.as_bytes(), value)?;
        Ok(())
    }

    /// Look up an ingestion job record.
    pub async fn get_job(&self, job_id: &Uuid) -> Result<Option<JobRecord>> {
        let Some(value) = self.job_tree.get(job_id.as_bytes())? else {
            return Ok(None);
        };
        Ok(Some(bincode::deserialize(&value)?))
    }

    /// Persist override mappings under their season/jurisdiction partition.
    pub async fn store_mappings(&self, mappings: &[OverrideMapping]) -> Result<()> {
        for mapping in mappings {
            let key = mapping_storage_key(&mapping.partition_key(), &mapping.mapping_id);
            let value = bincode::serialize(mapping)?;
            self.mapping_tree.insert(key.as_bytes(), value)?;
        }
        self.db.flush_async().await?;
        Ok(())
    }

    /// All mappings in one season/jurisdiction partition.
    pub async fn list_mappings(
        &self,
        season_id: &str,
        jurisdiction_id: Option<&str>,
    ) -> Result<Vec<OverrideMapping>> {
        let prefix = format!("{}:", partition_key(season_id, jurisdiction_id));
        let mut mappings = Vec::new();

        for entry in self.mapping_tree.scan_prefix(prefix.as_bytes()) {
            let (_, value) = entry?;
            mappings.push(bincode::deserialize::<OverrideMapping>(&value)?);
        }

        Ok(mappings)
    }

    /// Confirmed mappings only; the snapshot precedence resolution reads.
    pub async fn list_confirmed_mappings(
        &self,
        season_id: &str,
        jurisdiction_id: Option<&str>,
    ) -> Result<Vec<OverrideMapping>> {
        let mut mappings = self.list_mappings(season_id, jurisdiction_id).await?;
        mappings.retain(|m| m.status == OverrideStatus::Confirmed);
        Ok(mappings)
    }

    /// Apply a review decision to a mapping.
    ///
    /// The status state machine is enforced here: only Proposed mappings can
    /// move, and only to Confirmed or Rejected.
    pub async fn review_mapping(
        &self,
        season_id: &str,
        jurisdiction_id: Option<&str>,
        mapping_id: &Uuid,
        next: OverrideStatus,
    ) -> Result<OverrideMapping> {
        let key = mapping_storage_key(&partition_key(season_id, jurisdiction_id), mapping_id);

        let Some(value) = self.mapping_tree.get(key.as_bytes())? else {
            return Err(RulebookError::NotFound {
                entity: "override mapping".to_string(),
                key: mapping_id.to_string(),
            });
        };

        let mut mapping: OverrideMapping = bincode::deserialize(&value)?;
        if !mapping.status.can_transition_to(next) {
            return Err(RulebookError::InvalidOverrideTransition {
                mapping_id: mapping_id.to_string(),
                from: mapping.status.as_str().to_string(),
            });
        }

        mapping.status = next;
        mapping.reviewed_at = Some(chrono::Utc::now());

        let updated = bincode::serialize(&mapping)?;
        self.mapping_tree.insert(key.as_bytes(), updated)?;
        self.db.flush_async().await?;

        tracing::info!(
            mapping_id = %mapping_id,
            status = mapping.status.as_str(),
            "Override mapping reviewed"
        );
        Ok(mapping)
    }

    /// Verify the database accepts reads and writes.
    pub async fn health_check(&self) -> Result<()> {
        let test_key = b"health_check";
        self.chunk_tree.insert(test_key, b"ok".as_slice())?;
        if self.chunk_tree.get(test_key)?.is_none() {
            return Err(crate::internal_error!(
                "Health check value not found after write"
            ));
        }
        self.chunk_tree.remove(test_key)?;
        Ok(())
    }
}

fn mapping_storage_key(partition: &str, mapping_id: &Uuid) -> String {
    format!("{}:{}", partition, mapping_id)
}

fn compress(data: &[u8]) -> Result<Vec<u8>> {
    use std::io::Write;

    let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

fn decompress(data: &[u8]) -> Result<Vec<u8>> {
    use std::io::Read;

    let mut decoder = flate2::read::GzDecoder::new(data);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out)?;
    Ok(out)
}
