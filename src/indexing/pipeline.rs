//! From a document key to indexed, assigned chunks.

use crate::error::{IndexError, IndexResult};
use crate::index::VectorIndex;
use crate::indexing::assignment::BatchReport;
use crate::indexing::chunking::Chunker;
use crate::retry::RetryPolicy;
use crate::sources::TextExtractor;
use crate::vector::{ChunkRecord, DocId, EmbeddingProvider};

/// What happened to one document.
#[derive(Debug)]
pub enum IngestOutcome {
    /// The key was already indexed; nothing was written
    Skipped { doc_id: DocId },
    Indexed(BatchReport),
}

/// A document that could not be ingested.
#[derive(Debug)]
pub struct DocumentFailure {
    pub key: String,
    pub error: IndexError,
}

/// Per-document results of [`IngestPipeline::ingest_many`].
#[derive(Debug, Default)]
pub struct IngestReport {
    pub indexed: Vec<(String, BatchReport)>,
    pub skipped: Vec<(String, DocId)>,
    pub failed: Vec<DocumentFailure>,
}

impl IngestReport {
    /// Chunks that were placed in a cluster across all indexed documents.
    pub fn assigned_chunks(&self) -> usize {
        self.indexed
            .iter()
            .map(|(_, report)| report.assigned.len())
            .sum()
    }
}

/// Extract, chunk, embed and store documents.
pub struct IngestPipeline<'a> {
    extractor: &'a dyn TextExtractor,
    chunker: &'a dyn Chunker,
    embedder: &'a dyn EmbeddingProvider,
    retry: RetryPolicy,
}

impl<'a> IngestPipeline<'a> {
    pub fn new(
        extractor: &'a dyn TextExtractor,
        chunker: &'a dyn Chunker,
        embedder: &'a dyn EmbeddingProvider,
    ) -> Self {
        Self {
            extractor,
            chunker,
            embedder,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Ingests one document unless it is already indexed.
    ///
    /// Collaborator calls are retried per the pipeline's [`RetryPolicy`];
    /// nothing is written to the index before every chunk is embedded.
    pub fn ingest_source(&self, index: &mut VectorIndex, key: &str) -> IndexResult<IngestOutcome> {
        if index.is_indexed(key) {
            let doc_id = index.documents().lookup_by_key(key)?;
            tracing::debug!("'{key}' already indexed as document {doc_id}, skipping");
            return Ok(IngestOutcome::Skipped { doc_id });
        }

        let text = self
            .retry
            .run(self.extractor.name(), || self.extractor.extract(key))?;
        let chunks = self.chunker.chunk(&text);
        if chunks.is_empty() {
            tracing::warn!(
                "{} chunker produced no chunks for '{key}'",
                self.chunker.name()
            );
        }

        let policy = index.policy();
        let mut records = Vec::with_capacity(chunks.len());
        for chunk in &chunks {
            let raw = self
                .retry
                .run(self.embedder.name(), || self.embedder.embed(&chunk.text))?;
            records.push(ChunkRecord::new(
                offset(key, chunk.start)?,
                offset(key, chunk.end)?,
                policy.apply(raw),
            ));
        }

        index.ingest_document(key, &records).map(IngestOutcome::Indexed)
    }

    /// Ingests `keys` in order, collecting per-document results.
    ///
    /// Collaborator, dimension and offset failures are recorded against the
    /// document and the loop moves on. Storage failures stop the run.
    pub fn ingest_many<S: AsRef<str>>(
        &self,
        index: &mut VectorIndex,
        keys: &[S],
    ) -> IndexResult<IngestReport> {
        let mut report = IngestReport::default();
        for key in keys.iter().map(AsRef::as_ref) {
            match self.ingest_source(index, key) {
                Ok(IngestOutcome::Indexed(batch)) => report.indexed.push((key.to_string(), batch)),
                Ok(IngestOutcome::Skipped { doc_id }) => {
                    report.skipped.push((key.to_string(), doc_id))
                }
                Err(
                    error @ (IndexError::ProviderFailure { .. }
                    | IndexError::DimensionMismatch { .. }
                    | IndexError::ConfigError { .. }),
                ) => {
                    tracing::warn!("failed to ingest '{key}': {error}");
                    report.failed.push(DocumentFailure {
                        key: key.to_string(),
                        error,
                    });
                }
                Err(error) => return Err(error),
            }
        }

        tracing::info!(
            "ingested {} documents ({} chunks assigned), {} skipped, {} failed",
            report.indexed.len(),
            report.assigned_chunks(),
            report.skipped.len(),
            report.failed.len()
        );
        Ok(report)
    }
}

fn offset(key: &str, chars: usize) -> IndexResult<u32> {
    u32::try_from(chars).map_err(|_| IndexError::ConfigError {
        reason: format!("character offset {chars} in '{key}' does not fit a chunk record"),
    })
}
