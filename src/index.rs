//! The index facade: one object owning every store of an index directory.

use std::path::{Path, PathBuf};

use crate::config::{IndexConfig, Settings};
use crate::error::{ErrorContext, IndexError, IndexResult};
use crate::indexing::{AssignmentEngine, BatchReport};
use crate::storage::{
    CLUSTERS_DIR, CentroidJournal, ChunkCache, ChunkStore, ClusterLayout, ClusterStore,
    DOC_INDEX_FILE, DOCUMENTS_DIR, DocumentIndex, IndexMetadata, JOURNAL_FILE, WriterLock,
};
use crate::vector::{ChunkRecord, ClusterId, DocId, EmbeddingPolicy, VectorDimension};

/// Summary of one cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterStats {
    pub id: ClusterId,
    pub members: usize,
    pub capacity: usize,
}

/// Summary of the whole index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexStats {
    pub documents: usize,
    pub next_doc_id: u32,
    pub clusters: Vec<ClusterStats>,
    pub pending_centroids: usize,
    pub pending_documents: usize,
    pub cached_handles: usize,
}

/// What a recovery pass repaired.
#[derive(Debug, Default)]
pub struct RecoveryReport {
    /// Clusters whose centroid was recomputed from the journal
    pub recomputed: Vec<ClusterId>,
    /// Documents whose unassigned chunks were assigned
    pub reassigned: Vec<BatchReport>,
}

impl RecoveryReport {
    pub fn is_empty(&self) -> bool {
        self.recomputed.is_empty() && self.reassigned.is_empty()
    }
}

/// A disk-backed chunk index rooted at one directory.
///
/// Holds the document index, the chunk handle cache, the cluster store and
/// the centroid journal. Mutating operations take the writer lock for their
/// duration.
#[derive(Debug)]
pub struct VectorIndex {
    root: PathBuf,
    metadata: IndexMetadata,
    policy: EmbeddingPolicy,
    documents: DocumentIndex,
    chunks: ChunkCache,
    clusters: ClusterStore,
    journal: CentroidJournal,
}

impl VectorIndex {
    /// Opens the index configured in `settings`.
    pub fn open(settings: &Settings) -> IndexResult<Self> {
        let policy = settings.embedding_policy()?;
        Self::open_at(&settings.index.path, &settings.index, policy)
    }

    /// Opens (creating if needed) the index at `root`.
    ///
    /// Creates the directory layout, loads the document index, creates the
    /// initial cluster and replays any pending journal entries before
    /// returning.
    pub fn open_at(
        root: impl AsRef<Path>,
        config: &IndexConfig,
        policy: EmbeddingPolicy,
    ) -> IndexResult<Self> {
        config.validate()?;
        let root = root.as_ref().to_path_buf();
        let dimension = config.dimension()?;
        if policy.dimension != dimension {
            return Err(IndexError::DimensionMismatch {
                expected: dimension.get(),
                actual: policy.dimension.get(),
            });
        }

        for dir in [root.join(DOCUMENTS_DIR), root.join(CLUSTERS_DIR)] {
            std::fs::create_dir_all(&dir).write_context(&dir)?;
        }
        let metadata =
            IndexMetadata::load_or_create(&root, dimension.get(), config.cluster_capacity)?;

        let layout = ClusterLayout::new(config.cluster_capacity, dimension)?;
        let mut index = Self {
            documents: DocumentIndex::load(root.join(DOC_INDEX_FILE))?,
            chunks: ChunkCache::new(ChunkStore::new(root.join(DOCUMENTS_DIR), dimension)),
            clusters: ClusterStore::new(root.join(CLUSTERS_DIR), layout),
            journal: CentroidJournal::load(root.join(CLUSTERS_DIR).join(JOURNAL_FILE))?,
            root,
            metadata,
            policy,
        };

        let needs_initial_cluster = index.clusters.cluster_ids()?.is_empty();
        if needs_initial_cluster || !index.journal.is_empty() {
            let _lock = WriterLock::acquire(&index.root)?;
            if needs_initial_cluster {
                index.clusters.create_initial_cluster()?;
            }
            index.replay_pending()?;
        }

        tracing::info!(
            "opened index at {} ({} documents, dimension {})",
            index.root.display(),
            index.documents.len(),
            dimension.get()
        );
        Ok(index)
    }

    /// Stores a document's chunk records and assigns them to clusters.
    ///
    /// The document id is allocated (or reused if an earlier attempt stopped
    /// before writing the chunk file), the chunk file is written, the handle
    /// cache is cleared and the chunks are assigned.
    ///
    /// # Errors
    /// - `DimensionMismatch` if any embedding is not D long; nothing is written
    /// - `ChunkFileExists` if the key is already fully indexed
    /// - `WriterLocked` if another writer holds the index
    pub fn ingest_document(&mut self, key: &str, chunks: &[ChunkRecord]) -> IndexResult<BatchReport> {
        let dimension = self.dimension();
        for chunk in chunks {
            dimension.validate_vector(&chunk.embedding)?;
        }

        let _lock = WriterLock::acquire(&self.root)?;
        let doc_id = self.documents.assign(key)?;
        let path = self.chunks.store().path_for(doc_id);
        if path.exists() {
            return Err(IndexError::ChunkFileExists { doc_id, path });
        }

        self.journal.begin_document(doc_id)?;
        self.chunks.store().create(doc_id, chunks)?;
        self.chunks.clear();

        tracing::info!("ingesting '{key}' as document {doc_id} ({} chunks)", chunks.len());
        let report = AssignmentEngine::new(&self.clusters, &self.chunks, &mut self.journal)
            .assign_document(doc_id)?;
        self.journal.finish_document(doc_id)?;
        Ok(report)
    }

    /// Removes a document's key mapping.
    ///
    /// Chunk files and cluster references stay in place; queries report
    /// references to deleted documents as skipped.
    pub fn delete_document(&mut self, key: &str) -> IndexResult<DocId> {
        let _lock = WriterLock::acquire(&self.root)?;
        let doc_id = self.documents.delete(key)?;
        self.chunks.clear();
        tracing::info!("deleted document '{key}' (id {doc_id})");
        Ok(doc_id)
    }

    /// Replays the journal, then assigns any stored chunk that no cluster
    /// references, under the writer lock.
    ///
    /// The sweep reads every cluster and every mapped document's chunk file.
    pub fn recover(&mut self) -> IndexResult<RecoveryReport> {
        let _lock = WriterLock::acquire(&self.root)?;
        let mut report = self.replay_pending()?;
        let swept = AssignmentEngine::new(&self.clusters, &self.chunks, &mut self.journal)
            .sweep_unassigned(&self.documents)?;
        report.reassigned.extend(swept);
        tracing::info!(
            "recovery recomputed {} centroids and reassigned {} documents",
            report.recomputed.len(),
            report.reassigned.len()
        );
        Ok(report)
    }

    fn replay_pending(&mut self) -> IndexResult<RecoveryReport> {
        let mut engine = AssignmentEngine::new(&self.clusters, &self.chunks, &mut self.journal);
        let recomputed = engine.replay_journal()?;
        let reassigned = engine.replay_documents(&self.documents)?;
        Ok(RecoveryReport {
            recomputed,
            reassigned,
        })
    }

    /// True when `key` is mapped and its chunk file exists.
    pub fn is_indexed(&self, key: &str) -> bool {
        self.documents
            .lookup_by_key(key)
            .is_ok_and(|doc_id| self.chunks.store().exists(doc_id))
    }

    pub fn stats(&self) -> IndexResult<IndexStats> {
        let clusters = self
            .clusters
            .cluster_ids()?
            .into_iter()
            .map(|id| {
                let cluster = self.clusters.open(id)?;
                Ok(ClusterStats {
                    id,
                    members: cluster.member_count(),
                    capacity: cluster.capacity(),
                })
            })
            .collect::<IndexResult<Vec<_>>>()?;

        Ok(IndexStats {
            documents: self.documents.len(),
            next_doc_id: self.documents.next_id(),
            clusters,
            pending_centroids: self.journal.pending().len(),
            pending_documents: self.journal.pending_documents().len(),
            cached_handles: self.chunks.len(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn metadata(&self) -> &IndexMetadata {
        &self.metadata
    }

    pub fn dimension(&self) -> VectorDimension {
        self.chunks.store().dimension()
    }

    pub fn policy(&self) -> EmbeddingPolicy {
        self.policy
    }

    pub fn documents(&self) -> &DocumentIndex {
        &self.documents
    }

    pub fn chunks(&self) -> &ChunkCache {
        &self.chunks
    }

    pub fn clusters(&self) -> &ClusterStore {
        &self.clusters
    }

    pub fn journal(&self) -> &CentroidJournal {
        &self.journal
    }
}
