//! Assigning a document's chunks to clusters and keeping centroids current.
//!
//! A batch is one document:
//! 1. the nearest cluster of every chunk is computed against the centroids
//!    as they were before the batch
//! 2. the touched clusters are recorded in the centroid journal
//! 3. references are written into free slots, one rewrite per cluster
//! 4. each cluster that received references gets its centroid recomputed,
//!    then its journal entry is cleared
//!
//! A full cluster rejects the chunk and the batch carries on; storage errors
//! abort the batch and leave the journal entries for [`AssignmentEngine::replay_journal`].
//!
//! The document itself is journaled before its chunk file is written, so a
//! crash between storing and assigning is finished by
//! [`AssignmentEngine::replay_documents`]. Only chunks no cluster slot
//! references yet are assigned again.

use std::collections::{BTreeMap, BTreeSet};

use crate::error::{IndexError, IndexResult, Missing};
use crate::storage::cluster_store::nearest_in;
use crate::storage::{CentroidJournal, ChunkCache, ClusterStore, DocumentIndex, SlotOutcome};
use crate::vector::{ChunkIndex, ClusterId, DocId, Slot};

/// A chunk that could not be placed.
#[derive(Debug)]
pub struct ChunkFailure {
    pub chunk_index: ChunkIndex,
    pub cluster: ClusterId,
    pub error: IndexError,
}

/// Outcome of assigning one document's chunks.
#[derive(Debug)]
pub struct BatchReport {
    pub doc_id: DocId,
    /// Placed chunks and their cluster, by chunk index
    pub assigned: Vec<(ChunkIndex, ClusterId)>,
    pub failed: Vec<ChunkFailure>,
    /// Clusters whose centroid was recomputed
    pub recomputed: Vec<ClusterId>,
}

impl BatchReport {
    fn new(doc_id: DocId) -> Self {
        Self {
            doc_id,
            assigned: Vec::new(),
            failed: Vec::new(),
            recomputed: Vec::new(),
        }
    }

    /// True when every chunk was placed.
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

pub struct AssignmentEngine<'a> {
    clusters: &'a ClusterStore,
    chunks: &'a ChunkCache,
    journal: &'a mut CentroidJournal,
}

impl<'a> AssignmentEngine<'a> {
    pub fn new(
        clusters: &'a ClusterStore,
        chunks: &'a ChunkCache,
        journal: &'a mut CentroidJournal,
    ) -> Self {
        Self {
            clusters,
            chunks,
            journal,
        }
    }

    /// Assigns every chunk of `doc_id` and recomputes the touched centroids.
    pub fn assign_document(&mut self, doc_id: DocId) -> IndexResult<BatchReport> {
        self.assign_remaining(doc_id, &BTreeSet::new())
    }

    /// Assigns the chunks of `doc_id` whose index is not in `placed`.
    pub fn assign_remaining(
        &mut self,
        doc_id: DocId,
        placed: &BTreeSet<ChunkIndex>,
    ) -> IndexResult<BatchReport> {
        let file = self.chunks.handle(doc_id)?;
        let mut report = BatchReport::new(doc_id);
        if file.iter().all(|view| placed.contains(&view.chunk_index())) {
            return Ok(report);
        }

        let centroids = self.clusters.centroids()?;
        let mut targets: BTreeMap<ClusterId, Vec<Slot>> = BTreeMap::new();
        for view in file.iter().filter(|view| !placed.contains(&view.chunk_index())) {
            let embedding: Vec<f32> = view.embedding().collect();
            let cluster = nearest_in(&centroids, &embedding)?;
            targets
                .entry(cluster)
                .or_default()
                .push(Slot::new(doc_id, view.chunk_index()));
        }

        self.journal.record(targets.keys().copied(), doc_id)?;

        let capacity = self.clusters.layout().capacity();
        for (&cluster, slots) in &targets {
            let outcomes = self.clusters.assign_slots(cluster, slots)?;
            let mut placed = 0;
            for (slot, outcome) in slots.iter().zip(outcomes) {
                match outcome {
                    SlotOutcome::Assigned(_) => {
                        placed += 1;
                        report.assigned.push((slot.chunk_index, cluster));
                    }
                    SlotOutcome::Full => {
                        tracing::warn!(
                            "cluster {cluster} is full, chunk {} of document {doc_id} not assigned",
                            slot.chunk_index
                        );
                        report.failed.push(ChunkFailure {
                            chunk_index: slot.chunk_index,
                            cluster,
                            error: IndexError::ClusterFull { cluster, capacity },
                        });
                    }
                }
            }

            if placed > 0 {
                self.clusters.recompute_centroid(cluster, self.chunks)?;
                report.recomputed.push(cluster);
            }
            self.journal.clear(cluster)?;
        }

        report.assigned.sort_by_key(|(chunk_index, _)| *chunk_index);
        report.failed.sort_by_key(|failure| failure.chunk_index);

        tracing::info!(
            "document {doc_id}: {} chunks assigned, {} rejected, {} centroids recomputed",
            report.assigned.len(),
            report.failed.len(),
            report.recomputed.len()
        );
        Ok(report)
    }

    /// Recomputes every centroid named in the journal and clears its entry.
    ///
    /// Returns the clusters that were repaired.
    pub fn replay_journal(&mut self) -> IndexResult<Vec<ClusterId>> {
        let pending = self.journal.pending();
        if pending.is_empty() {
            return Ok(Vec::new());
        }

        let mut repaired = Vec::with_capacity(pending.len());
        for (cluster, doc_id) in pending {
            tracing::info!(
                "replaying centroid of cluster {cluster} after interrupted batch for document {doc_id}"
            );
            match self.clusters.recompute_centroid(cluster, self.chunks) {
                Ok(_) => repaired.push(cluster),
                // Interrupted before any slot was written
                Err(IndexError::EmptyCluster { .. }) => {
                    tracing::warn!("cluster {cluster} has no members, centroid left unchanged");
                }
                Err(IndexError::NotFound(Missing::Cluster(_))) => {
                    tracing::warn!("journal names missing cluster {cluster}, dropping entry");
                }
                Err(e) => return Err(e),
            }
            self.journal.clear(cluster)?;
        }
        Ok(repaired)
    }

    /// Finishes documents the journal lists as stored but not fully assigned.
    ///
    /// Documents that are no longer mapped, or whose chunk file was never
    /// written, only have their entry cleared.
    pub fn replay_documents(&mut self, documents: &DocumentIndex) -> IndexResult<Vec<BatchReport>> {
        let pending = self.journal.pending_documents();
        if pending.is_empty() {
            return Ok(Vec::new());
        }

        let placed = self.placed_chunks()?;
        let none = BTreeSet::new();
        let mut reports = Vec::new();
        for doc_id in pending {
            if documents.lookup_by_id(doc_id).is_ok() && self.chunks.store().exists(doc_id) {
                tracing::info!("resuming interrupted assignment of document {doc_id}");
                let done = placed.get(&doc_id).unwrap_or(&none);
                reports.push(self.assign_remaining(doc_id, done)?);
            } else {
                tracing::info!("document {doc_id} has nothing stored to assign, dropping entry");
            }
            self.journal.finish_document(doc_id)?;
        }
        Ok(reports)
    }

    /// Assigns chunks of mapped documents that no cluster slot references.
    ///
    /// Returns one report per document that had such chunks.
    pub fn sweep_unassigned(&mut self, documents: &DocumentIndex) -> IndexResult<Vec<BatchReport>> {
        let placed = self.placed_chunks()?;
        let none = BTreeSet::new();
        let mut reports = Vec::new();
        for (key, doc_id) in documents.iter() {
            if !self.chunks.store().exists(doc_id) {
                continue;
            }
            let done = placed.get(&doc_id).unwrap_or(&none);
            let file = self.chunks.handle(doc_id)?;
            if file.iter().all(|view| done.contains(&view.chunk_index())) {
                continue;
            }
            tracing::warn!("document {doc_id} ('{key}') has unassigned chunks, assigning them");
            reports.push(self.assign_remaining(doc_id, done)?);
        }
        Ok(reports)
    }

    /// Chunk indices referenced by any cluster slot, per document.
    pub fn placed_chunks(&self) -> IndexResult<BTreeMap<DocId, BTreeSet<ChunkIndex>>> {
        let mut placed: BTreeMap<DocId, BTreeSet<ChunkIndex>> = BTreeMap::new();
        for id in self.clusters.cluster_ids()? {
            let cluster = self.clusters.open(id)?;
            for slot in cluster.members() {
                placed.entry(slot.doc_id).or_default().insert(slot.chunk_index);
            }
        }
        Ok(placed)
    }
}
