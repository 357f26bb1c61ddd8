//! Ingest journal.
//!
//! `clusters/pending.json` holds two kinds of entries:
//! - documents whose chunk file may exist but whose chunks are not all in a
//!   cluster yet, recorded before the chunk file is written and cleared once
//!   assignment finished
//! - clusters touched by an assignment batch, recorded before any slot is
//!   written and cleared only after the cluster's centroid was recomputed
//!
//! Entries left behind by a crash name exactly the documents to reassign and
//! the clusters whose centroid may be stale.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{IndexError, IndexResult};
use crate::storage::atomic;
use crate::vector::{ClusterId, DocId};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
struct JournalRecord {
    /// cluster id -> document id of the batch that touched it
    #[serde(default)]
    clusters: BTreeMap<u32, u32>,
    /// documents whose assignment has not finished
    #[serde(default)]
    documents: BTreeSet<u32>,
}

impl JournalRecord {
    fn is_empty(&self) -> bool {
        self.clusters.is_empty() && self.documents.is_empty()
    }
}

#[derive(Debug)]
pub struct CentroidJournal {
    path: PathBuf,
    record: JournalRecord,
}

impl CentroidJournal {
    /// Loads pending entries from `path`; a missing file means none.
    pub fn load(path: impl Into<PathBuf>) -> IndexResult<Self> {
        let path = path.into();
        let record = atomic::read_json::<JournalRecord>(&path)?.unwrap_or_default();
        Ok(Self { path, record })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Marks `doc_id` as stored but not yet assigned.
    pub fn begin_document(&mut self, doc_id: DocId) -> IndexResult<()> {
        if self.record.documents.contains(&doc_id.get()) {
            return Ok(());
        }
        let mut record = self.record.clone();
        record.documents.insert(doc_id.get());
        self.replace(record)
    }

    /// Clears the entry for `doc_id` once every chunk went through assignment.
    pub fn finish_document(&mut self, doc_id: DocId) -> IndexResult<()> {
        if !self.record.documents.contains(&doc_id.get()) {
            return Ok(());
        }
        let mut record = self.record.clone();
        record.documents.remove(&doc_id.get());
        self.replace(record)
    }

    /// Marks `clusters` as awaiting a recompute for `doc_id`'s batch.
    pub fn record(
        &mut self,
        clusters: impl IntoIterator<Item = ClusterId>,
        doc_id: DocId,
    ) -> IndexResult<()> {
        let mut record = self.record.clone();
        for cluster in clusters {
            record.clusters.insert(cluster.get(), doc_id.get());
        }
        self.replace(record)
    }

    /// Clears the entry for `cluster` once its centroid is current.
    pub fn clear(&mut self, cluster: ClusterId) -> IndexResult<()> {
        if !self.record.clusters.contains_key(&cluster.get()) {
            return Ok(());
        }
        let mut record = self.record.clone();
        record.clusters.remove(&cluster.get());
        self.replace(record)
    }

    /// Pending `(cluster, doc_id)` entries in cluster order.
    ///
    /// Entries with a zero id are ignored.
    pub fn pending(&self) -> Vec<(ClusterId, DocId)> {
        self.record
            .clusters
            .iter()
            .filter_map(|(&cluster, &doc)| Some((ClusterId::new(cluster)?, DocId::new(doc)?)))
            .collect()
    }

    /// Documents whose assignment did not finish, in id order.
    pub fn pending_documents(&self) -> Vec<DocId> {
        self.record
            .documents
            .iter()
            .filter_map(|&doc| DocId::new(doc))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.record.is_empty()
    }

    fn replace(&mut self, record: JournalRecord) -> IndexResult<()> {
        if record.is_empty() {
            match std::fs::remove_file(&self.path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(source) => {
                    return Err(IndexError::FileWrite {
                        path: self.path.clone(),
                        source,
                    });
                }
            }
        } else {
            atomic::write_json_atomic(&self.path, &record)?;
        }
        self.record = record;
        Ok(())
    }
}
