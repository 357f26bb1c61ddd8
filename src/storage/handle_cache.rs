//! Per-index cache of open chunk file mappings.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::IndexResult;
use crate::storage::chunk_store::{ChunkFile, ChunkStore};
use crate::vector::DocId;

/// Open chunk mappings keyed by document id.
///
/// The cache is cleared whenever a document is ingested so no stale mapping
/// outlives a change to the documents directory.
#[derive(Debug)]
pub struct ChunkCache {
    store: ChunkStore,
    handles: RwLock<HashMap<DocId, Arc<ChunkFile>>>,
}

impl ChunkCache {
    pub fn new(store: ChunkStore) -> Self {
        Self {
            store,
            handles: RwLock::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &ChunkStore {
        &self.store
    }

    /// Returns the cached mapping for `doc_id`, opening it on first use.
    pub fn handle(&self, doc_id: DocId) -> IndexResult<Arc<ChunkFile>> {
        if let Some(handle) = self.handles.read().get(&doc_id) {
            return Ok(Arc::clone(handle));
        }

        let file = Arc::new(self.store.open(doc_id)?);
        let mut handles = self.handles.write();
        let handle = handles.entry(doc_id).or_insert(file);
        Ok(Arc::clone(handle))
    }

    /// Drops every cached mapping.
    pub fn clear(&self) {
        let mut handles = self.handles.write();
        if !handles.is_empty() {
            tracing::debug!("dropping {} cached chunk mappings", handles.len());
        }
        handles.clear();
    }

    pub fn len(&self) -> usize {
        self.handles.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.read().is_empty()
    }
}
