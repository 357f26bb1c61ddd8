//! Persistent mapping between document keys and document ids.
//!
//! The whole mapping is one JSON record (`doc_index.json`) holding the next
//! id to allocate and the key to id map. The id to key direction is derived
//! on load, so both directions always change together.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{IndexError, IndexResult, Missing};
use crate::storage::atomic;
use crate::vector::DocId;

/// Version of the document index record format
const DOC_INDEX_VERSION: u32 = 1;

/// Persisted form of the document index.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct DocIndexRecord {
    version: u32,
    next_id: u32,
    entries: BTreeMap<String, u32>,
}

/// Bidirectional `document key <-> DocId` map with a persisted id counter.
#[derive(Debug)]
pub struct DocumentIndex {
    path: PathBuf,
    next_id: u32,
    by_key: BTreeMap<String, DocId>,
    by_id: HashMap<DocId, String>,
}

impl DocumentIndex {
    /// Loads the index from `path`, or starts empty if the file is absent.
    ///
    /// The id counter is repaired to `max(next_id, max_id + 1)`.
    ///
    /// # Errors
    /// `PersistenceError` for unparsable JSON and `CorruptFormat` for an
    /// unknown version, a zero id or an id mapped from two keys.
    pub fn load(path: impl Into<PathBuf>) -> IndexResult<Self> {
        let path = path.into();
        let Some(record) = atomic::read_json::<DocIndexRecord>(&path)? else {
            return Ok(Self {
                path,
                next_id: 1,
                by_key: BTreeMap::new(),
                by_id: HashMap::new(),
            });
        };

        if record.version != DOC_INDEX_VERSION {
            return Err(IndexError::corrupt(
                &path,
                format!(
                    "unsupported document index version {} (expected {DOC_INDEX_VERSION})",
                    record.version
                ),
            ));
        }

        let mut by_key = BTreeMap::new();
        let mut by_id = HashMap::new();
        for (key, raw_id) in record.entries {
            let id = DocId::new(raw_id)
                .ok_or_else(|| IndexError::corrupt(&path, format!("key '{key}' maps to id 0")))?;
            if let Some(previous) = by_id.insert(id, key.clone()) {
                return Err(IndexError::corrupt(
                    &path,
                    format!("id {id} is mapped from both '{previous}' and '{key}'"),
                ));
            }
            by_key.insert(key, id);
        }

        let max_id = by_id.keys().map(DocId::get).max().unwrap_or(0);
        let next_id = record.next_id.max(max_id.saturating_add(1)).max(1);
        if next_id != record.next_id {
            tracing::warn!(
                "repaired document id counter in {} from {} to {next_id}",
                path.display(),
                record.next_id
            );
        }

        Ok(Self {
            path,
            next_id,
            by_key,
            by_id,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the id for `key`, allocating and persisting a new one if the
    /// key is not mapped yet.
    pub fn assign(&mut self, key: &str) -> IndexResult<DocId> {
        if let Some(id) = self.by_key.get(key) {
            return Ok(*id);
        }

        let id = DocId::new(self.next_id).ok_or_else(|| IndexError::PersistenceError {
            path: self.path.clone(),
            reason: "document id counter is zero".to_string(),
        })?;
        if id.get() > DocId::MAX {
            return Err(IndexError::PersistenceError {
                path: self.path.clone(),
                reason: format!("document id space exhausted (next id {id})"),
            });
        }
        let next_id = id.get() + 1;

        let mut entries = self.entries();
        entries.insert(key.to_string(), id.get());
        self.persist(next_id, entries)?;

        self.next_id = next_id;
        self.by_key.insert(key.to_string(), id);
        self.by_id.insert(id, key.to_string());
        tracing::debug!("assigned document id {id} to '{key}'");
        Ok(id)
    }

    pub fn lookup_by_key(&self, key: &str) -> IndexResult<DocId> {
        self.by_key
            .get(key)
            .copied()
            .ok_or_else(|| IndexError::not_found(Missing::DocumentKey(key.to_string())))
    }

    pub fn lookup_by_id(&self, id: DocId) -> IndexResult<&str> {
        self.by_id
            .get(&id)
            .map(String::as_str)
            .ok_or_else(|| IndexError::not_found(Missing::DocumentId(id)))
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.by_key.contains_key(key)
    }

    /// Removes `key` and its id in one durable write. The id is not reused.
    pub fn delete(&mut self, key: &str) -> IndexResult<DocId> {
        let id = self.lookup_by_key(key)?;

        let mut entries = self.entries();
        entries.remove(key);
        self.persist(self.next_id, entries)?;

        self.by_key.remove(key);
        self.by_id.remove(&id);
        tracing::debug!("removed document '{key}' (id {id})");
        Ok(id)
    }

    /// The id the next new key will receive.
    pub fn next_id(&self) -> u32 {
        self.next_id
    }

    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }

    /// Mapped `(key, id)` pairs ordered by key.
    pub fn iter(&self) -> impl Iterator<Item = (&str, DocId)> + '_ {
        self.by_key.iter().map(|(key, id)| (key.as_str(), *id))
    }

    fn entries(&self) -> BTreeMap<String, u32> {
        self.by_key
            .iter()
            .map(|(key, id)| (key.clone(), id.get()))
            .collect()
    }

    fn persist(&self, next_id: u32, entries: BTreeMap<String, u32>) -> IndexResult<()> {
        let record = DocIndexRecord {
            version: DOC_INDEX_VERSION,
            next_id,
            entries,
        };
        atomic::write_json_atomic(&self.path, &record)
    }
}
