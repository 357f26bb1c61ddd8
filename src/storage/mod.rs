//! On-disk state of the index.
//!
//! Layout under the index root:
//! - `documents/<doc_id>.chunks`: one fixed-record chunk file per document
//! - `clusters/cluster_<n>.cluster`: one fixed-size record per cluster
//! - `clusters/pending.json`: journal of unfinished assignments
//! - `doc_index.json`: document key to id mapping
//! - `index.meta`: dimension and cluster capacity fixed at creation
//! - `writer.lock`: locked by the OS while a writer holds the index

pub mod atomic;
pub mod chunk_store;
pub mod cluster_store;
mod codec;
pub mod document_index;
pub mod handle_cache;
pub mod journal;
pub mod lock;
pub mod metadata;

pub use chunk_store::{ChunkFile, ChunkStore, ChunkView};
pub use cluster_store::{ClusterFile, ClusterLayout, ClusterStore, SlotOutcome};
pub use document_index::DocumentIndex;
pub use handle_cache::ChunkCache;
pub use journal::CentroidJournal;
pub use lock::WriterLock;
pub use metadata::IndexMetadata;

/// Directory holding chunk files.
pub const DOCUMENTS_DIR: &str = "documents";

/// Directory holding cluster files and the centroid journal.
pub const CLUSTERS_DIR: &str = "clusters";

/// Document index file name.
pub const DOC_INDEX_FILE: &str = "doc_index.json";

/// Centroid journal file name (inside `clusters/`).
pub const JOURNAL_FILE: &str = "pending.json";

/// Writer lock file name.
pub const LOCK_FILE: &str = "writer.lock";
