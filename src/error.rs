//! Error types for the chunk index
//!
//! This module provides structured error types using thiserror for better
//! error handling and actionable error messages.

use std::path::PathBuf;
use thiserror::Error;

use crate::vector::{ChunkIndex, ClusterId, DocId};

/// What a `NotFound` error failed to locate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Missing {
    /// No chunk file exists for the document
    ChunkFile { doc_id: DocId, path: PathBuf },
    /// The chunk file exists but has fewer records than requested
    Chunk {
        doc_id: DocId,
        chunk_index: ChunkIndex,
        record_count: usize,
    },
    /// No cluster file with this id
    Cluster(ClusterId),
    /// No clusters exist at all
    AnyCluster,
    /// The external document key is not mapped
    DocumentKey(String),
    /// The document id is not mapped
    DocumentId(DocId),
}

impl std::fmt::Display for Missing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ChunkFile { doc_id, path } => {
                write!(f, "chunk file for document {doc_id} at '{}'", path.display())
            }
            Self::Chunk {
                doc_id,
                chunk_index,
                record_count,
            } => write!(
                f,
                "chunk {chunk_index} of document {doc_id} (file holds {record_count} records)"
            ),
            Self::Cluster(id) => write!(f, "cluster {id}"),
            Self::AnyCluster => write!(f, "any cluster"),
            Self::DocumentKey(key) => write!(f, "document key '{key}'"),
            Self::DocumentId(id) => write!(f, "document id {id}"),
        }
    }
}

/// Main error type for index operations
#[derive(Error, Debug)]
pub enum IndexError {
    #[error("Not found: {0}")]
    NotFound(Missing),

    #[error(
        "Vector dimension mismatch: expected {expected}, got {actual}\nSuggestion: Ensure all vectors use the same embedding model"
    )]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Corrupt file '{path}': {reason}")]
    CorruptFormat { path: PathBuf, reason: String },

    #[error("Cluster {cluster} is full ({capacity} slots in use)")]
    ClusterFull { cluster: ClusterId, capacity: usize },

    #[error("Cluster {cluster} has no members, its centroid is undefined")]
    EmptyCluster { cluster: ClusterId },

    #[error("{provider} failed after {attempts} attempt(s): {cause}")]
    ProviderFailure {
        provider: &'static str,
        attempts: u32,
        cause: String,
    },

    #[error("Chunk file for document {doc_id} already exists at '{path}'")]
    ChunkFileExists { doc_id: DocId, path: PathBuf },

    #[error("Index at '{path}' is locked by another writer")]
    WriterLocked { path: PathBuf },

    /// File system errors
    #[error("Failed to read file '{path}': {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to write file '{path}': {source}")]
    FileWrite {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Serialized state (document index, journal) could not be encoded or decoded
    #[error("Failed to persist '{path}': {reason}")]
    PersistenceError { path: PathBuf, reason: String },

    /// Configuration errors
    #[error("Invalid configuration: {reason}")]
    ConfigError { reason: String },
}

impl IndexError {
    /// Get a stable status code for this error type.
    pub fn status_code(&self) -> String {
        match self {
            Self::NotFound(_) => "NOT_FOUND",
            Self::DimensionMismatch { .. } => "DIMENSION_MISMATCH",
            Self::CorruptFormat { .. } => "CORRUPT_FORMAT",
            Self::ClusterFull { .. } => "CLUSTER_FULL",
            Self::EmptyCluster { .. } => "EMPTY_CLUSTER",
            Self::ProviderFailure { .. } => "PROVIDER_FAILURE",
            Self::ChunkFileExists { .. } => "CHUNK_FILE_EXISTS",
            Self::WriterLocked { .. } => "WRITER_LOCKED",
            Self::FileRead { .. } => "FILE_READ_ERROR",
            Self::FileWrite { .. } => "FILE_WRITE_ERROR",
            Self::PersistenceError { .. } => "PERSISTENCE_ERROR",
            Self::ConfigError { .. } => "CONFIG_ERROR",
        }
        .to_string()
    }

    /// Get recovery suggestions for this error
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            Self::CorruptFormat { .. } => vec![
                "Check that the index dimension and cluster capacity match the values used at creation",
                "Re-ingest the affected document into a fresh index directory",
            ],
            Self::ClusterFull { .. } => vec![
                "Increase index.cluster_capacity for a new index",
                "Chunks that did not fit are listed in the batch report",
            ],
            Self::ProviderFailure { .. } => vec![
                "Check that the embedding model is downloaded and the source files are readable",
                "Raise providers.max_attempts if failures are transient",
            ],
            Self::WriterLocked { .. } => vec![
                "Wait for the other ingestion process to finish",
                "Check for another process that has the same index open for writing",
            ],
            Self::DimensionMismatch { .. } => vec![
                "Ensure index.dimension matches the embedding model output",
            ],
            Self::FileRead { .. } | Self::FileWrite { .. } => vec![
                "Check that the file exists and you have read/write permissions",
                "Check available disk space",
            ],
            _ => vec![],
        }
    }

    pub(crate) fn not_found(missing: Missing) -> Self {
        Self::NotFound(missing)
    }

    pub(crate) fn corrupt(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::CorruptFormat {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

/// Failure reported by an external collaborator (embedder, scorer, extractor).
#[derive(Error, Debug)]
#[error("{0}")]
pub struct ProviderError(pub String);

impl ProviderError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Result type alias for index operations
pub type IndexResult<T> = Result<T, IndexError>;

/// Helper trait for attaching a path to IO errors
pub trait ErrorContext<T> {
    fn read_context(self, path: &std::path::Path) -> Result<T, IndexError>;

    fn write_context(self, path: &std::path::Path) -> Result<T, IndexError>;
}

impl<T> ErrorContext<T> for Result<T, std::io::Error> {
    fn read_context(self, path: &std::path::Path) -> Result<T, IndexError> {
        self.map_err(|source| IndexError::FileRead {
            path: path.to_path_buf(),
            source,
        })
    }

    fn write_context(self, path: &std::path::Path) -> Result<T, IndexError> {
        self.map_err(|source| IndexError::FileWrite {
            path: path.to_path_buf(),
            source,
        })
    }
}
