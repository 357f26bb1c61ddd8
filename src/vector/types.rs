//! Type-safe identifiers and records shared by the chunk and cluster stores.
//!
//! Document and cluster identifiers wrap `NonZeroU32` because a zero
//! `doc_id` is the on-disk sentinel for an empty cluster slot.

use std::fmt;
use std::num::NonZeroU32;

use crate::error::{IndexError, IndexResult};

/// Default embedding dimension (BGE large / BGE-M3 family output size).
pub const DEFAULT_DIMENSION: usize = 1024;

/// Default number of slots per cluster file.
pub const DEFAULT_CLUSTER_CAPACITY: usize = 1000;

/// Number of reserved child-cluster values stored after each centroid.
pub const CHILD_SLOTS: usize = 10;

/// Identifier of an ingested document.
///
/// Allocated by the document index starting at 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocId(NonZeroU32);

impl DocId {
    /// Largest id a cluster slot can hold; slots store ids as `i32`.
    pub const MAX: u32 = i32::MAX as u32;

    /// Creates a `DocId`, returning `None` for zero.
    #[must_use]
    pub fn new(id: u32) -> Option<Self> {
        NonZeroU32::new(id).map(Self)
    }

    #[must_use]
    pub fn get(&self) -> u32 {
        self.0.get()
    }
}

impl fmt::Display for DocId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Position of a chunk record inside its document's chunk file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChunkIndex(u32);

impl ChunkIndex {
    #[must_use]
    pub const fn new(index: u32) -> Self {
        Self(index)
    }

    #[must_use]
    pub const fn get(&self) -> u32 {
        self.0
    }

    #[must_use]
    pub const fn as_usize(&self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ChunkIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a cluster file (`clusters/cluster_<n>.cluster`).
///
/// Cluster ids start at 1 and storage order is ascending id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClusterId(NonZeroU32);

impl ClusterId {
    /// The cluster created when an index is first opened.
    pub const INITIAL: ClusterId = ClusterId(NonZeroU32::MIN);

    #[must_use]
    pub fn new(id: u32) -> Option<Self> {
        NonZeroU32::new(id).map(Self)
    }

    #[must_use]
    pub fn get(&self) -> u32 {
        self.0.get()
    }
}

impl fmt::Display for ClusterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A non-empty reference from a cluster slot to a chunk record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Slot {
    pub doc_id: DocId,
    pub chunk_index: ChunkIndex,
}

impl Slot {
    #[must_use]
    pub fn new(doc_id: DocId, chunk_index: ChunkIndex) -> Self {
        Self {
            doc_id,
            chunk_index,
        }
    }
}

/// An owned chunk record: a character span plus its embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkRecord {
    pub start_offset: u32,
    pub end_offset: u32,
    pub embedding: Vec<f32>,
}

impl ChunkRecord {
    #[must_use]
    pub fn new(start_offset: u32, end_offset: u32, embedding: Vec<f32>) -> Self {
        Self {
            start_offset,
            end_offset,
            embedding,
        }
    }
}

/// Type-safe wrapper for vector dimensions.
///
/// Every chunk file and cluster file of an index shares one dimension,
/// fixed when the index is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VectorDimension(usize);

impl VectorDimension {
    /// Creates a new `VectorDimension`, rejecting zero.
    pub fn new(dim: usize) -> IndexResult<Self> {
        if dim == 0 {
            return Err(IndexError::ConfigError {
                reason: "vector dimension cannot be zero".to_string(),
            });
        }
        Ok(Self(dim))
    }

    #[must_use]
    pub const fn get(&self) -> usize {
        self.0
    }

    /// Validates that a vector has the expected dimension.
    pub fn validate_vector(&self, vector: &[f32]) -> IndexResult<()> {
        if vector.len() != self.0 {
            return Err(IndexError::DimensionMismatch {
                expected: self.0,
                actual: vector.len(),
            });
        }
        Ok(())
    }
}

impl Default for VectorDimension {
    fn default() -> Self {
        Self(DEFAULT_DIMENSION)
    }
}
