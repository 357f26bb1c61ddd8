//! Vector primitives shared by storage, assignment and queries.
//!
//! # Architecture
//! Chunk embeddings live in per-document chunk files and are grouped into
//! centroid-addressed clusters. Assignment uses Euclidean distance to the
//! centroids; candidate scoring uses the dot product of policy-normalized
//! embeddings.

mod distance;
mod embedding;
mod types;

pub use distance::{
    MeanAccumulator, dot_product, euclidean_distance, nearest_centroid, normalize_vector,
};
#[cfg(test)]
pub use embedding::MockEmbeddingProvider;
pub use embedding::{
    EmbeddingPolicy, EmbeddingProvider, FastEmbedProvider, Normalization, default_models_dir,
    fit_dimension, parse_embedding_model,
};
pub use types::{
    CHILD_SLOTS, ChunkIndex, ChunkRecord, ClusterId, DEFAULT_CLUSTER_CAPACITY, DEFAULT_DIMENSION,
    DocId, Slot, VectorDimension,
};
