//! chunkdex: a disk-backed chunk index with cluster-scoped vector search and
//! lexical reranking.
//!
//! Documents are split into chunks, embedded, stored as fixed-record chunk
//! files and referenced from centroid-bearing cluster files. Queries scan one
//! cluster by dot product, then rerank the resolved text spans with BM25.

pub mod config;
pub mod error;
pub mod index;
pub mod indexing;
pub mod logging;
pub mod query;
pub mod retry;
pub mod sources;
pub mod storage;
pub mod vector;

// Explicit exports for better API clarity
pub use config::Settings;
pub use error::{IndexError, IndexResult, Missing, ProviderError};
pub use index::{ClusterStats, IndexStats, RecoveryReport, VectorIndex};
pub use indexing::{
    BatchReport, Chunker, IngestOutcome, IngestPipeline, IngestReport, TaggedSymptomChunker,
    WindowChunker, chunker_from_config,
};
pub use query::{Bm25Scorer, LexicalScorer, QueryEngine, QueryHit, QueryOptions, QueryReport};
pub use retry::RetryPolicy;
pub use sources::{MapNameResolver, NameResolver, PlainTextExtractor, TextExtractor};
pub use vector::{
    ChunkIndex, ChunkRecord, ClusterId, DocId, EmbeddingPolicy, EmbeddingProvider,
    FastEmbedProvider, Normalization,
};
