//! Turning documents into clustered chunk records.

pub mod assignment;
pub mod chunking;
pub mod pipeline;

pub use assignment::{AssignmentEngine, BatchReport, ChunkFailure};
pub use chunking::{Chunker, TaggedSymptomChunker, TextChunk, WindowChunker, chunker_from_config};
pub use pipeline::{DocumentFailure, IngestOutcome, IngestPipeline, IngestReport};
