//! Answering text queries from the index.

pub mod engine;
pub mod lexical;

pub use engine::{
    QueryEngine, QueryHit, QueryOptions, QueryReport, QueryTarget, RankedCandidate, SkipReason,
    SkippedCandidate,
};
pub use lexical::{Bm25Scorer, LexicalScorer};
