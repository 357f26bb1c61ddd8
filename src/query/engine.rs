//! Query execution: embed, gather, rank, resolve, rerank.

use std::collections::HashMap;
use std::fmt;

use crate::config::QueryConfig;
use crate::error::{IndexError, IndexResult, Missing};
use crate::index::VectorIndex;
use crate::indexing::chunking::char_slice;
use crate::query::lexical::LexicalScorer;
use crate::retry::RetryPolicy;
use crate::sources::{NameResolver, TextExtractor};
use crate::vector::{ChunkIndex, ClusterId, DocId, EmbeddingProvider};

/// Which cluster a query scans.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryTarget {
    Cluster(ClusterId),
    /// The cluster whose centroid is nearest to the query embedding
    Nearest,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QueryOptions {
    /// Hits need a lexical score strictly above this
    pub lexical_threshold: f32,
    pub target: QueryTarget,
    pub max_results: Option<usize>,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            lexical_threshold: 1.0,
            target: QueryTarget::Cluster(ClusterId::INITIAL),
            max_results: None,
        }
    }
}

impl QueryOptions {
    /// # Errors
    /// `ConfigError` for a target cluster id of zero.
    pub fn from_config(config: &QueryConfig) -> IndexResult<Self> {
        let target = if config.probe_nearest_cluster {
            QueryTarget::Nearest
        } else {
            QueryTarget::Cluster(ClusterId::new(config.target_cluster).ok_or_else(|| {
                IndexError::ConfigError {
                    reason: "query.target_cluster must be at least 1".to_string(),
                }
            })?)
        };
        Ok(Self {
            lexical_threshold: config.lexical_threshold,
            target,
            max_results: config.max_results,
        })
    }
}

/// A cluster member scored by embedding similarity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RankedCandidate {
    pub doc_id: DocId,
    pub chunk_index: ChunkIndex,
    pub similarity: f32,
    pub start_offset: u32,
    pub end_offset: u32,
}

/// Why a cluster member did not make it to lexical reranking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// The referenced chunk file or record is missing
    MissingChunk(String),
    /// The document's key mapping was deleted
    DocumentDeleted,
    /// The stored span does not fit the extracted text
    SpanOutOfRange { start: u32, end: u32, text_chars: usize },
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingChunk(detail) => write!(f, "missing chunk: {detail}"),
            Self::DocumentDeleted => write!(f, "document deleted"),
            Self::SpanOutOfRange {
                start,
                end,
                text_chars,
            } => write!(
                f,
                "span {start}..{end} outside document text of {text_chars} characters"
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SkippedCandidate {
    pub doc_id: DocId,
    pub chunk_index: ChunkIndex,
    pub reason: SkipReason,
}

/// A reranked result.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryHit {
    pub doc_id: DocId,
    pub chunk_index: ChunkIndex,
    pub document_key: String,
    /// Downstream identifier from the name resolver, when one is configured
    pub label: Option<String>,
    pub similarity: f32,
    pub lexical_score: f32,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueryReport {
    /// The cluster that was scanned
    pub cluster: ClusterId,
    /// Hits above the lexical threshold, best first
    pub hits: Vec<QueryHit>,
    /// Every gathered candidate, most similar first
    pub similarity_ranked: Vec<RankedCandidate>,
    pub skipped: Vec<SkippedCandidate>,
}

/// Runs queries against one index.
pub struct QueryEngine<'a> {
    index: &'a VectorIndex,
    embedder: &'a dyn EmbeddingProvider,
    scorer: &'a dyn LexicalScorer,
    extractor: &'a dyn TextExtractor,
    names: Option<&'a dyn NameResolver>,
    retry: RetryPolicy,
    options: QueryOptions,
}

impl<'a> QueryEngine<'a> {
    pub fn new(
        index: &'a VectorIndex,
        embedder: &'a dyn EmbeddingProvider,
        scorer: &'a dyn LexicalScorer,
        extractor: &'a dyn TextExtractor,
    ) -> Self {
        Self {
            index,
            embedder,
            scorer,
            extractor,
            names: None,
            retry: RetryPolicy::default(),
            options: QueryOptions::default(),
        }
    }

    pub fn with_name_resolver(mut self, names: &'a dyn NameResolver) -> Self {
        self.names = Some(names);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_options(mut self, options: QueryOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> &QueryOptions {
        &self.options
    }

    /// Runs one query end to end.
    ///
    /// # Errors
    /// `ProviderFailure` when the embedder, extractor or scorer keeps failing;
    /// storage errors from reading clusters and chunk files.
    pub fn query(&self, text: &str) -> IndexResult<QueryReport> {
        let embedding = self.embed(text)?;
        let cluster = match self.options.target {
            QueryTarget::Cluster(id) => id,
            QueryTarget::Nearest => self.index.clusters().nearest_cluster(&embedding)?,
        };

        let mut skipped = Vec::new();
        let mut ranked = self.gather_candidates(cluster, &embedding, &mut skipped)?;
        rank_by_similarity(&mut ranked);

        let spans = self.resolve_spans(&ranked, &mut skipped)?;
        let hits = self.rerank(text, spans)?;

        tracing::debug!(
            "query scanned cluster {cluster}: {} candidates, {} skipped, {} hits",
            ranked.len(),
            skipped.len(),
            hits.len()
        );
        Ok(QueryReport {
            cluster,
            hits,
            similarity_ranked: ranked,
            skipped,
        })
    }

    fn embed(&self, text: &str) -> IndexResult<Vec<f32>> {
        let raw = self
            .retry
            .run(self.embedder.name(), || self.embedder.embed(text))?;
        Ok(self.index.policy().apply(raw))
    }

    /// Scores every member of `cluster` by dot product with `embedding`, in
    /// slot order.
    ///
    /// Members whose chunk cannot be found are reported in `skipped`.
    pub fn gather_candidates(
        &self,
        cluster: ClusterId,
        embedding: &[f32],
        skipped: &mut Vec<SkippedCandidate>,
    ) -> IndexResult<Vec<RankedCandidate>> {
        self.index.dimension().validate_vector(embedding)?;
        let file = self.index.clusters().open(cluster)?;

        let mut candidates = Vec::with_capacity(file.member_count());
        for slot in file.members() {
            let resolved = self
                .index
                .chunks()
                .handle(slot.doc_id)
                .and_then(|chunks| {
                    let view = chunks.get(slot.chunk_index)?;
                    Ok(RankedCandidate {
                        doc_id: slot.doc_id,
                        chunk_index: slot.chunk_index,
                        similarity: view.dot(embedding),
                        start_offset: view.start_offset(),
                        end_offset: view.end_offset(),
                    })
                });

            match resolved {
                Ok(candidate) => candidates.push(candidate),
                Err(IndexError::NotFound(missing)) => {
                    tracing::warn!("cluster {cluster} references missing {missing}");
                    skipped.push(SkippedCandidate {
                        doc_id: slot.doc_id,
                        chunk_index: slot.chunk_index,
                        reason: SkipReason::MissingChunk(missing.to_string()),
                    });
                }
                Err(e) => return Err(e),
            }
        }
        Ok(candidates)
    }

    /// Extracts each document once and slices out candidate spans.
    fn resolve_spans(
        &self,
        ranked: &[RankedCandidate],
        skipped: &mut Vec<SkippedCandidate>,
    ) -> IndexResult<Vec<(RankedCandidate, String, String)>> {
        let mut texts: HashMap<DocId, String> = HashMap::new();
        let mut spans = Vec::with_capacity(ranked.len());

        for candidate in ranked {
            let key = match self.index.documents().lookup_by_id(candidate.doc_id) {
                Ok(key) => key,
                Err(IndexError::NotFound(Missing::DocumentId(_))) => {
                    skipped.push(SkippedCandidate {
                        doc_id: candidate.doc_id,
                        chunk_index: candidate.chunk_index,
                        reason: SkipReason::DocumentDeleted,
                    });
                    continue;
                }
                Err(e) => return Err(e),
            };

            if !texts.contains_key(&candidate.doc_id) {
                let extracted = self
                    .retry
                    .run(self.extractor.name(), || self.extractor.extract(key))?;
                texts.insert(candidate.doc_id, extracted);
            }
            let text = &texts[&candidate.doc_id];

            match char_slice(
                text,
                candidate.start_offset as usize,
                candidate.end_offset as usize,
            ) {
                Some(span) => spans.push((*candidate, key.to_string(), span.to_string())),
                None => skipped.push(SkippedCandidate {
                    doc_id: candidate.doc_id,
                    chunk_index: candidate.chunk_index,
                    reason: SkipReason::SpanOutOfRange {
                        start: candidate.start_offset,
                        end: candidate.end_offset,
                        text_chars: text.chars().count(),
                    },
                }),
            }
        }
        Ok(spans)
    }

    fn rerank(
        &self,
        query: &str,
        spans: Vec<(RankedCandidate, String, String)>,
    ) -> IndexResult<Vec<QueryHit>> {
        if spans.is_empty() {
            return Ok(Vec::new());
        }

        let tokens: Vec<&str> = query.split_whitespace().collect();
        let corpus: Vec<&str> = spans.iter().map(|(_, _, span)| span.as_str()).collect();
        let scores = self
            .retry
            .run(self.scorer.name(), || self.scorer.score(&tokens, &corpus))?;
        if scores.len() != corpus.len() {
            return Err(IndexError::ProviderFailure {
                provider: self.scorer.name(),
                attempts: 1,
                cause: format!(
                    "returned {} scores for {} spans",
                    scores.len(),
                    corpus.len()
                ),
            });
        }

        let mut hits: Vec<QueryHit> = spans
            .into_iter()
            .zip(scores)
            .map(|((candidate, key, span), score)| QueryHit {
                doc_id: candidate.doc_id,
                chunk_index: candidate.chunk_index,
                label: self.names.and_then(|names| names.resolve(&key)),
                document_key: key,
                similarity: candidate.similarity,
                lexical_score: score,
                text: span,
            })
            .collect();

        // Stable: equal scores keep similarity order
        hits.sort_by(|a, b| b.lexical_score.total_cmp(&a.lexical_score));
        hits.retain(|hit| hit.lexical_score > self.options.lexical_threshold);
        if let Some(limit) = self.options.max_results {
            hits.truncate(limit);
        }
        Ok(hits)
    }
}

/// Ascending by `1 - similarity`, ties in gather order.
fn rank_by_similarity(candidates: &mut [RankedCandidate]) {
    candidates.sort_by(|a, b| (1.0 - a.similarity).total_cmp(&(1.0 - b.similarity)));
}
