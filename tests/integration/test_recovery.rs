//! Crash recovery, writer exclusion and provider retries.

use std::fs;
use std::sync::atomic::Ordering;

use anyhow::Result;
use chunkdex::storage::{
    CLUSTERS_DIR, CentroidJournal, DOC_INDEX_FILE, DocumentIndex, JOURNAL_FILE, LOCK_FILE,
    WriterLock,
};
use chunkdex::{
    Bm25Scorer, ChunkIndex, ChunkRecord, ClusterId, DocId, EmbeddingProvider, IndexError,
    IngestOutcome, IngestPipeline, QueryEngine, RetryPolicy, VectorIndex, WindowChunker,
};
use std::time::Duration;
use tempfile::TempDir;

use crate::common::{FlakyExtractor, KeywordEmbedder, MemoryExtractor, settings_for};

#[test]
fn test_open_replays_interrupted_batch() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let mut settings = settings_for(temp_dir.path(), 2, 8);
    settings.embedding.normalization = chunkdex::Normalization::None;
    let doc = DocId::new(1).expect("non-zero id");

    {
        let index = VectorIndex::open(&settings)?;
        index
            .chunks()
            .store()
            .create(doc, &[ChunkRecord::new(0, 3, vec![3.0, 1.0])])?;

        // Journal entry written, slot written, centroid never recomputed
        let mut journal =
            CentroidJournal::load(settings.index.path.join(CLUSTERS_DIR).join(JOURNAL_FILE))?;
        journal.record([ClusterId::INITIAL], doc)?;
        index
            .clusters()
            .assign_slot(ClusterId::INITIAL, doc, ChunkIndex::new(0))?;
    }

    let index = VectorIndex::open(&settings)?;
    assert!(index.journal().is_empty());
    assert_eq!(index.stats()?.pending_centroids, 0);

    let centroid: Vec<f32> = index.clusters().open(ClusterId::INITIAL)?.centroid().collect();
    assert_eq!(centroid, vec![3.0, 1.0]);
    Ok(())
}

#[test]
fn test_recover_is_a_no_op_on_clean_index() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let settings = settings_for(temp_dir.path(), 2, 8);
    let mut index = VectorIndex::open(&settings)?;

    assert!(index.recover()?.is_empty());
    drop(WriterLock::acquire(&settings.index.path)?);
    Ok(())
}

#[test]
fn test_recover_assigns_chunks_stored_before_a_crash() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let settings = settings_for(temp_dir.path(), 4, 8);
    let embedder = KeywordEmbedder::symptoms();
    let text = "cough";

    {
        let index = VectorIndex::open(&settings)?;
        // Mapped and stored, then killed before any slot was written
        let mut documents = DocumentIndex::load(settings.index.path.join(DOC_INDEX_FILE))?;
        let doc = documents.assign("a.txt")?;
        let embedding = index.policy().apply(embedder.embed(text)?);
        index
            .chunks()
            .store()
            .create(doc, &[ChunkRecord::new(0, text.len() as u32, embedding)])?;
    }

    let mut index = VectorIndex::open(&settings)?;
    assert!(index.is_indexed("a.txt"));
    assert_eq!(index.stats()?.clusters[0].members, 0);

    let report = index.recover()?;
    assert_eq!(report.reassigned.len(), 1);
    assert_eq!(report.reassigned[0].assigned.len(), 1);
    assert_eq!(index.stats()?.clusters[0].members, 1);

    let extractor = MemoryExtractor::default().with("a.txt", text);
    let scorer = Bm25Scorer::default();
    let result = QueryEngine::new(&index, &embedder, &scorer, &extractor).query("cough")?;
    assert_eq!(result.similarity_ranked.len(), 1);
    assert_eq!(
        result.similarity_ranked[0].doc_id,
        index.documents().lookup_by_key("a.txt")?
    );
    Ok(())
}

#[test]
fn test_leftover_lock_file_does_not_block_replay() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let mut settings = settings_for(temp_dir.path(), 2, 8);
    settings.embedding.normalization = chunkdex::Normalization::None;
    let doc = DocId::new(1).expect("non-zero id");

    {
        let index = VectorIndex::open(&settings)?;
        index
            .chunks()
            .store()
            .create(doc, &[ChunkRecord::new(0, 3, vec![5.0, 1.0])])?;
        let mut journal =
            CentroidJournal::load(settings.index.path.join(CLUSTERS_DIR).join(JOURNAL_FILE))?;
        journal.record([ClusterId::INITIAL], doc)?;
        index
            .clusters()
            .assign_slot(ClusterId::INITIAL, doc, ChunkIndex::new(0))?;
    }
    // What a killed writer leaves behind: its pid and an unreleased journal
    fs::write(settings.index.path.join(LOCK_FILE), "4242\n")?;

    let index = VectorIndex::open(&settings)?;
    assert!(index.journal().is_empty());
    let centroid: Vec<f32> = index.clusters().open(ClusterId::INITIAL)?.centroid().collect();
    assert_eq!(centroid, vec![5.0, 1.0]);
    Ok(())
}

#[test]
fn test_held_lock_blocks_writers_until_released() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let settings = settings_for(temp_dir.path(), 2, 8);
    let mut index = VectorIndex::open(&settings)?;

    let held = WriterLock::acquire(&settings.index.path)?;
    let records = [ChunkRecord::new(0, 1, vec![1.0, 0.0])];
    let err = index
        .ingest_document("a.txt", &records)
        .expect_err("lock is held");
    assert!(matches!(err, IndexError::WriterLocked { .. }));
    assert!(!index.documents().contains_key("a.txt"));

    // Opening an initialized index does not need the lock
    drop(VectorIndex::open(&settings)?);

    drop(held);
    let report = index.ingest_document("a.txt", &records)?;
    assert_eq!(report.doc_id.get(), 1);
    Ok(())
}

#[test]
fn test_fresh_index_needs_the_lock() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let settings = settings_for(temp_dir.path(), 2, 8);
    fs::create_dir_all(&settings.index.path)?;
    let _held = WriterLock::acquire(&settings.index.path)?;

    assert!(matches!(
        VectorIndex::open(&settings),
        Err(IndexError::WriterLocked { .. })
    ));
    Ok(())
}

#[test]
fn test_transient_extractor_failures_are_retried() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let settings = settings_for(temp_dir.path(), 4, 8);
    let mut index = VectorIndex::open(&settings)?;

    let extractor = FlakyExtractor::new(
        MemoryExtractor::default().with("notes.txt", "fever and cough since monday"),
        2,
    );
    let chunker = WindowChunker::new(3, 1)?;
    let embedder = KeywordEmbedder::symptoms();
    let pipeline = IngestPipeline::new(&extractor, &chunker, &embedder)
        .with_retry(RetryPolicy::new(3, Duration::ZERO));

    let outcome = pipeline.ingest_source(&mut index, "notes.txt")?;
    assert!(matches!(outcome, IngestOutcome::Indexed(ref report) if report.assigned.len() == 2));
    assert_eq!(extractor.calls.load(Ordering::SeqCst), 3);
    Ok(())
}

#[test]
fn test_exhausted_retries_fail_the_document_only() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let settings = settings_for(temp_dir.path(), 4, 8);
    let mut index = VectorIndex::open(&settings)?;

    let extractor = FlakyExtractor::new(
        MemoryExtractor::default().with("notes.txt", "cough"),
        5,
    );
    let chunker = WindowChunker::new(3, 1)?;
    let embedder = KeywordEmbedder::symptoms();
    let pipeline = IngestPipeline::new(&extractor, &chunker, &embedder)
        .with_retry(RetryPolicy::new(3, Duration::ZERO));

    let report = pipeline.ingest_many(&mut index, &["notes.txt"])?;
    assert!(report.indexed.is_empty());
    assert!(matches!(
        report.failed[0].error,
        IndexError::ProviderFailure { attempts: 3, .. }
    ));
    assert_eq!(index.documents().next_id(), 1);
    Ok(())
}
