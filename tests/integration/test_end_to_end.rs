//! Ingest tagged symptom files from disk and query them back.

use std::fs;

use anyhow::Result;
use chunkdex::{
    Bm25Scorer, ChunkIndex, ClusterId, IngestPipeline, MapNameResolver, PlainTextExtractor,
    QueryEngine, QueryOptions, RetryPolicy, TaggedSymptomChunker, VectorIndex,
};
use tempfile::TempDir;

use crate::common::{KeywordEmbedder, general_document, respiratory_document, settings_for};

fn write_sources(temp_dir: &TempDir) -> Result<PlainTextExtractor> {
    let sources = temp_dir.path().join("sources");
    fs::create_dir_all(&sources)?;
    fs::write(sources.join("Respiratory.txt"), respiratory_document())?;
    fs::write(sources.join("General.txt"), general_document())?;
    Ok(PlainTextExtractor::new(sources))
}

#[test]
fn test_ingest_and_query_symptom_files() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let settings = settings_for(temp_dir.path(), 4, 32);
    let extractor = write_sources(&temp_dir)?;
    let embedder = KeywordEmbedder::symptoms();
    let retry = RetryPolicy::from(&settings.providers);

    let mut index = VectorIndex::open(&settings)?;
    let keys = extractor.list_keys()?;
    assert_eq!(keys, vec!["General.txt", "Respiratory.txt"]);

    let report = IngestPipeline::new(&extractor, &TaggedSymptomChunker, &embedder)
        .with_retry(retry)
        .ingest_many(&mut index, &keys)?;
    assert_eq!(report.indexed.len(), 2);
    assert_eq!(report.assigned_chunks(), 6);
    assert!(report.failed.is_empty());

    let names_path = temp_dir.path().join("names.json");
    fs::write(&names_path, r#"{"Respiratory": 7, "General": "12"}"#)?;
    let names = MapNameResolver::from_json_file(&names_path)?;

    let scorer = Bm25Scorer::default();
    let query = QueryEngine::new(&index, &embedder, &scorer, &extractor)
        .with_name_resolver(&names)
        .with_retry(retry)
        .with_options(QueryOptions::from_config(&settings.query)?)
        .query("cough")?;

    assert_eq!(query.cluster, ClusterId::INITIAL);
    assert_eq!(query.similarity_ranked.len(), 6);
    assert!(query.skipped.is_empty());

    // The cough block is the only candidate sharing the query's direction
    let best = query.similarity_ranked[0];
    let respiratory = index.documents().lookup_by_key("Respiratory.txt")?;
    assert_eq!(best.doc_id, respiratory);
    assert_eq!(best.chunk_index, ChunkIndex::new(0));
    assert!((best.similarity - 1.0).abs() < 1e-5);

    assert_eq!(query.hits.len(), 1);
    let hit = &query.hits[0];
    assert_eq!(hit.document_key, "Respiratory.txt");
    assert_eq!(hit.label.as_deref(), Some("7"));
    assert!(hit.text.starts_with("<start_symptom_name>Cough"));
    assert!(hit.text.ends_with("</start_monologues>"));
    assert!((hit.lexical_score - (5.5f32 / 1.5).ln()).abs() < 1e-4);
    Ok(())
}

#[test]
fn test_index_survives_reopen() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let settings = settings_for(temp_dir.path(), 4, 32);
    let extractor = write_sources(&temp_dir)?;
    let embedder = KeywordEmbedder::symptoms();

    {
        let mut index = VectorIndex::open(&settings)?;
        IngestPipeline::new(&extractor, &TaggedSymptomChunker, &embedder)
            .ingest_many(&mut index, &["Respiratory.txt"])?;
    }

    let mut index = VectorIndex::open(&settings)?;
    let stats = index.stats()?;
    assert_eq!(stats.documents, 1);
    assert_eq!(stats.next_doc_id, 2);
    assert_eq!(stats.clusters[0].members, 3);
    assert_eq!(stats.pending_centroids, 0);

    // Already indexed keys are skipped, new keys continue the counter
    let report = IngestPipeline::new(&extractor, &TaggedSymptomChunker, &embedder)
        .ingest_many(&mut index, &["Respiratory.txt", "General.txt"])?;
    assert_eq!(report.skipped.len(), 1);
    assert_eq!(report.indexed[0].1.doc_id.get(), 2);
    assert_eq!(index.stats()?.clusters[0].members, 6);
    Ok(())
}

#[test]
fn test_centroid_is_mean_of_members() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let mut settings = settings_for(temp_dir.path(), 4, 32);
    settings.embedding.normalization = chunkdex::Normalization::None;
    let extractor = write_sources(&temp_dir)?;
    let embedder = KeywordEmbedder::symptoms();

    let mut index = VectorIndex::open(&settings)?;
    IngestPipeline::new(&extractor, &TaggedSymptomChunker, &embedder)
        .ingest_many(&mut index, &["Respiratory.txt"])?;

    let doc_id = index.documents().lookup_by_key("Respiratory.txt")?;
    let chunks = index.chunks().handle(doc_id)?;
    let mut expected = vec![0.0f32; 4];
    for view in chunks.iter() {
        for (sum, value) in expected.iter_mut().zip(view.embedding()) {
            *sum += value;
        }
    }
    for value in &mut expected {
        *value /= chunks.len() as f32;
    }

    let centroid: Vec<f32> = index.clusters().open(ClusterId::INITIAL)?.centroid().collect();
    for (actual, expected) in centroid.iter().zip(&expected) {
        assert!((actual - expected).abs() < 1e-6);
    }
    Ok(())
}
