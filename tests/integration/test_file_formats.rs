//! On-disk layouts other tools read directly.

use std::fs;

use anyhow::Result;
use chunkdex::storage::{CLUSTERS_DIR, DOC_INDEX_FILE, DOCUMENTS_DIR};
use chunkdex::{ChunkRecord, Normalization, VectorIndex};
use tempfile::TempDir;

use crate::common::settings_for;

fn le_u32(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes(bytes[at..at + 4].try_into().expect("4 bytes"))
}

fn le_i32(bytes: &[u8], at: usize) -> i32 {
    i32::from_le_bytes(bytes[at..at + 4].try_into().expect("4 bytes"))
}

fn le_f32(bytes: &[u8], at: usize) -> f32 {
    f32::from_le_bytes(bytes[at..at + 4].try_into().expect("4 bytes"))
}

#[test]
fn test_chunk_and_cluster_file_layout() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let mut settings = settings_for(temp_dir.path(), 3, 4);
    settings.embedding.normalization = Normalization::None;
    let mut index = VectorIndex::open(&settings)?;

    index.ingest_document(
        "a.txt",
        &[
            ChunkRecord::new(0, 12, vec![1.0, -2.0, 0.5]),
            ChunkRecord::new(12, 30, vec![3.0, 0.0, 1.5]),
        ],
    )?;

    // Headerless records of 8 + 4D bytes
    let chunk_bytes = fs::read(settings.index.path.join(DOCUMENTS_DIR).join("1.chunks"))?;
    assert_eq!(chunk_bytes.len(), 2 * (8 + 4 * 3));
    assert_eq!(le_u32(&chunk_bytes, 0), 0);
    assert_eq!(le_u32(&chunk_bytes, 4), 12);
    assert_eq!(le_f32(&chunk_bytes, 8), 1.0);
    assert_eq!(le_f32(&chunk_bytes, 12), -2.0);
    assert_eq!(le_u32(&chunk_bytes, 20), 12);
    assert_eq!(le_u32(&chunk_bytes, 24), 30);

    // id, capacity slots, centroid, ten child slots
    let cluster_bytes = fs::read(settings.index.path.join(CLUSTERS_DIR).join("cluster_1.cluster"))?;
    assert_eq!(cluster_bytes.len(), 4 + 8 * 4 + 4 * 3 + 40);
    assert_eq!(le_i32(&cluster_bytes, 0), 1);
    assert_eq!((le_i32(&cluster_bytes, 4), le_i32(&cluster_bytes, 8)), (1, 0));
    assert_eq!((le_i32(&cluster_bytes, 12), le_i32(&cluster_bytes, 16)), (1, 1));
    assert_eq!((le_i32(&cluster_bytes, 20), le_i32(&cluster_bytes, 24)), (0, 0));

    let centroid_at = 4 + 8 * 4;
    let centroid: Vec<f32> = (0..3).map(|i| le_f32(&cluster_bytes, centroid_at + 4 * i)).collect();
    assert_eq!(centroid, vec![2.0, -1.0, 1.0]);
    Ok(())
}

#[test]
fn test_document_index_record() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let settings = settings_for(temp_dir.path(), 2, 4);
    let mut index = VectorIndex::open(&settings)?;

    index.ingest_document("a.txt", &[ChunkRecord::new(0, 1, vec![1.0, 0.0])])?;
    index.ingest_document("b.txt", &[ChunkRecord::new(0, 1, vec![0.0, 1.0])])?;
    index.delete_document("a.txt")?;

    let raw = fs::read_to_string(settings.index.path.join(DOC_INDEX_FILE))?;
    let record: serde_json::Value = serde_json::from_str(&raw)?;
    assert_eq!(record["version"], 1);
    assert_eq!(record["next_id"], 3);
    assert_eq!(record["entries"], serde_json::json!({"b.txt": 2}));
    Ok(())
}
