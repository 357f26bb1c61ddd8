//! Settings files drive how an index is opened and queried.

use std::fs;

use anyhow::Result;
use chunkdex::config::ChunkingStrategy;
use chunkdex::query::QueryTarget;
use chunkdex::{IndexError, QueryOptions, Settings, VectorIndex, chunker_from_config};
use tempfile::TempDir;

#[test]
fn test_settings_file_configures_index() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let index_path = temp_dir.path().join("idx");
    let settings_path = temp_dir.path().join("settings.toml");
    fs::write(
        &settings_path,
        format!(
            r#"
[index]
path = "{}"
dimension = 8
cluster_capacity = 50

[query]
lexical_threshold = 0.5
probe_nearest_cluster = true
max_results = 5

[chunking]
strategy = "window"
window_tokens = 64
window_overlap = 8
"#,
            index_path.display()
        ),
    )?;

    let settings = Settings::load_from(&settings_path).map_err(|e| anyhow::anyhow!("{e}"))?;
    assert_eq!(settings.index.dimension, 8);
    assert_eq!(settings.chunking.strategy, ChunkingStrategy::Window);
    assert_eq!(chunker_from_config(&settings.chunking)?.name(), "window");

    let options = QueryOptions::from_config(&settings.query)?;
    assert_eq!(options.target, QueryTarget::Nearest);
    assert_eq!(options.max_results, Some(5));

    let index = VectorIndex::open(&settings)?;
    assert_eq!(index.root(), index_path.as_path());
    assert_eq!(index.dimension().get(), 8);
    assert_eq!(index.metadata().cluster_capacity, 50);
    Ok(())
}

#[test]
fn test_invalid_window_is_rejected() -> Result<()> {
    let mut settings = Settings::default();
    settings.chunking.strategy = ChunkingStrategy::Window;
    settings.chunking.window_tokens = 10;
    settings.chunking.window_overlap = 10;

    assert!(matches!(
        chunker_from_config(&settings.chunking),
        Err(IndexError::ConfigError { .. })
    ));
    Ok(())
}

#[test]
fn test_zero_capacity_is_rejected() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let mut settings = Settings::default();
    settings.index.path = temp_dir.path().join("idx");
    settings.index.cluster_capacity = 0;

    assert!(matches!(
        VectorIndex::open(&settings),
        Err(IndexError::ConfigError { .. })
    ));
    assert!(!settings.index.path.exists());
    Ok(())
}
