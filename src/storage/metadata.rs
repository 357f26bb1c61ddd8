//! Index metadata: the layout parameters fixed at creation.

use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::{IndexError, IndexResult};
use crate::storage::atomic;

/// Metadata file name in the index root.
pub const METADATA_FILE: &str = "index.meta";

/// Version of the on-disk layout
const FORMAT_VERSION: u32 = 1;

/// Parameters every chunk and cluster file of an index depends on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexMetadata {
    /// Version of the index format
    pub version: u32,

    /// Embedding dimension D
    pub dimension: usize,

    /// Slots per cluster file
    pub cluster_capacity: usize,

    /// Creation timestamp (seconds since the Unix epoch)
    pub created_at: u64,
}

impl IndexMetadata {
    pub fn new(dimension: usize, cluster_capacity: usize) -> Self {
        Self {
            version: FORMAT_VERSION,
            dimension,
            cluster_capacity,
            created_at: unix_timestamp(),
        }
    }

    /// Loads the metadata of an existing index, or writes it for a new one.
    ///
    /// # Errors
    /// `ConfigError` if the index was created with a different dimension or
    /// capacity; `CorruptFormat` for an unknown format version.
    pub fn load_or_create(
        root: &Path,
        dimension: usize,
        cluster_capacity: usize,
    ) -> IndexResult<Self> {
        let path = root.join(METADATA_FILE);
        match atomic::read_json::<Self>(&path)? {
            Some(existing) => {
                if existing.version != FORMAT_VERSION {
                    return Err(IndexError::corrupt(
                        &path,
                        format!("unsupported index format version {}", existing.version),
                    ));
                }
                if existing.dimension != dimension || existing.cluster_capacity != cluster_capacity
                {
                    return Err(IndexError::ConfigError {
                        reason: format!(
                            "index at '{}' was created with dimension {} and cluster capacity {}, configuration asks for {dimension} and {cluster_capacity}",
                            root.display(),
                            existing.dimension,
                            existing.cluster_capacity
                        ),
                    });
                }
                Ok(existing)
            }
            None => {
                let metadata = Self::new(dimension, cluster_capacity);
                atomic::write_json_atomic(&path, &metadata)?;
                Ok(metadata)
            }
        }
    }
}

fn unix_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
