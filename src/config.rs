//! Configuration module for the chunk index.
//!
//! This module provides a layered configuration system that supports:
//! - Default values
//! - TOML configuration file (`.chunkdex/settings.toml`)
//! - Environment variable overrides
//!
//! # Environment Variables
//!
//! Environment variables must be prefixed with `CHUNKDEX_` and use double
//! underscores to separate nested levels:
//! - `CHUNKDEX_INDEX__CLUSTER_CAPACITY=2000` sets `index.cluster_capacity`
//! - `CHUNKDEX_QUERY__LEXICAL_THRESHOLD=0.5` sets `query.lexical_threshold`
//! - `CHUNKDEX_DEBUG=true` sets `debug`

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{IndexError, IndexResult};
use crate::vector::{
    DEFAULT_CLUSTER_CAPACITY, DEFAULT_DIMENSION, EmbeddingPolicy, Normalization, VectorDimension,
};

/// Name of the workspace directory holding settings and the index.
pub const WORKSPACE_DIR: &str = ".chunkdex";

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Settings {
    /// Version of the configuration schema
    #[serde(default = "default_version")]
    pub version: u32,

    /// Global debug mode (enables debug-level logging)
    #[serde(default = "default_false")]
    pub debug: bool,

    /// On-disk index layout
    #[serde(default)]
    pub index: IndexConfig,

    /// Embedding model and normalization
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Query pipeline settings
    #[serde(default)]
    pub query: QueryConfig,

    /// How source text is split into chunks
    #[serde(default)]
    pub chunking: ChunkingConfig,

    /// Retry policy for external collaborators
    #[serde(default)]
    pub providers: ProviderConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct IndexConfig {
    /// Root directory of the index (documents/, clusters/, doc_index.json)
    #[serde(default = "default_index_path")]
    pub path: PathBuf,

    /// Embedding dimension D, fixed at index creation
    #[serde(default = "default_dimension")]
    pub dimension: usize,

    /// Slots per cluster file, fixed at cluster creation
    #[serde(default = "default_cluster_capacity")]
    pub cluster_capacity: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct EmbeddingConfig {
    /// fastembed model name
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Normalization applied to both document and query embeddings
    #[serde(default)]
    pub normalization: Normalization,

    /// Directory for downloaded models (defaults to the user cache dir)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_dir: Option<PathBuf>,

    /// Show a progress bar while downloading the model
    #[serde(default = "default_false")]
    pub show_download_progress: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct QueryConfig {
    /// Only candidates whose lexical score is strictly above this are reported
    #[serde(default = "default_lexical_threshold")]
    pub lexical_threshold: f32,

    /// Cluster scanned for candidates
    #[serde(default = "default_target_cluster")]
    pub target_cluster: u32,

    /// Scan the cluster nearest to the query instead of `target_cluster`
    #[serde(default = "default_false")]
    pub probe_nearest_cluster: bool,

    /// Maximum number of hits returned (unbounded when absent)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_results: Option<usize>,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChunkingStrategy {
    /// One chunk per tagged symptom block
    TaggedSymptoms,
    /// Sliding windows of whitespace tokens
    Window,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunking_strategy")]
    pub strategy: ChunkingStrategy,

    /// Tokens per window (window strategy)
    #[serde(default = "default_window_tokens")]
    pub window_tokens: usize,

    /// Tokens shared by consecutive windows (window strategy)
    #[serde(default = "default_window_overlap")]
    pub window_overlap: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ProviderConfig {
    /// Attempts per collaborator call before the operation fails
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay between attempts in milliseconds
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

// Default value functions
fn default_version() -> u32 {
    1
}
fn default_false() -> bool {
    false
}
fn default_index_path() -> PathBuf {
    PathBuf::from(WORKSPACE_DIR).join("index")
}
fn default_dimension() -> usize {
    DEFAULT_DIMENSION
}
fn default_cluster_capacity() -> usize {
    DEFAULT_CLUSTER_CAPACITY
}
fn default_embedding_model() -> String {
    "BGELargeENV15".to_string()
}
fn default_lexical_threshold() -> f32 {
    1.0
}
fn default_target_cluster() -> u32 {
    1
}
fn default_chunking_strategy() -> ChunkingStrategy {
    ChunkingStrategy::TaggedSymptoms
}
fn default_window_tokens() -> usize {
    4000
}
fn default_window_overlap() -> usize {
    20
}
fn default_max_attempts() -> u32 {
    3
}
fn default_retry_backoff_ms() -> u64 {
    250
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: default_version(),
            debug: false,
            index: IndexConfig::default(),
            embedding: EmbeddingConfig::default(),
            query: QueryConfig::default(),
            chunking: ChunkingConfig::default(),
            providers: ProviderConfig::default(),
        }
    }
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            path: default_index_path(),
            dimension: default_dimension(),
            cluster_capacity: default_cluster_capacity(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: default_embedding_model(),
            normalization: Normalization::default(),
            cache_dir: None,
            show_download_progress: false,
        }
    }
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            lexical_threshold: default_lexical_threshold(),
            target_cluster: default_target_cluster(),
            probe_nearest_cluster: false,
            max_results: None,
        }
    }
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            strategy: default_chunking_strategy(),
            window_tokens: default_window_tokens(),
            window_overlap: default_window_overlap(),
        }
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

impl IndexConfig {
    /// Validated embedding dimension.
    pub fn dimension(&self) -> IndexResult<VectorDimension> {
        VectorDimension::new(self.dimension)
    }

    pub fn validate(&self) -> IndexResult<()> {
        self.dimension()?;
        if self.cluster_capacity == 0 {
            return Err(IndexError::ConfigError {
                reason: "index.cluster_capacity must be at least 1".to_string(),
            });
        }
        if self.cluster_capacity > i32::MAX as usize {
            return Err(IndexError::ConfigError {
                reason: format!(
                    "index.cluster_capacity {} exceeds the on-disk slot limit",
                    self.cluster_capacity
                ),
            });
        }
        Ok(())
    }
}

impl Settings {
    /// Load configuration from all sources
    pub fn load() -> Result<Self, Box<figment::Error>> {
        let config_path = Self::find_workspace_config()
            .unwrap_or_else(|| PathBuf::from(WORKSPACE_DIR).join("settings.toml"));

        Self::figment(config_path).extract().map_err(Box::new)
    }

    /// Load configuration from a specific file, still honoring env overrides
    pub fn load_from(path: impl AsRef<std::path::Path>) -> Result<Self, Box<figment::Error>> {
        Self::figment(path.as_ref().to_path_buf())
            .extract()
            .map_err(Box::new)
    }

    fn figment(config_path: PathBuf) -> Figment {
        Figment::new()
            // Start with defaults
            .merge(Serialized::defaults(Settings::default()))
            // Layer in config file if it exists
            .merge(Toml::file(config_path))
            // Double underscore (__) separates nested levels
            .merge(Env::prefixed("CHUNKDEX_").map(|key| {
                key.as_str().to_lowercase().replace("__", ".").into()
            }))
    }

    /// Find `.chunkdex/settings.toml` searching from the current directory up
    fn find_workspace_config() -> Option<PathBuf> {
        let current = std::env::current_dir().ok()?;

        for ancestor in current.ancestors() {
            let config_dir = ancestor.join(WORKSPACE_DIR);
            if config_dir.is_dir() {
                return Some(config_dir.join("settings.toml"));
            }
        }

        None
    }

    /// Save current configuration to file
    pub fn save(
        &self,
        path: impl AsRef<std::path::Path>,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let parent = path.as_ref().parent().ok_or("Invalid path")?;
        std::fs::create_dir_all(parent)?;

        let toml_string = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_string)?;

        Ok(())
    }

    /// Embedding policy shared by ingestion and queries
    pub fn embedding_policy(&self) -> IndexResult<EmbeddingPolicy> {
        Ok(EmbeddingPolicy::new(
            self.embedding.normalization,
            self.index.dimension()?,
        ))
    }
}
