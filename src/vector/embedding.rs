//! Embedding providers and the policy that makes their output comparable.
//!
//! Document chunks and queries pass through the same [`EmbeddingPolicy`]
//! before they reach the index, so the dot product used for candidate
//! scoring compares vectors from one space. The default policy normalizes to
//! unit length, which makes the dot product a cosine similarity.

use std::path::PathBuf;
use std::sync::Mutex;

use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use serde::{Deserialize, Serialize};

use crate::config::EmbeddingConfig;
use crate::error::{IndexError, IndexResult, ProviderError};
use crate::vector::distance::normalize_vector;
use crate::vector::VectorDimension;

/// Converts text into an embedding vector.
///
/// Implementations may return any length; the index fits the output to its
/// dimension through [`EmbeddingPolicy::apply`].
pub trait EmbeddingProvider: Send + Sync {
    /// Embeds a single text.
    fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError>;

    /// Short name used in logs and `ProviderFailure` errors.
    fn name(&self) -> &'static str {
        "embedding provider"
    }
}

/// How raw provider output is scaled before it is stored or compared.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "divisor")]
pub enum Normalization {
    /// Scale to unit L2 norm
    #[default]
    L2,
    /// Divide every component by a constant
    Scale(f32),
    /// Leave the vector untouched
    None,
}

/// Normalization plus dimension fitting, shared by ingestion and queries.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EmbeddingPolicy {
    pub normalization: Normalization,
    pub dimension: VectorDimension,
}

impl EmbeddingPolicy {
    pub fn new(normalization: Normalization, dimension: VectorDimension) -> Self {
        Self {
            normalization,
            dimension,
        }
    }

    /// Normalizes, then pads with zeros or truncates to the index dimension.
    ///
    /// Fitting is lossy when the provider emits more components than the
    /// index stores.
    pub fn apply(&self, mut embedding: Vec<f32>) -> Vec<f32> {
        match self.normalization {
            Normalization::L2 => normalize_vector(&mut embedding),
            Normalization::Scale(divisor) => {
                if divisor != 0.0 {
                    for value in embedding.iter_mut() {
                        *value /= divisor;
                    }
                }
            }
            Normalization::None => {}
        }
        fit_dimension(embedding, self.dimension.get())
    }
}

/// Pads with zeros or truncates `embedding` to exactly `dimension` values.
pub fn fit_dimension(mut embedding: Vec<f32>, dimension: usize) -> Vec<f32> {
    embedding.resize(dimension, 0.0);
    embedding
}

/// Parses a fastembed model name from configuration.
pub fn parse_embedding_model(name: &str) -> IndexResult<EmbeddingModel> {
    let model = match name {
        "AllMiniLML6V2" => EmbeddingModel::AllMiniLML6V2,
        "AllMiniLML12V2" => EmbeddingModel::AllMiniLML12V2,
        "BGESmallENV15" => EmbeddingModel::BGESmallENV15,
        "BGEBaseENV15" => EmbeddingModel::BGEBaseENV15,
        "BGELargeENV15" => EmbeddingModel::BGELargeENV15,
        "MultilingualE5Small" => EmbeddingModel::MultilingualE5Small,
        "MultilingualE5Base" => EmbeddingModel::MultilingualE5Base,
        "MultilingualE5Large" => EmbeddingModel::MultilingualE5Large,
        other => {
            return Err(IndexError::ConfigError {
                reason: format!("unknown embedding model '{other}'"),
            });
        }
    };
    Ok(model)
}

/// Default directory for downloaded embedding models.
pub fn default_models_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("chunkdex")
        .join("models")
}

/// FastEmbed-backed embedding provider.
pub struct FastEmbedProvider {
    model: Mutex<TextEmbedding>,
    model_name: String,
}

impl FastEmbedProvider {
    /// Loads (and on first use downloads) the configured model.
    ///
    /// # Errors
    /// Returns `ConfigError` for an unknown model name and `ProviderFailure`
    /// if the model fails to initialize.
    pub fn new(config: &EmbeddingConfig) -> IndexResult<Self> {
        let model = parse_embedding_model(&config.model)?;
        let cache_dir = config.cache_dir.clone().unwrap_or_else(default_models_dir);

        tracing::info!(
            "loading embedding model {} from {}",
            config.model,
            cache_dir.display()
        );

        let text_model = TextEmbedding::try_new(
            InitOptions::new(model)
                .with_cache_dir(cache_dir)
                .with_show_download_progress(config.show_download_progress),
        )
        .map_err(|e| IndexError::ProviderFailure {
            provider: "embedding provider",
            attempts: 1,
            cause: format!("failed to initialize embedding model: {e}"),
        })?;

        Ok(Self {
            model: Mutex::new(text_model),
            model_name: config.model.clone(),
        })
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }
}

impl std::fmt::Debug for FastEmbedProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FastEmbedProvider")
            .field("model", &self.model_name)
            .finish()
    }
}

impl EmbeddingProvider for FastEmbedProvider {
    fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        let embeddings = self
            .model
            .lock()
            .map_err(|_| ProviderError::new("embedding model lock poisoned"))?
            .embed(vec![text.to_string()], None)
            .map_err(|e| ProviderError::new(format!("failed to generate embedding: {e}")))?;

        embeddings
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::new("embedding model returned no vectors"))
    }

    fn name(&self) -> &'static str {
        "fastembed"
    }
}

/// Embedding provider returning fixed vectors for known texts.
#[cfg(test)]
pub struct MockEmbeddingProvider {
    vectors: std::collections::HashMap<String, Vec<f32>>,
    fallback: Vec<f32>,
}

#[cfg(test)]
impl MockEmbeddingProvider {
    pub fn new(fallback: Vec<f32>) -> Self {
        Self {
            vectors: std::collections::HashMap::new(),
            fallback,
        }
    }

    pub fn with(mut self, text: &str, vector: Vec<f32>) -> Self {
        self.vectors.insert(text.to_string(), vector);
        self
    }
}

#[cfg(test)]
impl EmbeddingProvider for MockEmbeddingProvider {
    fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        Ok(self
            .vectors
            .get(text)
            .cloned()
            .unwrap_or_else(|| self.fallback.clone()))
    }
}
