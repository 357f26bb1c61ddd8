//! Document text and document naming collaborators.
//!
//! The index never reads source documents itself. Text is obtained through a
//! [`TextExtractor`] both when a document is chunked and when query hits are
//! resolved to spans, and a [`NameResolver`] maps document keys to whatever
//! identifier downstream consumers use.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::{ErrorContext, IndexError, IndexResult, ProviderError};

/// Produces the full text of a document from its key.
pub trait TextExtractor: Send + Sync {
    fn extract(&self, source_key: &str) -> Result<String, ProviderError>;

    fn name(&self) -> &'static str {
        "text extractor"
    }
}

/// Maps a document key to a downstream identifier.
pub trait NameResolver: Send + Sync {
    fn resolve(&self, document_key: &str) -> Option<String>;
}

/// Reads UTF-8 text files relative to a source root.
#[derive(Debug, Clone)]
pub struct PlainTextExtractor {
    root: PathBuf,
}

impl PlainTextExtractor {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Keys of every regular file directly under the root, sorted.
    pub fn list_keys(&self) -> IndexResult<Vec<String>> {
        let mut keys = Vec::new();
        for entry in std::fs::read_dir(&self.root).read_context(&self.root)? {
            let entry = entry.read_context(&self.root)?;
            if entry.file_type().read_context(&entry.path())?.is_file() {
                keys.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        keys.sort();
        Ok(keys)
    }
}

impl TextExtractor for PlainTextExtractor {
    fn extract(&self, source_key: &str) -> Result<String, ProviderError> {
        let path = self.root.join(source_key);
        std::fs::read_to_string(&path)
            .map_err(|e| ProviderError::new(format!("cannot read '{}': {e}", path.display())))
    }

    fn name(&self) -> &'static str {
        "plain text extractor"
    }
}

/// Name resolver backed by a JSON object of `name -> identifier`.
///
/// Lookups use the document key's file stem, so `"Asthma.txt"` resolves
/// through the `"Asthma"` entry.
#[derive(Debug, Clone, Default)]
pub struct MapNameResolver {
    names: HashMap<String, String>,
}

impl MapNameResolver {
    pub fn new(names: HashMap<String, String>) -> Self {
        Self { names }
    }

    /// Loads a JSON object whose values are strings or numbers.
    pub fn from_json_file(path: &Path) -> IndexResult<Self> {
        let text = std::fs::read_to_string(path).read_context(path)?;
        let raw: HashMap<String, serde_json::Value> =
            serde_json::from_str(&text).map_err(|e| IndexError::PersistenceError {
                path: path.to_path_buf(),
                reason: format!("failed to parse name map: {e}"),
            })?;

        let mut names = HashMap::with_capacity(raw.len());
        for (name, value) in raw {
            let id = match value {
                serde_json::Value::String(s) => s,
                serde_json::Value::Number(n) => n.to_string(),
                other => {
                    return Err(IndexError::PersistenceError {
                        path: path.to_path_buf(),
                        reason: format!("entry '{name}' has unsupported value {other}"),
                    });
                }
            };
            names.insert(name, id);
        }
        tracing::debug!("loaded {} names from {}", names.len(), path.display());
        Ok(Self { names })
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

impl NameResolver for MapNameResolver {
    fn resolve(&self, document_key: &str) -> Option<String> {
        let stem = Path::new(document_key)
            .file_stem()
            .map(|s| s.to_string_lossy())
            .unwrap_or_else(|| document_key.into());
        self.names.get(&*stem).cloned()
    }
}
