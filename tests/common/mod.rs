//! Shared fixtures for integration tests.
#![allow(dead_code)]

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};

use chunkdex::{EmbeddingProvider, ProviderError, Settings, TextExtractor};

/// Embeds text as keyword counts, one dimension per keyword.
pub struct KeywordEmbedder {
    keywords: Vec<&'static str>,
}

impl KeywordEmbedder {
    pub fn new(keywords: &[&'static str]) -> Self {
        Self {
            keywords: keywords.to_vec(),
        }
    }

    pub fn symptoms() -> Self {
        Self::new(&["cough", "fever", "breath", "head"])
    }
}

impl EmbeddingProvider for KeywordEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        let lower = text.to_lowercase();
        Ok(self
            .keywords
            .iter()
            .map(|keyword| lower.matches(keyword).count() as f32)
            .collect())
    }

    fn name(&self) -> &'static str {
        "keyword embedder"
    }
}

/// In-memory document texts.
#[derive(Default)]
pub struct MemoryExtractor {
    texts: HashMap<String, String>,
}

impl MemoryExtractor {
    pub fn with(mut self, key: &str, text: &str) -> Self {
        self.texts.insert(key.to_string(), text.to_string());
        self
    }
}

impl TextExtractor for MemoryExtractor {
    fn extract(&self, key: &str) -> Result<String, ProviderError> {
        self.texts
            .get(key)
            .cloned()
            .ok_or_else(|| ProviderError::new(format!("unknown document '{key}'")))
    }
}

/// Fails a fixed number of calls before delegating.
pub struct FlakyExtractor<E> {
    inner: E,
    failures_left: AtomicU32,
    pub calls: AtomicU32,
}

impl<E: TextExtractor> FlakyExtractor<E> {
    pub fn new(inner: E, failures: u32) -> Self {
        Self {
            inner,
            failures_left: AtomicU32::new(failures),
            calls: AtomicU32::new(0),
        }
    }
}

impl<E: TextExtractor> TextExtractor for FlakyExtractor<E> {
    fn extract(&self, key: &str) -> Result<String, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let left = self.failures_left.load(Ordering::SeqCst);
        if left > 0 {
            self.failures_left.store(left - 1, Ordering::SeqCst);
            return Err(ProviderError::new("temporarily unavailable"));
        }
        self.inner.extract(key)
    }
}

/// Settings for a small index under `root` with immediate retries.
pub fn settings_for(root: &Path, dimension: usize, capacity: usize) -> Settings {
    let mut settings = Settings::default();
    settings.index.path = root.join("index");
    settings.index.dimension = dimension;
    settings.index.cluster_capacity = capacity;
    settings.providers.retry_backoff_ms = 0;
    settings
}

/// Renders one tagged symptom block.
pub fn symptom_block(name: &str, description: &str, synonyms: &str, monologues: &str) -> String {
    format!(
        "<start_symptom_name>{name}</start_symptom_name>\n\
         <start_description>{description}</start_description>\n\
         <start_synonyms>{synonyms}</start_synonyms>\n\
         <start_monologues>{monologues}</start_monologues>\n"
    )
}

/// Three respiratory symptoms, every block nine whitespace tokens long.
pub fn respiratory_document() -> String {
    [
        symptom_block("Cough", "dry cough at night", "tussis", "I keep hacking"),
        symptom_block(
            "Wheeze",
            "whistling sound when breathing",
            "wheezing",
            "my chest whistles",
        ),
        symptom_block(
            "Dyspnea",
            "short of breath often",
            "breathlessness",
            "I cannot breathe",
        ),
    ]
    .concat()
}

/// Three general symptoms, every block nine whitespace tokens long.
pub fn general_document() -> String {
    [
        symptom_block("Fever", "high body temperature today", "pyrexia", "I feel hot"),
        symptom_block("Fatigue", "tired all the time", "tiredness", "I am exhausted"),
        symptom_block("Headache", "pain in the head", "cephalalgia", "my head hurts"),
    ]
    .concat()
}
