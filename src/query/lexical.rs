//! Lexical reranking of candidate spans.

use std::collections::HashMap;

use crate::error::ProviderError;

/// Scores text spans against query tokens. Higher is more relevant.
pub trait LexicalScorer: Send + Sync {
    /// Returns one score per `corpus` entry, in input order.
    ///
    /// The corpus is the candidate set itself, so collection statistics such
    /// as document frequency are computed over it.
    fn score(&self, query_tokens: &[&str], corpus: &[&str]) -> Result<Vec<f32>, ProviderError>;

    fn name(&self) -> &'static str {
        "lexical scorer"
    }
}

/// Okapi BM25 over whitespace tokens.
///
/// Terms whose idf comes out negative (present in more than half the corpus)
/// get `epsilon * mean idf` instead.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bm25Scorer {
    pub k1: f32,
    pub b: f32,
    pub epsilon: f32,
}

impl Default for Bm25Scorer {
    fn default() -> Self {
        Self {
            k1: 1.5,
            b: 0.75,
            epsilon: 0.25,
        }
    }
}

impl Bm25Scorer {
    pub fn new(k1: f32, b: f32, epsilon: f32) -> Self {
        Self { k1, b, epsilon }
    }

    fn idf(&self, docs: &[HashMap<&str, usize>]) -> HashMap<String, f32> {
        let n = docs.len() as f32;
        let mut doc_freq: HashMap<&str, usize> = HashMap::new();
        for doc in docs {
            for term in doc.keys() {
                *doc_freq.entry(*term).or_default() += 1;
            }
        }

        let mut idf: HashMap<String, f32> = HashMap::with_capacity(doc_freq.len());
        let mut idf_sum = 0.0f32;
        let mut negative = Vec::new();
        for (term, freq) in doc_freq {
            let freq = freq as f32;
            let value = (n - freq + 0.5).ln() - (freq + 0.5).ln();
            idf_sum += value;
            if value < 0.0 {
                negative.push(term);
            }
            idf.insert(term.to_string(), value);
        }

        if !idf.is_empty() {
            let floor = self.epsilon * idf_sum / idf.len() as f32;
            for term in negative {
                idf.insert(term.to_string(), floor);
            }
        }
        idf
    }
}

impl LexicalScorer for Bm25Scorer {
    fn score(&self, query_tokens: &[&str], corpus: &[&str]) -> Result<Vec<f32>, ProviderError> {
        if corpus.is_empty() {
            return Ok(Vec::new());
        }

        let docs: Vec<HashMap<&str, usize>> = corpus
            .iter()
            .map(|text| {
                let mut freqs = HashMap::new();
                for token in text.split_whitespace() {
                    *freqs.entry(token).or_default() += 1;
                }
                freqs
            })
            .collect();
        let lengths: Vec<f32> = corpus
            .iter()
            .map(|text| text.split_whitespace().count() as f32)
            .collect();
        let avg_len = lengths.iter().sum::<f32>() / lengths.len() as f32;
        let idf = self.idf(&docs);

        let scores: Vec<f32> = docs
            .iter()
            .zip(&lengths)
            .map(|(freqs, &len)| {
                let length_ratio = if avg_len > 0.0 { len / avg_len } else { 1.0 };
                let norm = self.k1 * (1.0 - self.b + self.b * length_ratio);
                query_tokens
                    .iter()
                    .map(|token| {
                        let tf = freqs.get(token).copied().unwrap_or(0) as f32;
                        let term_idf = idf.get(*token).copied().unwrap_or(0.0);
                        term_idf * (tf * (self.k1 + 1.0) / (tf + norm))
                    })
                    .sum::<f32>()
            })
            .collect();
        Ok(scores)
    }

    fn name(&self) -> &'static str {
        "bm25"
    }
}
