//! Splitting extracted document text into embeddable chunks.
//!
//! Every chunk carries its span as character (Unicode scalar) offsets into
//! the document text, end exclusive, which is what chunk records store and
//! what query-time span resolution slices by.

use std::sync::LazyLock;

use regex::Regex;

use crate::config::{ChunkingConfig, ChunkingStrategy};
use crate::error::{IndexError, IndexResult};

/// A span of document text and the text to embed for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextChunk {
    /// First character of the span
    pub start: usize,
    /// One past the last character of the span
    pub end: usize,
    /// Text handed to the embedding provider
    pub text: String,
}

/// Splits document text into chunks.
pub trait Chunker: Send + Sync {
    fn chunk(&self, text: &str) -> Vec<TextChunk>;

    fn name(&self) -> &'static str;
}

/// Builds the chunker selected in configuration.
pub fn chunker_from_config(config: &ChunkingConfig) -> IndexResult<Box<dyn Chunker>> {
    Ok(match config.strategy {
        ChunkingStrategy::TaggedSymptoms => Box::new(TaggedSymptomChunker),
        ChunkingStrategy::Window => Box::new(WindowChunker::new(
            config.window_tokens,
            config.window_overlap,
        )?),
    })
}

/// Converts increasing byte offsets to character offsets in one pass.
struct CharCursor<'a> {
    text: &'a str,
    byte: usize,
    chars: usize,
}

impl<'a> CharCursor<'a> {
    fn new(text: &'a str) -> Self {
        Self {
            text,
            byte: 0,
            chars: 0,
        }
    }

    /// Character offset of `byte`, which must not precede the previous call.
    fn advance_to(&mut self, byte: usize) -> usize {
        debug_assert!(byte >= self.byte);
        self.chars += self.text[self.byte..byte].chars().count();
        self.byte = byte;
        self.chars
    }
}

static SYMPTOM_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"(?s)<start_symptom_name>(.*?)</start_symptom_name>\s*",
        r"<start_description>(.*?)</start_description>\s*",
        r"<start_synonyms>(.*?)</start_synonyms>\s*",
        r"<start_monologues>(.*?)</start_monologues>",
    ))
    .expect("symptom block pattern is valid")
});

/// One chunk per tagged symptom block.
///
/// A block is `<start_symptom_name>`, `<start_description>`,
/// `<start_synonyms>` and `<start_monologues>` sections in that order,
/// separated only by whitespace. The chunk spans the whole block and embeds a
/// compact `<symptom>Name: .., Description: .., Synonyms: .., Monologues: ..</symptom>`
/// rendering of it. Text outside blocks is ignored.
#[derive(Debug, Clone, Copy, Default)]
pub struct TaggedSymptomChunker;

impl Chunker for TaggedSymptomChunker {
    fn chunk(&self, text: &str) -> Vec<TextChunk> {
        let mut cursor = CharCursor::new(text);
        SYMPTOM_BLOCK
            .captures_iter(text)
            .filter_map(|caps| {
                let whole = caps.get(0)?;
                let field = |i: usize| caps.get(i).map_or("", |m| m.as_str().trim());
                let start = cursor.advance_to(whole.start());
                let end = cursor.advance_to(whole.end());
                Some(TextChunk {
                    start,
                    end,
                    text: format!(
                        "<symptom>Name: {}, Description: {}, Synonyms: {}, Monologues: {}</symptom>",
                        field(1),
                        field(2),
                        field(3),
                        field(4)
                    ),
                })
            })
            .collect()
    }

    fn name(&self) -> &'static str {
        "tagged-symptoms"
    }
}

/// Sliding windows of whitespace-separated tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowChunker {
    max_tokens: usize,
    overlap: usize,
}

impl WindowChunker {
    /// # Errors
    /// `ConfigError` unless `max_tokens > overlap`.
    pub fn new(max_tokens: usize, overlap: usize) -> IndexResult<Self> {
        if max_tokens == 0 || overlap >= max_tokens {
            return Err(IndexError::ConfigError {
                reason: format!(
                    "chunking window of {max_tokens} tokens must be larger than the overlap of {overlap}"
                ),
            });
        }
        Ok(Self {
            max_tokens,
            overlap,
        })
    }
}

/// Whitespace token with byte and character spans.
struct Token {
    byte_start: usize,
    byte_end: usize,
    char_start: usize,
    char_end: usize,
}

fn tokenize(text: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut current: Option<(usize, usize)> = None;
    let mut char_index = 0;

    for (byte, ch) in text.char_indices() {
        if ch.is_whitespace() {
            if let Some((byte_start, char_start)) = current.take() {
                tokens.push(Token {
                    byte_start,
                    byte_end: byte,
                    char_start,
                    char_end: char_index,
                });
            }
        } else if current.is_none() {
            current = Some((byte, char_index));
        }
        char_index += 1;
    }

    if let Some((byte_start, char_start)) = current {
        tokens.push(Token {
            byte_start,
            byte_end: text.len(),
            char_start,
            char_end: char_index,
        });
    }
    tokens
}

impl Chunker for WindowChunker {
    fn chunk(&self, text: &str) -> Vec<TextChunk> {
        let tokens = tokenize(text);
        let step = self.max_tokens - self.overlap;
        let mut chunks = Vec::new();

        let mut first = 0;
        while first < tokens.len() {
            let last = (first + self.max_tokens).min(tokens.len()) - 1;
            let (head, tail) = (&tokens[first], &tokens[last]);
            chunks.push(TextChunk {
                start: head.char_start,
                end: tail.char_end,
                text: text[head.byte_start..tail.byte_end].to_string(),
            });
            if last + 1 == tokens.len() {
                break;
            }
            first += step;
        }
        chunks
    }

    fn name(&self) -> &'static str {
        "window"
    }
}

/// Slices `text` by character offsets, `None` if the span is out of range.
pub fn char_slice(text: &str, start: usize, end: usize) -> Option<&str> {
    if start > end {
        return None;
    }
    let mut boundaries = text
        .char_indices()
        .map(|(byte, _)| byte)
        .chain(std::iter::once(text.len()));
    let byte_start = boundaries.nth(start)?;
    let byte_end = if end == start {
        byte_start
    } else {
        boundaries.nth(end - start - 1)?
    };
    Some(&text[byte_start..byte_end])
}
