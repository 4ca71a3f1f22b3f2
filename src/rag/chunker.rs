//! Text chunking for document ingestion.
//!
//! Two strategies are available:
//!
//! - **Fixed size**: a window of `chunk_size` bytes advancing by
//!   `chunk_size - chunk_overlap`. The window end is snapped back to a
//!   sentence, newline or word boundary found in its last 20%.
//! - **Recursive** (default): splits on the first separator present in the
//!   text (`"\n\n"`, `"\n"`, sentence punctuation, `" "`, `""`), merges the
//!   pieces greedily up to `chunk_size` and recurses into pieces that are
//!   still too large with the remaining separators.
//!
//! All offsets are UTF-8 byte offsets on `char` boundaries, so every chunk's
//! content is exactly `&text[start_index..end_index]`.
//!
//! # Example
//!
//! ```ignore
//! use ragcore::rag::chunker::{ChunkingConfig, ChunkingEngine, ChunkingStrategy};
//!
//! let engine = ChunkingEngine::new(ChunkingConfig {
//!     strategy: ChunkingStrategy::FixedSize,
//!     chunk_size: 4,
//!     chunk_overlap: 1,
//!     min_chunk_size: 1,
//!     ..Default::default()
//! })?;
//!
//! let chunks = engine.chunk("ABCDEFGHIJ", "doc");
//! // ["ABCD", "DEFG", "GHIJ", "J"]
//! ```

use std::collections::VecDeque;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::types::{ChunkMetadata, Document, RagError, Result, TextChunk};

type Span = (usize, usize);

// ============================================================================
// Configuration
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ChunkingStrategy {
    /// Sliding window with boundary snapping
    FixedSize,
    /// Separator-driven recursive splitting
    #[default]
    Recursive,
}

impl FromStr for ChunkingStrategy {
    type Err = RagError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "fixed" | "fixed-size" | "fixed_size" | "window" => Ok(Self::FixedSize),
            "recursive" | "separator" => Ok(Self::Recursive),
            _ => Err(RagError::ChunkingConfig(format!(
                "Unknown chunking strategy: {}. Use: fixed-size, recursive",
                s
            ))),
        }
    }
}

impl std::fmt::Display for ChunkingStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::FixedSize => "fixed-size",
            Self::Recursive => "recursive",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkingConfig {
    #[serde(default)]
    pub strategy: ChunkingStrategy,

    /// Maximum chunk length in bytes
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Bytes shared between consecutive chunks
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,

    /// Chunks shorter than this are dropped
    #[serde(default = "default_min_chunk_size")]
    pub min_chunk_size: usize,

    /// Separators for the recursive strategy, highest priority first
    #[serde(default = "default_separators")]
    pub separators: Vec<String>,
}

fn default_chunk_size() -> usize {
    1000
}

fn default_chunk_overlap() -> usize {
    200
}

fn default_min_chunk_size() -> usize {
    20
}

pub fn default_separators() -> Vec<String> {
    ["\n\n", "\n", ". ", "! ", "? ", " ", ""]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            strategy: ChunkingStrategy::default(),
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            min_chunk_size: default_min_chunk_size(),
            separators: default_separators(),
        }
    }
}

impl ChunkingConfig {
    /// Overlap at or above the chunk size is accepted: the fixed-size path
    /// always moves forward.
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(RagError::ChunkingConfig(
                "chunk_size must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

// ============================================================================
// Chunking Engine
// ============================================================================

#[derive(Debug, Clone)]
pub struct ChunkingEngine {
    config: ChunkingConfig,
}

impl ChunkingEngine {
    pub fn new(config: ChunkingConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &ChunkingConfig {
        &self.config
    }

    pub fn chunk_document(&self, document: &Document) -> Vec<TextChunk> {
        self.chunk(&document.content, &document.id)
    }

    /// Split `text` into chunks owned by `document_id`, in document order.
    pub fn chunk(&self, text: &str, document_id: &str) -> Vec<TextChunk> {
        if text.is_empty() {
            return Vec::new();
        }

        let spans = match self.config.strategy {
            ChunkingStrategy::FixedSize => {
                fixed_spans(text, 0, self.config.chunk_size, self.config.chunk_overlap, true)
            }
            ChunkingStrategy::Recursive => {
                let mut spans = Vec::new();
                recursive_spans(
                    text,
                    0,
                    &self.config.separators,
                    self.config.chunk_size,
                    self.config.chunk_overlap,
                    &mut spans,
                );
                let mut trimmed: Vec<Span> =
                    spans.into_iter().filter_map(|s| trim_span(text, s)).collect();
                trimmed.dedup();
                trimmed
            }
        };

        let headings = markdown_headings(text);
        let mut chunks: Vec<TextChunk> = spans
            .into_iter()
            .filter(|(start, end)| end - start >= self.config.min_chunk_size)
            .enumerate()
            .map(|(index, (start, end))| TextChunk {
                id: TextChunk::chunk_id(document_id, index),
                content: text[start..end].to_string(),
                start_index: start,
                end_index: end,
                metadata: ChunkMetadata {
                    document_id: document_id.to_string(),
                    chunk_index: index,
                    total_chunks: 0,
                    section: section_at(&headings, start),
                },
            })
            .collect();

        let total = chunks.len();
        for chunk in &mut chunks {
            chunk.metadata.total_chunks = total;
        }
        chunks
    }
}

/// Chunk `text` with a one-off configuration.
pub fn chunk(text: &str, document_id: &str, config: &ChunkingConfig) -> Result<Vec<TextChunk>> {
    Ok(ChunkingEngine::new(config.clone())?.chunk(text, document_id))
}

// ============================================================================
// Fixed-size windows
// ============================================================================

fn fixed_spans(text: &str, offset: usize, size: usize, overlap: usize, snap: bool) -> Vec<Span> {
    let len = text.len();
    let mut spans = Vec::new();
    let mut start = 0;

    while start < len {
        let mut end = floor_char_boundary(text, (start + size).min(len));
        if end <= start {
            // a single char wider than the window
            end = ceil_char_boundary(text, start + 1);
        }
        if snap && end < len {
            if let Some(snapped) = snap_end(text, start, end, size) {
                end = snapped;
            }
        }
        spans.push((offset + start, offset + end));

        let mut next = floor_char_boundary(text, end.saturating_sub(overlap));
        if next <= start {
            next = end;
        }
        start = next;
    }

    spans
}

/// Look for a better window end in the last fifth of the window: a sentence
/// terminator or newline first, any whitespace otherwise.
fn snap_end(text: &str, start: usize, end: usize, size: usize) -> Option<usize> {
    let zone = size / 5;
    if zone == 0 {
        return None;
    }
    let zone_start = ceil_char_boundary(text, end.saturating_sub(zone).max(start + 1));
    if zone_start >= end {
        return None;
    }

    let window = &text[zone_start..end];
    let after = |(i, c): (usize, char)| zone_start + i + c.len_utf8();

    window
        .char_indices()
        .rev()
        .find(|(_, c)| matches!(c, '.' | '!' | '?' | '\n'))
        .map(after)
        .or_else(|| {
            window
                .char_indices()
                .rev()
                .find(|(_, c)| c.is_whitespace())
                .map(after)
        })
}

// ============================================================================
// Recursive splitting
// ============================================================================

fn recursive_spans(
    text: &str,
    offset: usize,
    separators: &[String],
    size: usize,
    overlap: usize,
    out: &mut Vec<Span>,
) {
    if text.len() <= size {
        if !text.is_empty() {
            out.push((offset, offset + text.len()));
        }
        return;
    }

    let Some(position) = separators
        .iter()
        .position(|sep| sep.is_empty() || text.contains(sep.as_str()))
    else {
        out.extend(fixed_spans(text, offset, size, overlap, false));
        return;
    };

    let separator = separators[position].as_str();
    if separator.is_empty() {
        out.extend(fixed_spans(text, offset, size, overlap, false));
        return;
    }

    let remaining = &separators[position + 1..];
    let mut pending: Vec<Span> = Vec::new();
    for (start, end) in split_keeping_separator(text, separator) {
        if end - start > size {
            merge_spans(&pending, offset, size, overlap, out);
            pending.clear();
            recursive_spans(&text[start..end], offset + start, remaining, size, overlap, out);
        } else {
            pending.push((start, end));
        }
    }
    merge_spans(&pending, offset, size, overlap, out);
}

/// Split after each separator occurrence so the pieces stay contiguous.
fn split_keeping_separator(text: &str, separator: &str) -> Vec<Span> {
    let mut pieces = Vec::new();
    let mut last = 0;
    for (i, matched) in text.match_indices(separator) {
        let end = i + matched.len();
        if end > last {
            pieces.push((last, end));
        }
        last = end;
    }
    if last < text.len() {
        pieces.push((last, text.len()));
    }
    pieces
}

/// Greedily merge contiguous pieces up to `size`, carrying trailing pieces
/// that fit in `overlap` into the next chunk.
fn merge_spans(pieces: &[Span], offset: usize, size: usize, overlap: usize, out: &mut Vec<Span>) {
    let mut window: VecDeque<Span> = VecDeque::new();

    for &(start, end) in pieces {
        if let (Some(&(first, _)), Some(&(_, last))) = (window.front(), window.back()) {
            if end - first > size {
                out.push((offset + first, offset + last));
                while let Some(&(front, _)) = window.front() {
                    if last - front > overlap || end - front > size {
                        window.pop_front();
                    } else {
                        break;
                    }
                }
            }
        }
        window.push_back((start, end));
    }

    if let (Some(&(first, _)), Some(&(_, last))) = (window.front(), window.back()) {
        out.push((offset + first, offset + last));
    }
}

fn trim_span(text: &str, (start, end): Span) -> Option<Span> {
    let slice = &text[start..end];
    let leading = slice.len() - slice.trim_start().len();
    let trailing = slice.len() - slice.trim_end().len();
    let (start, end) = (start + leading, end - trailing);
    (start < end).then_some((start, end))
}

// ============================================================================
// Helpers
// ============================================================================

fn floor_char_boundary(text: &str, mut index: usize) -> usize {
    while index > 0 && !text.is_char_boundary(index) {
        index -= 1;
    }
    index
}

fn ceil_char_boundary(text: &str, mut index: usize) -> usize {
    while index < text.len() && !text.is_char_boundary(index) {
        index += 1;
    }
    index.min(text.len())
}

/// Byte offsets and titles of Markdown ATX headings.
fn markdown_headings(text: &str) -> Vec<(usize, String)> {
    let mut headings = Vec::new();
    let mut offset = 0;
    for line in text.split_inclusive('\n') {
        let trimmed = line.trim();
        let level = trimmed.chars().take_while(|c| *c == '#').count();
        if (1..=6).contains(&level) {
            let rest = &trimmed[level..];
            if rest.starts_with(' ') && !rest.trim().is_empty() {
                headings.push((offset, rest.trim().to_string()));
            }
        }
        offset += line.len();
    }
    headings
}

fn section_at(headings: &[(usize, String)], start: usize) -> Option<String> {
    headings
        .iter()
        .take_while(|(pos, _)| *pos <= start)
        .last()
        .map(|(_, title)| title.clone())
}
