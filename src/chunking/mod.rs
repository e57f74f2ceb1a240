// Text chunking module
// Splits cleaned text into overlapping, boundary-aligned windows ready for
// embedding.


use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

/// How far behind the raw window end to look for a sentence terminator or
/// punctuation mark.
const BOUNDARY_LOOKBACK: usize = 50;
/// How far behind the raw window end to look for a plain space when no
/// punctuation is found.
const SPACE_LOOKBACK: usize = 20;

const SENTENCE_BOUNDARY: &[char] = &['.', '!', '?', ';', ':', '\n'];

/// Configuration for the chunk processor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Target window size in characters. Invalid values (zero) fall back to
    /// the default; the effective size is clamped to
    /// `[min_chunk_size, max_chunk_size]`.
    pub chunk_size: usize,
    /// Overlap carried between adjacent windows, clamped to
    /// `[0, chunk_size / 2]`.
    pub chunk_overlap: usize,
    pub min_chunk_size: usize,
    pub max_chunk_size: usize,
}

impl Default for ChunkingConfig {
    #[inline]
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 100,
            min_chunk_size: 100,
            max_chunk_size: 4000,
        }
    }
}

impl ChunkingConfig {
    /// Window size after defaulting and clamping.
    #[inline]
    pub fn effective_chunk_size(&self) -> usize {
        let size = if self.chunk_size == 0 {
            Self::default().chunk_size
        } else {
            self.chunk_size
        };
        size.clamp(self.min_chunk_size.max(1), self.max_chunk_size.max(1))
    }

    /// Overlap after clamping against the effective window size.
    #[inline]
    pub fn effective_overlap(&self) -> usize {
        self.chunk_overlap.min(self.effective_chunk_size() / 2)
    }
}

/// Metadata attached to each chunk after the full set is known.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    /// Identifier of the source document or page, when known.
    pub source: Option<String>,
    pub processed_at: Option<DateTime<Utc>>,
    pub chunk_count: Option<usize>,
    /// Human-readable position, 1-based: `"2/5"`.
    pub position: Option<String>,
}

/// A bounded, overlap-aware slice of cleaned source text.
///
/// Offsets are character offsets into the cleaned text (after line-ending
/// normalization), so slicing never lands inside a UTF-8 sequence.
/// `start_offset < end_offset` always; chunks from one document are produced
/// with contiguous 0-based indexes in increasing offset order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextChunk {
    pub id: String,
    pub text: String,
    pub index: usize,
    pub start_offset: usize,
    pub end_offset: usize,
    pub metadata: ChunkMetadata,
}

/// Normalize line endings and collapse runs of three or more newlines down
/// to a single blank line.
#[inline]
pub fn normalize_text(text: &str) -> String {
    let unified = text.replace("\r\n", "\n").replace('\r', "\n");

    let mut cleaned = String::with_capacity(unified.len());
    let mut newline_run = 0usize;
    for ch in unified.chars() {
        if ch == '\n' {
            newline_run += 1;
            if newline_run <= 2 {
                cleaned.push(ch);
            }
        } else {
            newline_run = 0;
            cleaned.push(ch);
        }
    }
    cleaned
}

/// Split `text` into overlapping, boundary-aligned chunks.
///
/// The text is cleaned first; each window of `chunk_size` characters has its
/// end pulled back to the nearest sentence terminator within
/// `BOUNDARY_LOOKBACK` characters, falling back to a space within
/// `SPACE_LOOKBACK`, else the raw boundary. The next window starts at the
/// adjusted end minus the overlap. The loop stops once the end reaches the
/// text length or the start fails to advance, which bounds the pass even
/// for degenerate size/overlap combinations.
#[inline]
pub fn chunk_text(text: &str, source: Option<&str>, config: &ChunkingConfig) -> Vec<TextChunk> {
    let cleaned = normalize_text(text);
    let chars: Vec<char> = cleaned.chars().collect();
    let total_len = chars.len();

    let chunk_size = config.effective_chunk_size();
    let overlap = config.effective_overlap();

    let mut chunks = Vec::new();
    if total_len == 0 {
        return chunks;
    }

    let mut start = 0usize;
    let mut index = 0usize;

    loop {
        let raw_end = (start + chunk_size).min(total_len);
        let end = if raw_end < total_len {
            adjust_boundary(&chars, start, raw_end)
        } else {
            raw_end
        };

        let slice: String = chars[start..end].iter().collect();
        if !slice.trim().is_empty() {
            chunks.push(TextChunk {
                id: Uuid::new_v4().to_string(),
                text: slice,
                index,
                start_offset: start,
                end_offset: end,
                metadata: ChunkMetadata {
                    source: source.map(str::to_string),
                    ..ChunkMetadata::default()
                },
            });
            index += 1;
        }

        if end >= total_len {
            break;
        }
        let next_start = end.saturating_sub(overlap);
        if next_start <= start {
            break;
        }
        start = next_start;
    }

    enrich_chunks(&mut chunks);

    debug!(
        "Chunked {} characters into {} chunks (size {}, overlap {})",
        total_len,
        chunks.len(),
        chunk_size,
        overlap
    );

    chunks
}

/// Pull the window end back to the closest natural break before `end`.
fn adjust_boundary(chars: &[char], start: usize, end: usize) -> usize {
    let lookback_floor = end.saturating_sub(BOUNDARY_LOOKBACK).max(start + 1);
    for pos in (lookback_floor..end).rev() {
        if SENTENCE_BOUNDARY.contains(&chars[pos]) {
            return pos + 1;
        }
    }

    let space_floor = end.saturating_sub(SPACE_LOOKBACK).max(start + 1);
    for pos in (space_floor..end).rev() {
        if chars[pos] == ' ' {
            return pos + 1;
        }
    }

    end
}

/// Fill in the metadata that is only known once the full set exists.
fn enrich_chunks(chunks: &mut [TextChunk]) {
    let total = chunks.len();
    let now = Utc::now();
    for (i, chunk) in chunks.iter_mut().enumerate() {
        chunk.metadata.processed_at = Some(now);
        chunk.metadata.chunk_count = Some(total);
        chunk.metadata.position = Some(format!("{}/{}", i + 1, total));
    }
}
