//! OKG Parser - Document loading and chunking
//!
//! Splits a document into ordered, overlapping chunks whose character offsets
//! exactly cover the source text. Offsets count `char`s so multi-byte text is
//! never split inside a character.

use std::path::Path;

use okg_core::{Chunk, ChunkingConfig, OkgError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Errors that can occur while loading a document
#[derive(Error, Debug)]
pub enum ParserError {
    /// IO error while reading the file
    #[error("IO error reading file: {path}")]
    IoError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// File content is not valid UTF-8
    #[error("Text encoding error in {0}")]
    EncodingError(String),
}

/// Read a plain text document, dropping a leading byte order mark
pub fn load_document(path: impl AsRef<Path>) -> Result<String, ParserError> {
    let path = path.as_ref();
    let bytes = std::fs::read(path).map_err(|e| ParserError::IoError {
        path: path.display().to_string(),
        source: e,
    })?;

    let text = String::from_utf8(bytes)
        .map_err(|_| ParserError::EncodingError(path.display().to_string()))?;

    Ok(match text.strip_prefix('\u{feff}') {
        Some(stripped) => stripped.to_string(),
        None => text,
    })
}

// ============================================================================
// Chunking
// ============================================================================

/// Configuration for document chunking
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkConfig {
    /// Maximum chunk length in characters
    pub chunk_size: usize,

    /// Overlap between neighbouring chunks, in percent of `chunk_size` (0-50)
    pub overlap_percent: u32,
}

impl ChunkConfig {
    pub fn new(chunk_size: usize, overlap_percent: u32) -> Self {
        Self {
            chunk_size,
            overlap_percent,
        }
    }

    /// Overlap in characters, rounded half away from zero
    pub fn overlap(&self) -> usize {
        let scaled = self.chunk_size as u128 * self.overlap_percent as u128;
        ((scaled + 50) / 100) as usize
    }

    /// Distance between the start offsets of neighbouring chunks
    pub fn stride(&self) -> usize {
        self.chunk_size.saturating_sub(self.overlap())
    }

    /// Reject configurations that cannot make progress
    pub fn validate(&self) -> okg_core::Result<()> {
        if self.chunk_size == 0 {
            return Err(OkgError::Configuration(
                "chunk size must be greater than zero".to_string(),
            ));
        }
        if self.overlap_percent > ChunkingConfig::MAX_OVERLAP_PERCENT {
            return Err(OkgError::Configuration(format!(
                "overlap of {}% exceeds the maximum of {}%",
                self.overlap_percent,
                ChunkingConfig::MAX_OVERLAP_PERCENT
            )));
        }
        if self.overlap() >= self.chunk_size {
            return Err(OkgError::Configuration(format!(
                "overlap of {} characters must be smaller than the chunk size of {}",
                self.overlap(),
                self.chunk_size
            )));
        }
        Ok(())
    }
}

impl Default for ChunkConfig {
    fn default() -> Self {
        ChunkingConfig::default().into()
    }
}

impl From<&ChunkingConfig> for ChunkConfig {
    fn from(config: &ChunkingConfig) -> Self {
        Self::new(config.chunk_size, config.overlap_percent)
    }
}

impl From<ChunkingConfig> for ChunkConfig {
    fn from(config: ChunkingConfig) -> Self {
        Self::from(&config)
    }
}

/// Split `text` into ordered chunks.
///
/// Consecutive chunks start `stride` characters apart, so each overlaps its
/// predecessor by the configured amount. Iteration stops at the first chunk
/// that reaches the end of the text; an empty text yields no chunks.
pub fn chunk_text(text: &str, config: &ChunkConfig) -> okg_core::Result<Vec<Chunk>> {
    config.validate()?;

    // Byte offset of every char boundary, including the end of the text
    let boundaries: Vec<usize> = text
        .char_indices()
        .map(|(byte, _)| byte)
        .chain(std::iter::once(text.len()))
        .collect();
    let total = boundaries.len() - 1;

    let stride = config.stride();
    let mut chunks = Vec::with_capacity(total.div_ceil(stride.max(1)));
    let mut start = 0;

    while start < total {
        let end = (start + config.chunk_size).min(total);
        chunks.push(Chunk::new(
            chunks.len(),
            start,
            end,
            &text[boundaries[start]..boundaries[end]],
        ));

        if end >= total {
            break;
        }
        start += stride;
    }

    tracing::debug!(
        chars = total,
        chunks = chunks.len(),
        chunk_size = config.chunk_size,
        overlap = config.overlap(),
        "Chunked document"
    );

    Ok(chunks)
}

// ============================================================================
// Tests
// ============================================================================
