#![forbid(unsafe_code)]

//! PNG text metadata (`tEXt`, `zTXt`, `iTXt`) as an ordered keyword map,
//! plus the pixel size from `IHDR`.
//!
//! Only the chunk layer is read; pixel data is never decoded.

mod chunk;
mod text;

use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use thiserror::Error;
use tracing::{debug, trace};

use chunk::{ChunkKind, Chunks};

/// Largest chunk length the PNG format allows.
pub const PNG_MAX_CHUNK_LEN: u32 = 0x7FFF_FFFF;

#[derive(Debug, Error)]
pub enum PngTextError {
    #[error("not a PNG file (signature missing)")]
    NotPng,
    #[error("truncated chunk at byte offset {offset}")]
    Truncated { offset: usize },
    #[error("chunk at byte offset {offset} declares {length} bytes, limit is {limit}")]
    ChunkTooLarge { offset: usize, length: u32, limit: u32 },
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Limits and switches for [`read_text_fields`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadOptions {
    /// Inflate `zTXt` and compressed `iTXt`; skipped otherwise.
    pub decompress: bool,
    /// Any chunk, text or not, above this length aborts the read.
    pub max_chunk_len: u32,
    /// Cap on a single inflated text value.
    pub max_inflated_len: usize,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self {
            decompress: true,
            max_chunk_len: PNG_MAX_CHUNK_LEN,
            max_inflated_len: 16 * 1024 * 1024,
        }
    }
}

impl ReadOptions {
    /// Plain `tEXt` and uncompressed `iTXt` only.
    #[must_use]
    pub fn without_decompression() -> Self {
        Self {
            decompress: false,
            ..Self::default()
        }
    }

    /// Tight limits for scanning files from untrusted sources.
    #[must_use]
    pub fn untrusted() -> Self {
        Self {
            decompress: true,
            max_chunk_len: 64 * 1024 * 1024,
            max_inflated_len: 4 * 1024 * 1024,
        }
    }
}

/// Pixel dimensions from the `IHDR` chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageInfo {
    pub width: u32,
    pub height: u32,
}

impl ImageInfo {
    /// Reads width and height from an `IHDR` body; `None` when it is shorter
    /// than the 13 bytes the format requires.
    #[must_use]
    pub fn from_header(data: &[u8]) -> Option<Self> {
        if data.len() < 13 {
            return None;
        }
        Some(Self {
            width: u32::from_be_bytes([data[0], data[1], data[2], data[3]]),
            height: u32::from_be_bytes([data[4], data[5], data[6], data[7]]),
        })
    }
}

/// Everything the chunk layer yields: dimensions plus text fields.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PngMetadata {
    /// `None` when the file has no well-formed `IHDR`.
    pub info: Option<ImageInfo>,
    pub fields: IndexMap<String, String>,
}

/// Reads the image header and every text chunk of a PNG, in file order.
///
/// A keyword seen twice keeps its first position and its last value.
/// Malformed text chunks are skipped; so is a short `IHDR`.
///
/// # Errors
///
/// Fails when the signature is missing, a chunk runs past the end of the data,
/// or a chunk is longer than [`ReadOptions::max_chunk_len`].
pub fn read_metadata(data: &[u8], options: &ReadOptions) -> Result<PngMetadata, PngTextError> {
    let mut metadata = PngMetadata::default();

    for chunk in Chunks::new(data, options)? {
        let chunk = chunk?;
        let decoded = match chunk.kind {
            ChunkKind::Header => {
                if metadata.info.is_none() {
                    metadata.info = ImageInfo::from_header(chunk.data);
                }
                trace!(offset = chunk.offset, info = ?metadata.info, "image header");
                continue;
            }
            ChunkKind::Text => text::decode_text(chunk.data),
            ChunkKind::CompressedText => text::decode_compressed_text(chunk.data, options),
            ChunkKind::InternationalText => {
                text::decode_international_text(chunk.data, options)
            }
            ChunkKind::Other(kind) => {
                trace!(offset = chunk.offset, kind = %String::from_utf8_lossy(&kind), "chunk");
                continue;
            }
            ChunkKind::End => break,
        };

        match decoded {
            Ok((keyword, value)) => {
                trace!(offset = chunk.offset, %keyword, bytes = value.len(), "text field");
                metadata.fields.insert(keyword, value);
            }
            Err(reason) => {
                debug!(offset = chunk.offset, kind = ?chunk.kind, %reason, "skipping text chunk");
            }
        }
    }

    Ok(metadata)
}

/// Collects every text chunk of a PNG, in file order. See [`read_metadata`].
///
/// # Errors
///
/// As [`read_metadata`].
pub fn read_text_fields(
    data: &[u8],
    options: &ReadOptions,
) -> Result<IndexMap<String, String>, PngTextError> {
    read_metadata(data, options).map(|metadata| metadata.fields)
}

fn read_file(path: &Path) -> Result<Vec<u8>, PngTextError> {
    std::fs::read(path).map_err(|source| PngTextError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Reads a file and returns its header and text fields.
///
/// # Errors
///
/// [`PngTextError::Io`] when the file cannot be read, otherwise as
/// [`read_metadata`].
pub fn read_metadata_from_path(
    path: &Path,
    options: &ReadOptions,
) -> Result<PngMetadata, PngTextError> {
    read_metadata(&read_file(path)?, options)
}

/// Reads a file and returns its text fields.
///
/// # Errors
///
/// [`PngTextError::Io`] when the file cannot be read, otherwise as
/// [`read_text_fields`].
pub fn read_text_fields_from_path(
    path: &Path,
    options: &ReadOptions,
) -> Result<IndexMap<String, String>, PngTextError> {
    read_text_fields(&read_file(path)?, options)
}
