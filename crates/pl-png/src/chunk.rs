use crate::{PngTextError, ReadOptions};

pub(crate) const PNG_SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', b'\r', b'\n', 0x1A, b'\n'];

/// Length, type and CRC around each chunk body.
const CHUNK_OVERHEAD: usize = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ChunkKind {
    Header,
    Text,
    CompressedText,
    InternationalText,
    End,
    Other([u8; 4]),
}

impl ChunkKind {
    fn from_bytes(bytes: [u8; 4]) -> Self {
        match &bytes {
            b"IHDR" => Self::Header,
            b"tEXt" => Self::Text,
            b"zTXt" => Self::CompressedText,
            b"iTXt" => Self::InternationalText,
            b"IEND" => Self::End,
            _ => Self::Other(bytes),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct Chunk<'a> {
    pub kind: ChunkKind,
    pub offset: usize,
    pub data: &'a [u8],
}

/// Walks chunks after the signature. Stops after `IEND` or at the end of
/// the data; CRCs are not checked.
pub(crate) struct Chunks<'a> {
    data: &'a [u8],
    pos: usize,
    max_chunk_len: u32,
    done: bool,
}

impl<'a> Chunks<'a> {
    pub(crate) fn new(data: &'a [u8], options: &ReadOptions) -> Result<Self, PngTextError> {
        if !data.starts_with(&PNG_SIGNATURE) {
            return Err(PngTextError::NotPng);
        }
        Ok(Self {
            data,
            pos: PNG_SIGNATURE.len(),
            max_chunk_len: options.max_chunk_len,
            done: false,
        })
    }

    fn read_chunk(&mut self) -> Result<Chunk<'a>, PngTextError> {
        let pos = self.pos;
        let header = self
            .data
            .get(pos..pos + 8)
            .ok_or(PngTextError::Truncated { offset: pos })?;
        let length = u32::from_be_bytes([header[0], header[1], header[2], header[3]]);
        if length > self.max_chunk_len {
            return Err(PngTextError::ChunkTooLarge {
                offset: pos,
                length,
                limit: self.max_chunk_len,
            });
        }

        let kind = ChunkKind::from_bytes([header[4], header[5], header[6], header[7]]);
        let body_start = pos + 8;
        let body_end = body_start + length as usize;
        if body_end + 4 > self.data.len() {
            return Err(PngTextError::Truncated { offset: pos });
        }

        self.pos = pos + CHUNK_OVERHEAD + length as usize;
        Ok(Chunk {
            kind,
            offset: pos,
            data: &self.data[body_start..body_end],
        })
    }
}

impl<'a> Iterator for Chunks<'a> {
    type Item = Result<Chunk<'a>, PngTextError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done || self.pos >= self.data.len() {
            return None;
        }
        let chunk = self.read_chunk();
        match &chunk {
            Ok(chunk) if chunk.kind == ChunkKind::End => self.done = true,
            Err(_) => self.done = true,
            Ok(_) => {}
        }
        Some(chunk)
    }
}
