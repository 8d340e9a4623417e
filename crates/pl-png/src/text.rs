use std::io::Read;

use flate2::read::ZlibDecoder;
use thiserror::Error;

use crate::ReadOptions;

/// Only compression method defined by PNG (zlib deflate).
const METHOD_DEFLATE: u8 = 0;

/// Why a single text chunk was skipped.
#[derive(Debug, Error, PartialEq, Eq)]
pub(crate) enum TextChunkError {
    #[error("missing keyword terminator")]
    NoKeyword,
    #[error("keyword is empty or longer than 79 bytes")]
    BadKeyword,
    #[error("chunk ends inside its header fields")]
    ShortHeader,
    #[error("unknown compression method {0}")]
    UnknownMethod(u8),
    #[error("compressed text skipped")]
    CompressionDisabled,
    #[error("inflate failed: {0}")]
    Inflate(String),
    #[error("inflated text exceeds {0} bytes")]
    InflatedTooLarge(usize),
    #[error("text is not valid UTF-8")]
    NotUtf8,
}

pub(crate) type TextField = (String, String);

/// `keyword\0text`, both Latin-1.
pub(crate) fn decode_text(data: &[u8]) -> Result<TextField, TextChunkError> {
    let (keyword, text) = split_keyword(data)?;
    Ok((keyword, latin1(text)))
}

/// `keyword\0method compressed-text`; the inflated text is Latin-1.
pub(crate) fn decode_compressed_text(
    data: &[u8],
    options: &ReadOptions,
) -> Result<TextField, TextChunkError> {
    let (keyword, rest) = split_keyword(data)?;
    let (&method, compressed) = rest.split_first().ok_or(TextChunkError::ShortHeader)?;
    let text = inflate(method, compressed, options)?;
    Ok((keyword, latin1(&text)))
}

/// `keyword\0 flag method language\0 translated\0 text`; the text is UTF-8.
pub(crate) fn decode_international_text(
    data: &[u8],
    options: &ReadOptions,
) -> Result<TextField, TextChunkError> {
    let (keyword, rest) = split_keyword(data)?;
    let [flag, method, rest @ ..] = rest else {
        return Err(TextChunkError::ShortHeader);
    };
    let (_language, rest) = split_nul(rest).ok_or(TextChunkError::ShortHeader)?;
    let (_translated, text) = split_nul(rest).ok_or(TextChunkError::ShortHeader)?;

    let text = if *flag == 0 {
        text.to_vec()
    } else {
        inflate(*method, text, options)?
    };
    let text = String::from_utf8(text).map_err(|_| TextChunkError::NotUtf8)?;
    Ok((keyword, text))
}

fn split_nul(data: &[u8]) -> Option<(&[u8], &[u8])> {
    let end = data.iter().position(|&byte| byte == 0)?;
    Some((&data[..end], &data[end + 1..]))
}

fn split_keyword(data: &[u8]) -> Result<(String, &[u8]), TextChunkError> {
    let (keyword, rest) = split_nul(data).ok_or(TextChunkError::NoKeyword)?;
    if keyword.is_empty() || keyword.len() > 79 {
        return Err(TextChunkError::BadKeyword);
    }
    Ok((latin1(keyword), rest))
}

fn latin1(bytes: &[u8]) -> String {
    bytes.iter().copied().map(char::from).collect()
}

fn inflate(method: u8, compressed: &[u8], options: &ReadOptions) -> Result<Vec<u8>, TextChunkError> {
    if method != METHOD_DEFLATE {
        return Err(TextChunkError::UnknownMethod(method));
    }
    if !options.decompress {
        return Err(TextChunkError::CompressionDisabled);
    }

    let limit = options.max_inflated_len;
    let mut inflated = Vec::new();
    ZlibDecoder::new(compressed)
        .take(limit as u64 + 1)
        .read_to_end(&mut inflated)
        .map_err(|error| TextChunkError::Inflate(error.to_string()))?;
    if inflated.len() > limit {
        return Err(TextChunkError::InflatedTooLarge(limit));
    }
    Ok(inflated)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use flate2::Compression;
    use flate2::write::ZlibEncoder;

    use super::{
        TextChunkError, decode_compressed_text, decode_international_text, decode_text,
    };
    use crate::ReadOptions;

    fn deflate(text: &[u8]) -> Vec<u8> {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(text).expect("write");
        encoder.finish().expect("finish")
    }

    #[test]
    fn text_is_latin1() {
        let (keyword, text) = decode_text(b"Comment\0caf\xe9").expect("decode");
        assert_eq!(keyword, "Comment");
        assert_eq!(text, "café");
    }

    #[test]
    fn text_without_terminator_is_rejected() {
        assert_eq!(decode_text(b"parameters"), Err(TextChunkError::NoKeyword));
        assert_eq!(decode_text(b"\0text"), Err(TextChunkError::BadKeyword));
    }

    #[test]
    fn compressed_text_is_inflated() {
        let mut data = b"parameters\0\0".to_vec();
        data.extend(deflate(b"a cat\nSteps: 20"));
        let (keyword, text) =
            decode_compressed_text(&data, &ReadOptions::default()).expect("decode");
        assert_eq!(keyword, "parameters");
        assert_eq!(text, "a cat\nSteps: 20");
    }

    #[test]
    fn compressed_text_is_skipped_when_disabled() {
        let mut data = b"parameters\0\0".to_vec();
        data.extend(deflate(b"a cat"));
        assert_eq!(
            decode_compressed_text(&data, &ReadOptions::without_decompression()),
            Err(TextChunkError::CompressionDisabled)
        );
    }

    #[test]
    fn inflated_size_is_bounded() {
        let mut data = b"prompt\0\0".to_vec();
        data.extend(deflate(&[b'x'; 4096]));
        let options = ReadOptions {
            max_inflated_len: 1024,
            ..ReadOptions::default()
        };
        assert_eq!(
            decode_compressed_text(&data, &options),
            Err(TextChunkError::InflatedTooLarge(1024))
        );
    }

    #[test]
    fn international_text_plain_and_compressed() {
        let plain = b"prompt\0\0\0en\0Prompt\0{\"1\": \"\xe2\x9c\x93\"}";
        let (keyword, text) =
            decode_international_text(plain, &ReadOptions::default()).expect("plain");
        assert_eq!(keyword, "prompt");
        assert_eq!(text, "{\"1\": \"\u{2713}\"}");

        let mut compressed = b"prompt\0\x01\0\0\0".to_vec();
        compressed.extend(deflate("ünïcode".as_bytes()));
        let (_, text) =
            decode_international_text(&compressed, &ReadOptions::default()).expect("compressed");
        assert_eq!(text, "ünïcode");
    }

    #[test]
    fn international_text_must_be_utf8() {
        assert_eq!(
            decode_international_text(b"k\0\0\0\0\0\xff", &ReadOptions::default()),
            Err(TextChunkError::NotUtf8)
        );
        assert_eq!(
            decode_international_text(b"k\0\0", &ReadOptions::default()),
            Err(TextChunkError::ShortHeader)
        );
    }
}
