//! Fragment codec — payload bytes to bounded-width base64 chunks and back.
//!
//! The serial link forbids raw control bytes, so payloads travel as
//! standard base64 (RFC 4648, `=` padded). Chunks are plain slices of the
//! encoded text; decoding concatenates them in the order given.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;

use crate::error::LinkError;

/// Split `payload` into base64 chunks of at most `max_chunk_chars` characters.
///
/// An empty payload yields exactly one empty chunk so that empty files are
/// still transferable.
pub fn encode(payload: &[u8], max_chunk_chars: usize) -> Result<Vec<String>, LinkError> {
    if max_chunk_chars == 0 {
        return Err(LinkError::invalid("max_chunk_chars must be at least 1"));
    }

    let text = STANDARD.encode(payload);
    if text.is_empty() {
        return Ok(vec![String::new()]);
    }

    let mut chunks = Vec::with_capacity(chunk_count(payload.len(), max_chunk_chars));
    let mut rest = text.as_str();
    while !rest.is_empty() {
        // base64 is ASCII, every byte offset is a char boundary
        let (head, tail) = rest.split_at(rest.len().min(max_chunk_chars));
        chunks.push(head.to_owned());
        rest = tail;
    }
    Ok(chunks)
}

/// Concatenate chunks in the given order and reverse the base64 transform.
pub fn decode<I, S>(chunks: I) -> Result<Vec<u8>, LinkError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut text = String::new();
    for chunk in chunks {
        text.push_str(chunk.as_ref());
    }
    Ok(STANDARD.decode(text.as_bytes())?)
}

/// Number of chunks `encode` produces for a payload of `payload_len` bytes.
pub fn chunk_count(payload_len: usize, max_chunk_chars: usize) -> usize {
    if max_chunk_chars == 0 {
        return 0;
    }
    let encoded = payload_len.div_ceil(3) * 4;
    encoded.div_ceil(max_chunk_chars).max(1)
}
