//! Payload classification — decides whether a completed payload is a text
//! message for display or a file to store.
//!
//! The decision is a pure function of the bytes. A payload is a message when
//! it is non-empty UTF-8 made of printable text and does not start with a
//! known media signature (several signatures such as `%PDF-` or `RIFF` are
//! themselves valid ASCII, so UTF-8 validity alone is not enough).

/// Marks a payload that carries its own file name: `\0NAME:<name>\0<content>`.
pub const EMBEDDED_NAME_PREFIX: &[u8] = b"\0NAME:";

use serde::Serialize;

const MAX_FILE_NAME_CHARS: usize = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    Jpeg,
    Png,
    Gif,
    Webp,
    Wav,
    Mp3,
    Ogg,
    Flac,
    Pdf,
    Zip,
    /// No recognised signature.
    Binary,
}

impl FileKind {
    /// Identify a payload by its leading magic bytes.
    pub fn sniff(bytes: &[u8]) -> Option<Self> {
        let riff_form = |form: &[u8]| {
            bytes.len() >= 12 && bytes.starts_with(b"RIFF") && &bytes[8..12] == form
        };
        if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
            Some(Self::Jpeg)
        } else if bytes.starts_with(b"\x89PNG\r\n\x1a\n") {
            Some(Self::Png)
        } else if bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a") {
            Some(Self::Gif)
        } else if riff_form(b"WEBP") {
            Some(Self::Webp)
        } else if riff_form(b"WAVE") {
            Some(Self::Wav)
        } else if bytes.starts_with(b"ID3")
            || (bytes.len() >= 2 && bytes[0] == 0xFF && bytes[1] & 0xE0 == 0xE0)
        {
            Some(Self::Mp3)
        } else if bytes.starts_with(b"OggS") {
            Some(Self::Ogg)
        } else if bytes.starts_with(b"fLaC") {
            Some(Self::Flac)
        } else if bytes.starts_with(b"%PDF-") {
            Some(Self::Pdf)
        } else if bytes.starts_with(b"PK\x03\x04") {
            Some(Self::Zip)
        } else {
            None
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            Self::Jpeg => "jpg",
            Self::Png => "png",
            Self::Gif => "gif",
            Self::Webp => "webp",
            Self::Wav => "wav",
            Self::Mp3 => "mp3",
            Self::Ogg => "ogg",
            Self::Flac => "flac",
            Self::Pdf => "pdf",
            Self::Zip => "zip",
            Self::Binary => "bin",
        }
    }
}

/// Outcome of classifying a completed payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification<'a> {
    Message(&'a str),
    File {
        kind: FileKind,
        /// Name carried inside the payload, not yet sanitised.
        embedded_name: Option<&'a str>,
        /// Payload bytes with any embedded-name header removed.
        content: &'a [u8],
    },
}

pub fn classify(payload: &[u8]) -> Classification<'_> {
    if let Some((name, content)) = split_embedded_name(payload) {
        return Classification::File {
            kind: FileKind::sniff(content).unwrap_or(FileKind::Binary),
            embedded_name: Some(name),
            content,
        };
    }

    if let Some(kind) = FileKind::sniff(payload) {
        return Classification::File {
            kind,
            embedded_name: None,
            content: payload,
        };
    }

    match std::str::from_utf8(payload) {
        Ok(text) if is_plain_text(text) => Classification::Message(text),
        _ => Classification::File {
            kind: FileKind::Binary,
            embedded_name: None,
            content: payload,
        },
    }
}

fn is_plain_text(text: &str) -> bool {
    !text.is_empty()
        && text
            .chars()
            .all(|c| !c.is_control() || matches!(c, '\n' | '\r' | '\t'))
}

/// Prefix `content` with an embedded-name header.
pub fn embed_file_name(name: &str, content: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(EMBEDDED_NAME_PREFIX.len() + name.len() + 1 + content.len());
    out.extend_from_slice(EMBEDDED_NAME_PREFIX);
    out.extend_from_slice(name.as_bytes());
    out.push(0);
    out.extend_from_slice(content);
    out
}

/// Split an embedded-name header off the payload, if one is present and well formed.
pub fn split_embedded_name(payload: &[u8]) -> Option<(&str, &[u8])> {
    let rest = payload.strip_prefix(EMBEDDED_NAME_PREFIX)?;
    let end = rest.iter().position(|&b| b == 0)?;
    let name = std::str::from_utf8(&rest[..end]).ok()?;
    if name.is_empty() {
        return None;
    }
    Some((name, &rest[end + 1..]))
}

/// Reduce an untrusted name to a single safe path component.
///
/// Directory parts are discarded, reserved characters dropped, and the
/// result capped in length. Returns `None` when nothing usable remains.
pub fn sanitize_file_name(name: &str) -> Option<String> {
    let base = name.rsplit(|c: char| c == '/' || c == '\\').next().unwrap_or(name);
    let cleaned: String = base
        .chars()
        .filter(|c| !c.is_control() && !matches!(c, '<' | '>' | ':' | '"' | '|' | '?' | '*'))
        .take(MAX_FILE_NAME_CHARS)
        .collect();
    let cleaned = cleaned.trim_matches(|c: char| c == '.' || c.is_whitespace());
    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned.to_owned())
    }
}
