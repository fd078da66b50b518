//! Event ⇄ frame conversion.
//!
//! Canonical frames are one compact JSON document followed by `\n`. Compact
//! JSON never contains a raw newline (string newlines are escaped), so the
//! delimiter cannot collide with payload bytes. The legacy convention prefixes
//! each document with `data: ` and terminates it with `\n\n`.

use std::fmt;
use std::str::FromStr;

use crate::{FrameDecodeError, ProtocolError, StreamChunk};

pub const LEGACY_FRAME_PREFIX: &str = "data: ";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
/// Framing convention of one stream. Chosen before the first byte is read and
/// never switched mid-stream.
pub enum FrameConvention {
    #[default]
    Ndjson,
    LegacySse,
}

impl FrameConvention {
    pub fn delimiter(self) -> &'static [u8] {
        match self {
            Self::Ndjson => b"\n",
            Self::LegacySse => b"\n\n",
        }
    }

    pub fn prefix(self) -> &'static str {
        match self {
            Self::Ndjson => "",
            Self::LegacySse => LEGACY_FRAME_PREFIX,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ndjson => "ndjson",
            Self::LegacySse => "legacy-sse",
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            Self::Ndjson => "application/x-ndjson",
            Self::LegacySse => "text/event-stream",
        }
    }
}

impl fmt::Display for FrameConvention {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FrameConvention {
    type Err = ProtocolError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "ndjson" | "jsonl" | "newline" => Ok(Self::Ndjson),
            "legacy-sse" | "legacy" | "sse" => Ok(Self::LegacySse),
            other => Err(ProtocolError::UnknownConvention(other.to_string())),
        }
    }
}

/// Serializes one event into a self-delimited frame.
pub fn encode_frame(
    chunk: &StreamChunk,
    convention: FrameConvention,
) -> Result<Vec<u8>, ProtocolError> {
    let payload = serde_json::to_vec(chunk)?;
    let prefix = convention.prefix().as_bytes();
    let delimiter = convention.delimiter();
    let mut frame = Vec::with_capacity(prefix.len() + payload.len() + delimiter.len());
    frame.extend_from_slice(prefix);
    frame.extend_from_slice(&payload);
    frame.extend_from_slice(delimiter);
    Ok(frame)
}

/// Concatenates the frames of several events.
pub fn encode_frames<'a, I>(chunks: I, convention: FrameConvention) -> Result<Vec<u8>, ProtocolError>
where
    I: IntoIterator<Item = &'a StreamChunk>,
{
    let mut bytes = Vec::new();
    for chunk in chunks {
        bytes.extend(encode_frame(chunk, convention)?);
    }
    Ok(bytes)
}

/// Decodes one frame payload with its delimiter already removed.
///
/// Surrounding whitespace is ignored. Under the legacy convention the
/// `data:` prefix is optional.
pub fn decode_frame(
    segment: &[u8],
    convention: FrameConvention,
) -> Result<StreamChunk, FrameDecodeError> {
    let text = std::str::from_utf8(segment).map_err(FrameDecodeError::InvalidUtf8)?;
    let text = text.trim();
    let payload = match convention {
        FrameConvention::Ndjson => text,
        FrameConvention::LegacySse => text
            .strip_prefix("data:")
            .map(str::trim_start)
            .unwrap_or(text),
    };
    if payload.is_empty() {
        return Err(FrameDecodeError::EmptyFrame);
    }
    serde_json::from_str(payload).map_err(FrameDecodeError::InvalidJson)
}
