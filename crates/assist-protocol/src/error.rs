use thiserror::Error;

use crate::StreamChunk;

#[derive(Debug, Error)]
/// Enumerates supported `ProtocolError` values.
pub enum ProtocolError {
    #[error("failed to encode stream frame: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("unsupported frame convention '{0}' (expected 'ndjson' or 'legacy-sse')")]
    UnknownConvention(String),
}

/// A single frame whose payload could not be decoded.
///
/// Decode failures are local to one frame: the reassembler downgrades them to
/// [`StreamChunk::Error`] so the rest of the stream keeps flowing.
#[derive(Debug, Error)]
pub enum FrameDecodeError {
    #[error("stream frame is not valid UTF-8: {0}")]
    InvalidUtf8(#[source] std::str::Utf8Error),
    #[error("failed to parse stream frame: {0}")]
    InvalidJson(#[source] serde_json::Error),
    #[error("stream frame is empty")]
    EmptyFrame,
}

impl FrameDecodeError {
    pub fn into_error_chunk(self) -> StreamChunk {
        StreamChunk::Error(self.to_string())
    }
}
