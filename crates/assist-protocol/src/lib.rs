//! Wire protocol for streaming assistant responses.
//!
//! A response is a sequence of [`StreamChunk`] events. The frame codec turns
//! each event into one self-delimited frame, and the [`ChunkReassembler`]
//! recovers events from network reads that split frames at arbitrary byte
//! offsets.

pub mod api;
mod chunk_reassembler;
mod error;
mod frame_codec;
mod types;

pub use api::{
    AbortRequest, AbortResponse, ChatRound, RegenerateRequest, SendMessageRequest,
    STREAM_FRAMING_HEADER, STREAM_HEADER,
};
pub use chunk_reassembler::ChunkReassembler;
pub use error::{FrameDecodeError, ProtocolError};
pub use frame_codec::{
    decode_frame, encode_frame, encode_frames, FrameConvention, LEGACY_FRAME_PREFIX,
};
pub use types::{
    AppendMessageContent, ConversationSnapshot, InputContext, Interaction, Message,
    MessageContentType, MessageInput, MessageType, StreamChunk,
};
