//! Gateway HTTP contract shared by the server and the client.

use serde::{Deserialize, Serialize};

use crate::{Interaction, Message, MessageInput};

pub const SEND_MESSAGE_ENDPOINT: &str = "/api/assistant/send_message";
pub const REGENERATE_ENDPOINT: &str = "/api/assistant/regenerate";
pub const ABORT_ENDPOINT: &str = "/api/assistant/abort";
pub const CONVERSATION_ENDPOINT: &str = "/api/assistant/conversations/{conversation_id}";

/// Response header announcing that the body is a stream of frames.
pub const STREAM_HEADER: &str = "x-stream";
/// Response header naming the frame convention of a streamed body.
pub const STREAM_FRAMING_HEADER: &str = "x-stream-framing";

fn default_stream() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
/// Body of `POST /api/assistant/send_message`.
pub struct SendMessageRequest {
    pub input: MessageInput,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    #[serde(default = "default_stream")]
    pub stream: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
/// Body of `PUT /api/assistant/regenerate`.
pub struct RegenerateRequest {
    pub conversation_id: String,
    pub interaction_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
/// Body of `POST /api/assistant/abort`.
pub struct AbortRequest {
    pub conversation_id: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
/// Reply of `POST /api/assistant/abort`.
pub struct AbortResponse {
    pub aborted: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
/// Non-streamed reply: one completed question/answer round.
pub struct ChatRound {
    pub conversation_id: String,
    pub interaction_id: String,
    #[serde(default)]
    pub interactions: Vec<Interaction>,
    #[serde(default)]
    pub messages: Vec<Message>,
}

/// Expands the conversation route template for one id, percent-encoding it
/// as a single path segment.
pub fn conversation_path(conversation_id: &str) -> String {
    CONVERSATION_ENDPOINT.replace(
        "{conversation_id}",
        &percent_encode_path_segment(conversation_id),
    )
}

fn percent_encode_path_segment(value: &str) -> String {
    const HEX: &[u8; 16] = b"0123456789ABCDEF";
    let mut encoded = String::with_capacity(value.len());
    for byte in value.bytes() {
        let is_unreserved = matches!(
            byte,
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~'
        );
        if is_unreserved {
            encoded.push(char::from(byte));
        } else {
            encoded.push('%');
            encoded.push(char::from(HEX[usize::from(byte >> 4)]));
            encoded.push(char::from(HEX[usize::from(byte & 0x0F)]));
        }
    }
    encoded
}
