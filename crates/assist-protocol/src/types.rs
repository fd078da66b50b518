use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

const METADATA_KIND: &str = "metadata";
const PATCH_KIND: &str = "patch";
const APPEND_MESSAGE_CONTENT_KIND: &str = "appendMessageContent";
const ERROR_KIND: &str = "error";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
/// Enumerates supported `MessageType` values.
pub enum MessageType {
    #[default]
    Input,
    Output,
}

/// Rendering hint carried by every message. The set is open: renderers may be
/// registered for content types this crate does not know about.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum MessageContentType {
    #[default]
    Text,
    Markdown,
    Other(String),
}

impl MessageContentType {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Text => "text",
            Self::Markdown => "markdown",
            Self::Other(value) => value.as_str(),
        }
    }
}

impl From<&str> for MessageContentType {
    fn from(value: &str) -> Self {
        match value {
            "text" => Self::Text,
            "markdown" => Self::Markdown,
            other => Self::Other(other.to_string()),
        }
    }
}

impl Serialize for MessageContentType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for MessageContentType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::from(raw.as_str()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
/// One transcript entry. `message_id` is producer-assigned and unique within a conversation.
pub struct Message {
    pub message_id: String,
    #[serde(rename = "type")]
    pub message_type: MessageType,
    #[serde(default)]
    pub content_type: MessageContentType,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
}

impl Message {
    pub fn input(message_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            message_id: message_id.into(),
            message_type: MessageType::Input,
            content_type: MessageContentType::Text,
            content: content.into(),
            trace_id: None,
        }
    }

    pub fn output(message_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            message_id: message_id.into(),
            message_type: MessageType::Output,
            content_type: MessageContentType::Markdown,
            content: content.into(),
            trace_id: None,
        }
    }

    pub fn with_trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = Some(trace_id.into());
        self
    }

    pub fn append_content(&mut self, content: &str) {
        self.content.push_str(content);
    }

    /// Folds a later copy of the same message into this one.
    ///
    /// Content never shrinks or gets rewritten: the incoming content is only
    /// adopted when it extends what is already present.
    pub fn merge_from(&mut self, incoming: Message) {
        self.message_type = incoming.message_type;
        self.content_type = incoming.content_type;
        if incoming.trace_id.is_some() {
            self.trace_id = incoming.trace_id;
        }
        if incoming.content.len() > self.content.len()
            && incoming.content.starts_with(self.content.as_str())
        {
            self.content = incoming.content;
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
/// Durable record of one question/answer round.
pub struct Interaction {
    pub interaction_id: String,
    #[serde(default)]
    pub conversation_id: String,
    #[serde(default)]
    pub input: String,
    #[serde(default)]
    pub response: String,
    #[serde(default)]
    pub create_time: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_interaction_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
/// Page context attached to a question.
pub struct InputContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
/// Question as submitted by the browser client.
pub struct MessageInput {
    #[serde(rename = "type", default)]
    pub message_type: MessageType,
    #[serde(default)]
    pub content_type: MessageContentType,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<InputContext>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_prefix: Option<String>,
}

impl MessageInput {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Self::default()
        }
    }

    /// Converts the question into a transcript message with the given id.
    pub fn to_message(&self, message_id: impl Into<String>) -> Message {
        Message {
            message_id: message_id.into(),
            message_type: MessageType::Input,
            content_type: self.content_type.clone(),
            content: self.content.clone(),
            trace_id: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
/// Conversation snapshot carried by `metadata` and `patch` events.
///
/// Keys this crate does not model are kept in `extra`, so a plain JSON body
/// delivered in text mode survives the trip into the reducer.
pub struct ConversationSnapshot {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub interactions: Vec<Interaction>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub messages: Vec<Message>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ConversationSnapshot {
    /// Wraps an arbitrary response body without failing.
    ///
    /// Objects are decoded into the typed fields when possible and otherwise
    /// kept verbatim in `extra`; any other JSON value lands under `extra.body`.
    pub fn from_response_body(body: Value) -> Self {
        match body {
            Value::Object(map) => {
                match serde_json::from_value::<Self>(Value::Object(map.clone())) {
                    Ok(snapshot) => snapshot,
                    Err(_) => Self {
                        extra: map,
                        ..Self::default()
                    },
                }
            }
            Value::Null => Self::default(),
            other => {
                let mut extra = Map::new();
                extra.insert("body".to_string(), other);
                Self {
                    extra,
                    ..Self::default()
                }
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
/// Incremental text for one message.
pub struct AppendMessageContent {
    pub message_id: String,
    pub content: String,
}

/// One event of a streamed assistant response.
///
/// On the wire every event is `{"type": <kind>, "body": <payload>}`. The older
/// producer spelling `{"event": <kind>, "data": <payload>}` is accepted when
/// decoding. Kinds this crate does not know decode into [`StreamChunk::Unknown`].
#[derive(Debug, Clone, PartialEq)]
pub enum StreamChunk {
    Metadata(ConversationSnapshot),
    Patch(ConversationSnapshot),
    AppendMessageContent(AppendMessageContent),
    Error(String),
    Unknown { kind: String, body: Value },
}

impl StreamChunk {
    pub fn append(message_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self::AppendMessageContent(AppendMessageContent {
            message_id: message_id.into(),
            content: content.into(),
        })
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error(message.into())
    }

    pub fn kind(&self) -> &str {
        match self {
            Self::Metadata(_) => METADATA_KIND,
            Self::Patch(_) => PATCH_KIND,
            Self::AppendMessageContent(_) => APPEND_MESSAGE_CONTENT_KIND,
            Self::Error(_) => ERROR_KIND,
            Self::Unknown { kind, .. } => kind.as_str(),
        }
    }
}

#[derive(Serialize)]
struct WireChunkRef<'a, T: Serialize> {
    #[serde(rename = "type")]
    kind: &'a str,
    body: &'a T,
}

#[derive(Deserialize)]
struct WireChunk {
    #[serde(rename = "type", alias = "event")]
    kind: String,
    #[serde(default, alias = "data")]
    body: Value,
}

impl Serialize for StreamChunk {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let kind = self.kind();
        match self {
            Self::Metadata(snapshot) | Self::Patch(snapshot) => WireChunkRef {
                kind,
                body: snapshot,
            }
            .serialize(serializer),
            Self::AppendMessageContent(append) => WireChunkRef { kind, body: append }.serialize(serializer),
            Self::Error(message) => WireChunkRef {
                kind,
                body: message,
            }
            .serialize(serializer),
            Self::Unknown { body, .. } => WireChunkRef { kind, body }.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for StreamChunk {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let wire = WireChunk::deserialize(deserializer)?;
        match wire.kind.as_str() {
            METADATA_KIND => snapshot_from_body(wire.body)
                .map(Self::Metadata)
                .map_err(D::Error::custom),
            PATCH_KIND => snapshot_from_body(wire.body)
                .map(Self::Patch)
                .map_err(D::Error::custom),
            APPEND_MESSAGE_CONTENT_KIND => serde_json::from_value(wire.body)
                .map(Self::AppendMessageContent)
                .map_err(D::Error::custom),
            ERROR_KIND => Ok(Self::Error(error_message_from_body(wire.body))),
            _ => Ok(Self::Unknown {
                kind: wire.kind,
                body: wire.body,
            }),
        }
    }
}

fn snapshot_from_body(body: Value) -> Result<ConversationSnapshot, serde_json::Error> {
    if body.is_null() {
        return Ok(ConversationSnapshot::default());
    }
    serde_json::from_value(body)
}

fn error_message_from_body(body: Value) -> String {
    match body {
        Value::String(message) => message,
        Value::Object(map) => match map.get("message").and_then(Value::as_str) {
            Some(message) => message.to_string(),
            None => Value::Object(map).to_string(),
        },
        Value::Null => "unknown stream error".to_string(),
        other => other.to_string(),
    }
}
