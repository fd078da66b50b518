//! Browser-side half of the assistant streaming protocol, as a library.
//!
//! [`ResponseIntake`] turns an HTTP response into a [`ChunkSubscription`],
//! [`reduce`] folds each delivered signal into a [`ConversationState`], and
//! [`ConversationSession`] owns that state and applies signals in order.

mod conversation_state;
mod error;
mod http_client;
mod response_intake;
mod subscription;

pub use conversation_state::{
    reduce, ChatAction, ConversationSession, ConversationState, ResponsePhase,
};
pub use error::AssistClientError;
pub use http_client::{AssistantHttpClient, AssistantHttpClientConfig};
pub use response_intake::{delivery_mode_from_headers, framing_from_headers, DeliveryMode, ResponseIntake};
pub use subscription::{ChunkSubscription, IntakeSignal, StreamTermination};
