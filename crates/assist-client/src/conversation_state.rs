//! Conversation transcript state and the pure reducer that evolves it.

use assist_protocol::{
    AppendMessageContent, ConversationSnapshot, Interaction, Message, MessageInput, StreamChunk,
};

use crate::{ChunkSubscription, DeliveryMode, IntakeSignal, StreamTermination};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
/// Lifecycle of the current response.
pub enum ResponsePhase {
    #[default]
    Idle,
    Responding,
    Errored,
}

#[derive(Debug, Clone, PartialEq, Default)]
/// Client-visible transcript plus the status of the in-flight response.
pub struct ConversationState {
    pub conversation_id: Option<String>,
    pub interactions: Vec<Interaction>,
    pub messages: Vec<Message>,
    /// Question sent but not yet acknowledged by a `metadata` event.
    pub pending_input: Option<MessageInput>,
    pub phase: ResponsePhase,
    pub llm_responding: bool,
    pub response_type: Option<DeliveryMode>,
    pub error: Option<String>,
}

impl ConversationState {
    pub fn message(&self, message_id: &str) -> Option<&Message> {
        self.messages
            .iter()
            .find(|message| message.message_id == message_id)
    }

    pub fn is_responding(&self) -> bool {
        self.llm_responding
    }
}

#[derive(Debug, Clone, PartialEq)]
/// Every input the reducer understands.
pub enum ChatAction {
    Send(MessageInput),
    ResponseType(DeliveryMode),
    Chunk(StreamChunk),
    Terminated(StreamTermination),
    Reset,
}

impl From<IntakeSignal> for ChatAction {
    fn from(signal: IntakeSignal) -> Self {
        match signal {
            IntakeSignal::Chunk(chunk) => Self::Chunk(chunk),
            IntakeSignal::Terminated(termination) => Self::Terminated(termination),
        }
    }
}

/// Applies one action to a state and returns the next state.
pub fn reduce(mut state: ConversationState, action: ChatAction) -> ConversationState {
    match action {
        ChatAction::Send(input) => {
            state.pending_input = Some(input);
            state.error = None;
            state.phase = ResponsePhase::Responding;
            state.llm_responding = true;
        }
        ChatAction::ResponseType(mode) => state.response_type = Some(mode),
        ChatAction::Chunk(StreamChunk::Metadata(snapshot)) => {
            merge_snapshot(&mut state, snapshot);
            state.pending_input = None;
            if state.phase != ResponsePhase::Errored {
                state.phase = ResponsePhase::Responding;
            }
        }
        ChatAction::Chunk(StreamChunk::Patch(snapshot)) => merge_snapshot(&mut state, snapshot),
        ChatAction::Chunk(StreamChunk::AppendMessageContent(append)) => {
            append_content(&mut state, append)
        }
        ChatAction::Chunk(StreamChunk::Error(message)) => {
            state.error = Some(message);
            state.phase = ResponsePhase::Errored;
            state.llm_responding = false;
        }
        ChatAction::Chunk(StreamChunk::Unknown { .. }) => {}
        ChatAction::Terminated(_) => {
            state.llm_responding = false;
            state.pending_input = None;
            if state.phase == ResponsePhase::Responding {
                state.phase = ResponsePhase::Idle;
            }
        }
        ChatAction::Reset => return ConversationState::default(),
    }
    state
}

fn merge_snapshot(state: &mut ConversationState, snapshot: ConversationSnapshot) {
    if let Some(conversation_id) = snapshot.conversation_id {
        state.conversation_id = Some(conversation_id);
    }
    for interaction in snapshot.interactions {
        match state
            .interactions
            .iter_mut()
            .find(|existing| existing.interaction_id == interaction.interaction_id)
        {
            Some(existing) => *existing = interaction,
            None => state.interactions.push(interaction),
        }
    }
    for message in snapshot.messages {
        match state
            .messages
            .iter_mut()
            .find(|existing| existing.message_id == message.message_id)
        {
            Some(existing) => existing.merge_from(message),
            None => state.messages.push(message),
        }
    }
}

fn append_content(state: &mut ConversationState, append: AppendMessageContent) {
    if let Some(message) = state
        .messages
        .iter_mut()
        .find(|message| message.message_id == append.message_id)
    {
        message.append_content(&append.content);
    }
}

/// Owns one conversation's state and applies actions strictly in order.
#[derive(Debug, Default)]
pub struct ConversationSession {
    state: ConversationState,
}

impl ConversationSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &ConversationState {
        &self.state
    }

    pub fn into_state(self) -> ConversationState {
        self.state
    }

    pub fn dispatch(&mut self, action: ChatAction) {
        match &action {
            ChatAction::Chunk(StreamChunk::Unknown { kind, .. }) => {
                tracing::debug!(kind = %kind, "ignoring unknown stream chunk kind");
            }
            ChatAction::Chunk(StreamChunk::AppendMessageContent(append))
                if self.state.message(&append.message_id).is_none() =>
            {
                tracing::debug!(
                    message_id = %append.message_id,
                    "dropping content for unknown message"
                );
            }
            _ => {}
        }
        let state = std::mem::take(&mut self.state);
        self.state = reduce(state, action);
    }

    /// Applies every signal of a subscription, recording its delivery mode first.
    pub async fn drive(&mut self, subscription: ChunkSubscription) -> StreamTermination {
        self.drive_with(subscription, |_| {}).await
    }

    /// Like [`drive`](Self::drive), calling `observer` with the state after each signal.
    pub async fn drive_with<F>(
        &mut self,
        mut subscription: ChunkSubscription,
        mut observer: F,
    ) -> StreamTermination
    where
        F: FnMut(&ConversationState),
    {
        self.dispatch(ChatAction::ResponseType(subscription.delivery_mode()));
        let mut termination = StreamTermination::Failed;
        while let Some(signal) = subscription.next().await {
            if let IntakeSignal::Terminated(ended) = &signal {
                termination = *ended;
            }
            self.dispatch(ChatAction::from(signal));
            observer(&self.state);
        }
        termination
    }
}
