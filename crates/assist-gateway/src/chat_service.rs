//! Question/answer rounds against the root agent.
//!
//! Every round gets a local interaction id taken from the clock. The transcript
//! messages of the round are `{id}_0` (question) and `{id}_1` (answer); the id
//! reported by the agent framework is kept as the answer's trace id and as the
//! interaction's `parent_interaction_id`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use assist_core::{current_iso8601_timestamp, current_unix_timestamp_ms, CancellationHandle};
use assist_protocol::{
    ChatRound, ConversationSnapshot, Interaction, Message, MessageInput, SendMessageRequest,
    StreamChunk,
};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::agent_executor::{AgentCallError, AgentExecutor, AgentRunOutput, AgentRunPayload};
use crate::cancellation_registry::{CancellationRegistration, CancellationRegistry};
use crate::storage::ConversationStorage;

pub const DEFAULT_STREAM_CHUNK_CHARS: usize = 16;

#[derive(Debug, Error)]
/// Enumerates supported `ChatServiceError` values.
pub enum ChatServiceError {
    #[error("agent call failed: {0}")]
    Agent(#[from] AgentCallError),
    #[error("agent execution for conversation '{0}' was aborted")]
    Aborted(String),
    #[error("conversation storage failed: {0}")]
    Storage(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Controls how a finished answer is replayed as `appendMessageContent` events.
pub struct ChatStreamConfig {
    pub stream_chunk_chars: usize,
    /// Delay between slices; zero sends them back to back.
    pub stream_pacing_ms: u64,
}

impl Default for ChatStreamConfig {
    fn default() -> Self {
        Self {
            stream_chunk_chars: DEFAULT_STREAM_CHUNK_CHARS,
            stream_pacing_ms: 0,
        }
    }
}

#[derive(Clone)]
/// Public struct `ChatService` used across Assist components.
pub struct ChatService {
    executor: Arc<dyn AgentExecutor>,
    storage: Arc<dyn ConversationStorage>,
    registry: CancellationRegistry,
    config: ChatStreamConfig,
    last_interaction_id: Arc<AtomicU64>,
}

struct RoundContext {
    interaction_id: String,
    conversation_id: Option<String>,
    input: MessageInput,
    create_time: String,
}

impl ChatService {
    pub fn new(
        executor: Arc<dyn AgentExecutor>,
        storage: Arc<dyn ConversationStorage>,
        registry: CancellationRegistry,
        config: ChatStreamConfig,
    ) -> Self {
        Self {
            executor,
            storage,
            registry,
            config,
            last_interaction_id: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Clock-based interaction id, bumped past the previous one when two rounds
    /// start within the same millisecond.
    fn next_interaction_id(&self) -> String {
        let now = current_unix_timestamp_ms();
        let previous = self
            .last_interaction_id
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |last| {
                Some(now.max(last.saturating_add(1)))
            })
            .unwrap_or(now);
        now.max(previous.saturating_add(1)).to_string()
    }

    pub fn registry(&self) -> &CancellationRegistry {
        &self.registry
    }

    /// Runs one round to completion and returns it as a whole.
    pub async fn request_llm(
        &self,
        request: SendMessageRequest,
    ) -> Result<ChatRound, ChatServiceError> {
        validate_input(&request.input)?;
        let round = RoundContext::start(
            self.next_interaction_id(),
            request.input,
            request.conversation_id,
        );
        let registration = round
            .conversation_id
            .as_deref()
            .map(|conversation_id| self.registry.register(conversation_id));
        let payload = question_payload(&round.input, round.conversation_id.as_deref());
        let output = self.execute(payload, registration.as_ref()).await?;
        drop(registration);

        let interaction = self.finalize_round(&round, &output).await;
        self.chat_round(interaction).await
    }

    /// Starts one round and returns its events as they are produced.
    ///
    /// The channel yields `metadata`, then `patch` and the answer slices, or an
    /// `error` event; it closes when the round is over. The cancellation entry
    /// is registered before this returns, so an abort can never miss it.
    pub fn stream_llm(
        &self,
        request: SendMessageRequest,
    ) -> Result<mpsc::UnboundedReceiver<StreamChunk>, ChatServiceError> {
        validate_input(&request.input)?;
        let round = RoundContext::start(
            self.next_interaction_id(),
            request.input,
            request.conversation_id,
        );
        let registration = round
            .conversation_id
            .as_deref()
            .map(|conversation_id| self.registry.register(conversation_id));
        let (tx, rx) = mpsc::unbounded_channel();
        let service = self.clone();
        tokio::spawn(async move {
            service
                .run_streamed_round(round, registration.as_ref(), &tx)
                .await;
            // The entry is gone before the receiver observes the close.
            drop(registration);
            drop(tx);
        });
        Ok(rx)
    }

    async fn run_streamed_round(
        &self,
        round: RoundContext,
        registration: Option<&CancellationRegistration>,
        tx: &mpsc::UnboundedSender<StreamChunk>,
    ) {
        if tx.send(StreamChunk::Metadata(round.metadata())).is_err() {
            return;
        }

        let payload = question_payload(&round.input, round.conversation_id.as_deref());
        let output = match self.execute(payload, registration).await {
            Ok(output) => output,
            Err(error) => {
                let _ = tx.send(StreamChunk::error(error.to_string()));
                return;
            }
        };

        let interaction = self.finalize_round(&round, &output).await;
        let output_message_id = round.output_message_id();
        let mut output_message = Message::output(output_message_id.clone(), "");
        output_message.trace_id = interaction.parent_interaction_id.clone();
        let patch = ConversationSnapshot {
            conversation_id: Some(interaction.conversation_id.clone()),
            interactions: vec![interaction],
            messages: vec![output_message],
            ..ConversationSnapshot::default()
        };
        if tx.send(StreamChunk::Patch(patch)).is_err() {
            return;
        }

        let abort = registration.map(CancellationRegistration::handle);
        let slices = split_into_slices(&output.response, self.config.stream_chunk_chars);
        for (index, slice) in slices.into_iter().enumerate() {
            if index > 0 && self.config.stream_pacing_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.config.stream_pacing_ms)).await;
            }
            if abort.is_some_and(CancellationHandle::is_cancelled) {
                let conversation_id = round.conversation_id.clone().unwrap_or_default();
                let _ = tx.send(StreamChunk::error(
                    ChatServiceError::Aborted(conversation_id).to_string(),
                ));
                return;
            }
            if tx
                .send(StreamChunk::append(output_message_id.clone(), slice))
                .is_err()
            {
                tracing::debug!(
                    interaction_id = %round.interaction_id,
                    "stream receiver dropped before answer finished"
                );
                return;
            }
        }
    }

    /// Asks the agent for a new answer to an earlier question.
    pub async fn regenerate(
        &self,
        conversation_id: &str,
        interaction_id: &str,
    ) -> Result<ChatRound, ChatServiceError> {
        let conversation_id = conversation_id.trim();
        let interaction_id = interaction_id.trim();
        if conversation_id.is_empty() || interaction_id.is_empty() {
            return Err(ChatServiceError::InvalidRequest(
                "conversationId and interactionId are required".to_string(),
            ));
        }

        let previous = self
            .storage
            .get_interactions(conversation_id)
            .await
            .map_err(|error| ChatServiceError::Storage(format!("{error:#}")))?
            .into_iter()
            .find(|interaction| interaction.interaction_id == interaction_id);
        let upstream_interaction_id = previous
            .as_ref()
            .and_then(|interaction| interaction.parent_interaction_id.clone())
            .unwrap_or_else(|| interaction_id.to_string());
        let input = MessageInput::text(
            previous
                .map(|interaction| interaction.input)
                .unwrap_or_default(),
        );

        let round = RoundContext::start(
            self.next_interaction_id(),
            input,
            Some(conversation_id.to_string()),
        );
        let registration = self.registry.register(conversation_id);
        let payload = AgentRunPayload {
            verbose: false,
            memory_id: Some(conversation_id.to_string()),
            regenerate_interaction_id: Some(upstream_interaction_id),
            ..AgentRunPayload::default()
        };
        let output = self.execute(payload, Some(&registration)).await?;
        drop(registration);

        let interaction = self.finalize_round(&round, &output).await;
        self.chat_round(interaction).await
    }

    /// Cancels the outstanding call of a conversation; false when none is registered.
    pub fn abort_agent_execution(&self, conversation_id: &str) -> bool {
        let aborted = self.registry.cancel(conversation_id);
        tracing::info!(conversation_id, aborted, "abort requested");
        aborted
    }

    /// Stored history of one conversation.
    pub async fn conversation(
        &self,
        conversation_id: &str,
    ) -> Result<ConversationSnapshot, ChatServiceError> {
        let interactions = self
            .storage
            .get_interactions(conversation_id)
            .await
            .map_err(|error| ChatServiceError::Storage(format!("{error:#}")))?;
        let messages = self
            .storage
            .get_messages_from_interactions(&interactions)
            .await
            .map_err(|error| ChatServiceError::Storage(format!("{error:#}")))?;
        Ok(ConversationSnapshot {
            conversation_id: Some(conversation_id.to_string()),
            interactions,
            messages,
            ..ConversationSnapshot::default()
        })
    }

    async fn execute(
        &self,
        payload: AgentRunPayload,
        registration: Option<&CancellationRegistration>,
    ) -> Result<AgentRunOutput, ChatServiceError> {
        let Some(registration) = registration else {
            return Ok(self.executor.execute(payload).await?);
        };
        let handle = registration.handle();
        tokio::select! {
            biased;
            _ = handle.cancelled() => {
                tracing::info!(
                    conversation_id = registration.conversation_id(),
                    "agent execution aborted"
                );
                Err(ChatServiceError::Aborted(
                    registration.conversation_id().to_string(),
                ))
            }
            result = self.executor.execute(payload) => {
                result.map_err(|error| {
                    tracing::warn!(
                        conversation_id = registration.conversation_id(),
                        %error,
                        "agent execution failed"
                    );
                    ChatServiceError::from(error)
                })
            }
        }
    }

    async fn finalize_round(&self, round: &RoundContext, output: &AgentRunOutput) -> Interaction {
        let conversation_id = if !output.conversation_id.is_empty() {
            output.conversation_id.clone()
        } else {
            round
                .conversation_id
                .clone()
                .unwrap_or_else(|| format!("conversation-{}", round.interaction_id))
        };
        let interaction = Interaction {
            interaction_id: round.interaction_id.clone(),
            conversation_id,
            input: round.input.content.clone(),
            response: output.response.clone(),
            create_time: round.create_time.clone(),
            parent_interaction_id: Some(output.interaction_id.clone())
                .filter(|interaction_id| !interaction_id.is_empty()),
        };
        if let Err(error) = self.storage.save_interaction(&interaction).await {
            tracing::warn!(
                conversation_id = %interaction.conversation_id,
                interaction_id = %interaction.interaction_id,
                error = %format!("{error:#}"),
                "failed to persist interaction"
            );
        }
        interaction
    }

    async fn chat_round(&self, interaction: Interaction) -> Result<ChatRound, ChatServiceError> {
        let interactions = vec![interaction];
        let messages = self
            .storage
            .get_messages_from_interactions(&interactions)
            .await
            .map_err(|error| ChatServiceError::Storage(format!("{error:#}")))?;
        Ok(ChatRound {
            conversation_id: interactions[0].conversation_id.clone(),
            interaction_id: interactions[0].interaction_id.clone(),
            interactions,
            messages,
        })
    }
}

impl RoundContext {
    fn start(interaction_id: String, input: MessageInput, conversation_id: Option<String>) -> Self {
        Self {
            interaction_id,
            conversation_id: conversation_id.filter(|id| !id.trim().is_empty()),
            input,
            create_time: current_iso8601_timestamp(),
        }
    }

    fn output_message_id(&self) -> String {
        format!("{}_1", self.interaction_id)
    }

    fn metadata(&self) -> ConversationSnapshot {
        ConversationSnapshot {
            conversation_id: self.conversation_id.clone(),
            interactions: vec![Interaction {
                interaction_id: self.interaction_id.clone(),
                conversation_id: self.conversation_id.clone().unwrap_or_default(),
                input: self.input.content.clone(),
                response: String::new(),
                create_time: self.create_time.clone(),
                parent_interaction_id: None,
            }],
            messages: vec![
                self.input.to_message(format!("{}_0", self.interaction_id)),
                Message::output(self.output_message_id(), ""),
            ],
            ..ConversationSnapshot::default()
        }
    }
}

fn validate_input(input: &MessageInput) -> Result<(), ChatServiceError> {
    if input.content.trim().is_empty() {
        return Err(ChatServiceError::InvalidRequest(
            "input content cannot be empty".to_string(),
        ));
    }
    Ok(())
}

/// Agent parameters for a new question.
pub fn question_payload(input: &MessageInput, conversation_id: Option<&str>) -> AgentRunPayload {
    let context = input
        .context
        .as_ref()
        .and_then(|context| context.content.as_deref())
        .filter(|content| !content.is_empty());
    let question = match context {
        Some(context) => format!(
            "Based on the context: {context}, answer question: {}",
            input.content
        ),
        None => input.content.clone(),
    };
    AgentRunPayload {
        question: Some(question),
        verbose: false,
        memory_id: conversation_id.map(str::to_string),
        regenerate_interaction_id: None,
        prompt_prefix: input
            .prompt_prefix
            .clone()
            .filter(|prefix| !prefix.is_empty()),
    }
}

/// Splits text into slices of at most `chunk_chars` characters.
pub fn split_into_slices(text: &str, chunk_chars: usize) -> Vec<String> {
    let chunk_chars = chunk_chars.max(1);
    let chars = text.chars().collect::<Vec<_>>();
    chars
        .chunks(chunk_chars)
        .map(|slice| slice.iter().collect())
        .collect()
}
