use assist_core::CancellationHandle;
use assist_protocol::api::{
    conversation_path, ABORT_ENDPOINT, REGENERATE_ENDPOINT, SEND_MESSAGE_ENDPOINT,
};
use assist_protocol::{
    AbortRequest, AbortResponse, ConversationSnapshot, FrameConvention, RegenerateRequest,
    SendMessageRequest,
};

use crate::{AssistClientError, ChunkSubscription, ResponseIntake};

#[derive(Debug, Clone)]
/// Connection settings for one assistant gateway.
pub struct AssistantHttpClientConfig {
    pub base_url: String,
    pub request_timeout_ms: u64,
    /// Used for streamed bodies that do not advertise their framing.
    pub convention: FrameConvention,
}

impl Default for AssistantHttpClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8787".to_string(),
            request_timeout_ms: 300_000,
            convention: FrameConvention::Ndjson,
        }
    }
}

#[derive(Debug, Clone)]
/// Typed client for the gateway routes.
pub struct AssistantHttpClient {
    client: reqwest::Client,
    base_url: String,
    intake: ResponseIntake,
}

impl AssistantHttpClient {
    pub fn new(config: AssistantHttpClientConfig) -> Result<Self, AssistClientError> {
        let base_url = config.base_url.trim().trim_end_matches('/').to_string();
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(AssistClientError::InvalidBaseUrl(config.base_url));
        }
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_millis(
                config.request_timeout_ms.max(1),
            ))
            .build()?;
        Ok(Self {
            client,
            base_url,
            intake: ResponseIntake::new(config.convention),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// Sends a question and hands the response to the intake.
    ///
    /// The returned subscription yields the streamed events, or a single
    /// `metadata` event when the gateway answered with a plain JSON body.
    pub async fn send_message(
        &self,
        request: &SendMessageRequest,
        abort: CancellationHandle,
    ) -> Result<ChunkSubscription, AssistClientError> {
        let response = self
            .client
            .post(self.url(SEND_MESSAGE_ENDPOINT))
            .json(request)
            .send()
            .await?;
        let response = ensure_success(response).await?;
        Ok(self.intake.consume(response, abort))
    }

    pub async fn regenerate(
        &self,
        request: &RegenerateRequest,
        abort: CancellationHandle,
    ) -> Result<ChunkSubscription, AssistClientError> {
        let response = self
            .client
            .put(self.url(REGENERATE_ENDPOINT))
            .json(request)
            .send()
            .await?;
        let response = ensure_success(response).await?;
        Ok(self.intake.consume(response, abort))
    }

    /// Asks the gateway to cancel the outstanding call of a conversation.
    pub async fn abort(&self, conversation_id: &str) -> Result<bool, AssistClientError> {
        let response = self
            .client
            .post(self.url(ABORT_ENDPOINT))
            .json(&AbortRequest {
                conversation_id: conversation_id.to_string(),
            })
            .send()
            .await?;
        let response = ensure_success(response).await?;
        let raw = response.text().await?;
        let parsed = serde_json::from_str::<AbortResponse>(&raw)?;
        Ok(parsed.aborted)
    }

    pub async fn conversation(
        &self,
        conversation_id: &str,
    ) -> Result<ConversationSnapshot, AssistClientError> {
        let response = self
            .client
            .get(self.url(&conversation_path(conversation_id)))
            .send()
            .await?;
        let response = ensure_success(response).await?;
        let raw = response.text().await?;
        Ok(serde_json::from_str(&raw)?)
    }
}

async fn ensure_success(
    response: reqwest::Response,
) -> Result<reqwest::Response, AssistClientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    tracing::warn!(status = status.as_u16(), "gateway request failed");
    Err(AssistClientError::HttpStatus {
        status: status.as_u16(),
        body,
    })
}
