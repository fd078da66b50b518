use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use assist_protocol::api::{
    ABORT_ENDPOINT, CONVERSATION_ENDPOINT, REGENERATE_ENDPOINT, SEND_MESSAGE_ENDPOINT,
};
use assist_protocol::{
    encode_frame, AbortRequest, AbortResponse, FrameConvention, RegenerateRequest,
    SendMessageRequest, StreamChunk, STREAM_FRAMING_HEADER, STREAM_HEADER,
};
use axum::body::{Body, Bytes};
use axum::extract::{Path as AxumPath, State};
use axum::http::header::{CACHE_CONTROL, CONTENT_TYPE};
use axum::http::{HeaderMap, HeaderName, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use futures_util::StreamExt;
use serde::de::DeserializeOwned;
use tokio::net::TcpListener;
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::agent_executor::{AgentExecutorConfig, HttpAgentExecutor};
use crate::cancellation_registry::CancellationRegistry;
use crate::chat_service::{ChatService, ChatStreamConfig};
use crate::storage::FileConversationStorage;

mod types;

use types::AssistApiError;

pub const DEFAULT_GATEWAY_BIND: &str = "127.0.0.1:8787";
pub const DEFAULT_MAX_BODY_BYTES: usize = 256 * 1024;

#[derive(Debug, Clone)]
/// Public struct `GatewayServerConfig` used across Assist components.
pub struct GatewayServerConfig {
    pub bind: String,
    pub state_dir: PathBuf,
    /// Frame convention used unless a request asks for another one.
    pub framing: FrameConvention,
    pub max_body_bytes: usize,
    pub agent: AgentExecutorConfig,
    pub stream: ChatStreamConfig,
}

impl Default for GatewayServerConfig {
    fn default() -> Self {
        Self {
            bind: DEFAULT_GATEWAY_BIND.to_string(),
            state_dir: PathBuf::from(".assist"),
            framing: FrameConvention::Ndjson,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            agent: AgentExecutorConfig::default(),
            stream: ChatStreamConfig::default(),
        }
    }
}

/// Shared state of the assistant routes.
#[derive(Clone)]
pub struct GatewayServerState {
    service: ChatService,
    framing: FrameConvention,
    max_body_bytes: usize,
}

impl GatewayServerState {
    pub fn new(service: ChatService, framing: FrameConvention, max_body_bytes: usize) -> Self {
        Self {
            service,
            framing,
            max_body_bytes: max_body_bytes.max(1),
        }
    }

    pub fn service(&self) -> &ChatService {
        &self.service
    }

    fn validate_body_size(&self, body: &Bytes) -> Result<(), AssistApiError> {
        if body.len() > self.max_body_bytes {
            return Err(AssistApiError::payload_too_large(format!(
                "request body exceeds max size of {} bytes",
                self.max_body_bytes
            )));
        }
        Ok(())
    }

    /// Convention requested through the framing header, else the configured one.
    fn framing_for(&self, headers: &HeaderMap) -> FrameConvention {
        headers
            .get(STREAM_FRAMING_HEADER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.parse::<FrameConvention>().ok())
            .unwrap_or(self.framing)
    }
}

pub async fn run_gateway_server(config: GatewayServerConfig) -> Result<()> {
    std::fs::create_dir_all(&config.state_dir)
        .with_context(|| format!("failed to create {}", config.state_dir.display()))?;

    let bind_addr = config
        .bind
        .parse::<SocketAddr>()
        .with_context(|| format!("invalid gateway bind address '{}'", config.bind))?;

    let executor = HttpAgentExecutor::new(config.agent.clone())
        .context("failed to build agent executor client")?;
    let storage = FileConversationStorage::new(&config.state_dir);
    let service = ChatService::new(
        Arc::new(executor),
        Arc::new(storage),
        CancellationRegistry::new(),
        config.stream,
    );

    let listener = TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("failed to bind assistant gateway on {bind_addr}"))?;
    let local_addr = listener
        .local_addr()
        .context("failed to resolve bound gateway address")?;

    tracing::info!(
        addr = %local_addr,
        framing = config.framing.as_str(),
        state_dir = %config.state_dir.display(),
        agent_api_base = %config.agent.api_base,
        "assistant gateway listening"
    );

    let state = Arc::new(GatewayServerState::new(
        service,
        config.framing,
        config.max_body_bytes,
    ));
    let app = build_gateway_router(state);
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
        .context("assistant gateway exited unexpectedly")?;

    tracing::info!("assistant gateway stopped");
    Ok(())
}

pub fn build_gateway_router(state: Arc<GatewayServerState>) -> Router {
    Router::new()
        .route(SEND_MESSAGE_ENDPOINT, post(handle_send_message))
        .route(REGENERATE_ENDPOINT, put(handle_regenerate))
        .route(ABORT_ENDPOINT, post(handle_abort))
        .route(CONVERSATION_ENDPOINT, get(handle_conversation))
        .with_state(state)
}

async fn handle_send_message(
    State(state): State<Arc<GatewayServerState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if let Err(error) = state.validate_body_size(&body) {
        return error.into_response();
    }
    let request = match parse_gateway_json_body::<SendMessageRequest>(&body) {
        Ok(request) => request,
        Err(error) => return error.into_response(),
    };

    if !request.stream {
        return match state.service.request_llm(request).await {
            Ok(round) => (StatusCode::OK, Json(round)).into_response(),
            Err(error) => AssistApiError::from(error).into_response(),
        };
    }

    let framing = state.framing_for(&headers);
    match state.service.stream_llm(request) {
        Ok(rx) => stream_frames(rx, framing),
        Err(error) => AssistApiError::from(error).into_response(),
    }
}

fn stream_frames(
    rx: tokio::sync::mpsc::UnboundedReceiver<StreamChunk>,
    framing: FrameConvention,
) -> Response {
    let frames = UnboundedReceiverStream::new(rx)
        .map(move |chunk| Ok::<Vec<u8>, Infallible>(encode_chunk_or_error(&chunk, framing)));
    (
        StatusCode::OK,
        [
            (CONTENT_TYPE, framing.content_type()),
            (CACHE_CONTROL, "no-cache"),
            (HeaderName::from_static(STREAM_HEADER), "true"),
            (HeaderName::from_static(STREAM_FRAMING_HEADER), framing.as_str()),
        ],
        Body::from_stream(frames),
    )
        .into_response()
}

fn encode_chunk_or_error(chunk: &StreamChunk, framing: FrameConvention) -> Vec<u8> {
    match encode_frame(chunk, framing) {
        Ok(frame) => frame,
        Err(error) => {
            tracing::warn!(kind = chunk.kind(), %error, "failed to encode stream frame");
            encode_frame(
                &StreamChunk::error(format!("failed to encode stream frame: {error}")),
                framing,
            )
            .unwrap_or_default()
        }
    }
}

async fn handle_regenerate(
    State(state): State<Arc<GatewayServerState>>,
    body: Bytes,
) -> Response {
    if let Err(error) = state.validate_body_size(&body) {
        return error.into_response();
    }
    let request = match parse_gateway_json_body::<RegenerateRequest>(&body) {
        Ok(request) => request,
        Err(error) => return error.into_response(),
    };
    match state
        .service
        .regenerate(&request.conversation_id, &request.interaction_id)
        .await
    {
        Ok(round) => (StatusCode::OK, Json(round)).into_response(),
        Err(error) => AssistApiError::from(error).into_response(),
    }
}

async fn handle_abort(State(state): State<Arc<GatewayServerState>>, body: Bytes) -> Response {
    if let Err(error) = state.validate_body_size(&body) {
        return error.into_response();
    }
    let request = match parse_gateway_json_body::<AbortRequest>(&body) {
        Ok(request) => request,
        Err(error) => return error.into_response(),
    };
    let aborted = state
        .service
        .abort_agent_execution(request.conversation_id.trim());
    (StatusCode::OK, Json(AbortResponse { aborted })).into_response()
}

async fn handle_conversation(
    State(state): State<Arc<GatewayServerState>>,
    AxumPath(conversation_id): AxumPath<String>,
) -> Response {
    match state.service.conversation(&conversation_id).await {
        Ok(snapshot) => (StatusCode::OK, Json(snapshot)).into_response(),
        Err(error) => AssistApiError::from(error).into_response(),
    }
}

fn parse_gateway_json_body<T: DeserializeOwned>(body: &Bytes) -> Result<T, AssistApiError> {
    serde_json::from_slice::<T>(body).map_err(|error| {
        AssistApiError::bad_request(
            "malformed_json",
            format!("failed to parse request body: {error}"),
        )
    })
}
