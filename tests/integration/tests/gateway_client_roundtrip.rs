use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use assist_client::{
    AssistantHttpClient, AssistantHttpClientConfig, ConversationSession, DeliveryMode,
    ResponsePhase, StreamTermination,
};
use assist_core::CancellationHandle;
use assist_gateway::{
    build_gateway_router, AgentExecutorConfig, CancellationRegistry, ChatService,
    ChatStreamConfig, FileConversationStorage, GatewayServerState, HttpAgentExecutor,
};
use assist_protocol::{FrameConvention, MessageInput, SendMessageRequest};
use httpmock::prelude::*;
use serde_json::json;
use tempfile::TempDir;
use tokio::net::TcpListener;

struct LiveGateway {
    addr: SocketAddr,
    _state_dir: TempDir,
    handle: tokio::task::JoinHandle<()>,
}

impl LiveGateway {
    fn client(&self, convention: FrameConvention) -> AssistantHttpClient {
        AssistantHttpClient::new(AssistantHttpClientConfig {
            base_url: format!("http://{}", self.addr),
            request_timeout_ms: 10_000,
            convention,
        })
        .expect("client")
    }
}

impl Drop for LiveGateway {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn spawn_gateway(agent: &MockServer, framing: FrameConvention) -> Result<LiveGateway> {
    let state_dir = tempfile::tempdir().context("create state dir")?;
    let executor = HttpAgentExecutor::new(AgentExecutorConfig {
        api_base: agent.base_url(),
        root_agent_id: None,
        root_agent_config_name: "os_chat".to_string(),
        request_timeout_ms: 10_000,
    })?;
    let service = ChatService::new(
        Arc::new(executor),
        Arc::new(FileConversationStorage::new(state_dir.path())),
        CancellationRegistry::new(),
        ChatStreamConfig {
            stream_chunk_chars: 5,
            stream_pacing_ms: 0,
        },
    );
    let state = Arc::new(GatewayServerState::new(service, framing, 64 * 1024));
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .context("bind ephemeral listener")?;
    let addr = listener.local_addr().context("resolve listener addr")?;
    let app = build_gateway_router(state);
    let handle = tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    tokio::time::sleep(Duration::from_millis(20)).await;
    Ok(LiveGateway {
        addr,
        _state_dir: state_dir,
        handle,
    })
}

fn mock_root_agent_config(agent: &MockServer) {
    agent.mock(|when, then| {
        when.method(GET).path("/_plugins/_ml/config/os_chat");
        then.status(200)
            .json_body(json!({"configuration": {"agent_id": "root-1"}}));
    });
}

fn agent_answer(conversation_id: &str, interaction_id: &str, response: &str) -> serde_json::Value {
    json!({
        "inference_results": [{
            "output": [
                {"name": "memory_id", "result": conversation_id},
                {"name": "parent_interaction_id", "result": interaction_id},
                {"name": "response", "result": response}
            ]
        }]
    })
}

fn question(content: &str, conversation_id: Option<&str>, stream: bool) -> SendMessageRequest {
    SendMessageRequest {
        input: MessageInput::text(content),
        conversation_id: conversation_id.map(str::to_string),
        stream,
    }
}

#[tokio::test]
async fn integration_streamed_answer_reaches_client_state_in_order() {
    let agent = MockServer::start();
    mock_root_agent_config(&agent);
    let execute = agent.mock(|when, then| {
        when.method(POST)
            .path("/_plugins/_ml/agents/root-1/_execute")
            .json_body_includes(json!({"parameters": {"question": "hello?"}}).to_string());
        then.status(200)
            .json_body(agent_answer("conv-e2e", "int-9", "hello from the agent"));
    });
    let gateway = spawn_gateway(&agent, FrameConvention::Ndjson)
        .await
        .expect("spawn gateway");
    let client = gateway.client(FrameConvention::Ndjson);

    let subscription = client
        .send_message(&question("hello?", None, true), CancellationHandle::new())
        .await
        .expect("send");
    assert_eq!(subscription.delivery_mode(), DeliveryMode::Streaming);

    let mut session = ConversationSession::new();
    let mut observed = Vec::new();
    let termination = session
        .drive_with(subscription, |state| {
            if let Some(message) = state.messages.get(1) {
                observed.push(message.content.clone());
            }
        })
        .await;

    assert_eq!(termination, StreamTermination::Completed);
    let state = session.state();
    assert_eq!(state.phase, ResponsePhase::Idle);
    assert_eq!(state.conversation_id.as_deref(), Some("conv-e2e"));
    assert_eq!(state.messages.len(), 2);
    assert_eq!(state.messages[0].content, "hello?");
    assert_eq!(state.messages[1].content, "hello from the agent");
    assert_eq!(state.messages[1].trace_id.as_deref(), Some("int-9"));
    assert!(observed.contains(&"hello".to_string()));
    assert!(observed
        .windows(2)
        .all(|pair| pair[1].starts_with(pair[0].as_str())));
    execute.assert();

    let history = client.conversation("conv-e2e").await.expect("history");
    assert_eq!(history.interactions.len(), 1);
    assert_eq!(history.interactions[0].response, "hello from the agent");
    assert_eq!(history.messages.len(), 2);
}

#[tokio::test]
async fn integration_legacy_framing_round_trips_through_live_gateway() {
    let agent = MockServer::start();
    mock_root_agent_config(&agent);
    agent.mock(|when, then| {
        when.method(POST).path("/_plugins/_ml/agents/root-1/_execute");
        then.status(200)
            .json_body(agent_answer("conv-legacy", "int-1", "line one\nline two"));
    });
    let gateway = spawn_gateway(&agent, FrameConvention::LegacySse)
        .await
        .expect("spawn gateway");
    let client = gateway.client(FrameConvention::Ndjson);

    let subscription = client
        .send_message(&question("q", None, true), CancellationHandle::new())
        .await
        .expect("send");
    let mut session = ConversationSession::new();
    let termination = session.drive(subscription).await;

    assert_eq!(termination, StreamTermination::Completed);
    assert_eq!(session.state().messages[1].content, "line one\nline two");
    assert!(session.state().error.is_none());
}

#[tokio::test]
async fn functional_text_mode_delivers_single_metadata_event() {
    let agent = MockServer::start();
    mock_root_agent_config(&agent);
    agent.mock(|when, then| {
        when.method(POST).path("/_plugins/_ml/agents/root-1/_execute");
        then.status(200)
            .json_body(agent_answer("conv-text", "int-2", "plain answer"));
    });
    let gateway = spawn_gateway(&agent, FrameConvention::Ndjson)
        .await
        .expect("spawn gateway");
    let client = gateway.client(FrameConvention::Ndjson);

    let subscription = client
        .send_message(&question("q", Some("conv-text"), false), CancellationHandle::new())
        .await
        .expect("send");
    assert_eq!(subscription.delivery_mode(), DeliveryMode::Text);

    let mut session = ConversationSession::new();
    let termination = session.drive(subscription).await;
    let state = session.into_state();
    assert_eq!(termination, StreamTermination::Completed);
    assert_eq!(state.response_type, Some(DeliveryMode::Text));
    assert_eq!(state.conversation_id.as_deref(), Some("conv-text"));
    assert_eq!(state.messages.len(), 2);
    assert_eq!(state.messages[1].content, "plain answer");
    assert!(!state.llm_responding);
}

#[tokio::test]
async fn integration_abort_stops_outstanding_agent_call() {
    let agent = MockServer::start();
    mock_root_agent_config(&agent);
    agent.mock(|when, then| {
        when.method(POST).path("/_plugins/_ml/agents/root-1/_execute");
        then.status(200)
            .delay(Duration::from_secs(5))
            .json_body(agent_answer("conv-slow", "int-3", "too late"));
    });
    let gateway = spawn_gateway(&agent, FrameConvention::Ndjson)
        .await
        .expect("spawn gateway");
    let client = gateway.client(FrameConvention::Ndjson);

    let subscription = client
        .send_message(
            &question("slow?", Some("conv-slow"), true),
            CancellationHandle::new(),
        )
        .await
        .expect("send");
    let driver = tokio::spawn(async move {
        let mut session = ConversationSession::new();
        let termination = session.drive(subscription).await;
        (termination, session.into_state())
    });

    let mut aborted = false;
    for _ in 0..100 {
        if client.abort("conv-slow").await.expect("abort request") {
            aborted = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(aborted);

    let (termination, state) = tokio::time::timeout(Duration::from_secs(2), driver)
        .await
        .expect("stream ends after abort")
        .expect("driver task");
    assert_eq!(termination, StreamTermination::Completed);
    assert_eq!(state.phase, ResponsePhase::Errored);
    assert!(state.error.unwrap_or_default().contains("aborted"));
    assert_eq!(state.messages[1].content, "");
    assert!(!client.abort("conv-slow").await.expect("second abort"));
}

#[tokio::test]
async fn regression_client_side_abort_ends_subscription_without_server_help() {
    let agent = MockServer::start();
    mock_root_agent_config(&agent);
    agent.mock(|when, then| {
        when.method(POST).path("/_plugins/_ml/agents/root-1/_execute");
        then.status(200)
            .delay(Duration::from_secs(5))
            .json_body(agent_answer("conv-local", "int-4", "unused"));
    });
    let gateway = spawn_gateway(&agent, FrameConvention::Ndjson)
        .await
        .expect("spawn gateway");
    let client = gateway.client(FrameConvention::Ndjson);

    let abort = CancellationHandle::new();
    let subscription = client
        .send_message(&question("q", Some("conv-local"), true), abort.clone())
        .await
        .expect("send");
    let driver = tokio::spawn(async move {
        let mut session = ConversationSession::new();
        session.drive(subscription).await
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    abort.cancel();

    let termination = tokio::time::timeout(Duration::from_secs(2), driver)
        .await
        .expect("subscription ends after abort")
        .expect("driver task");
    assert_eq!(termination, StreamTermination::Aborted);
}

#[tokio::test]
async fn regression_history_lookup_survives_reserved_characters_in_id() {
    let agent = MockServer::start();
    mock_root_agent_config(&agent);
    agent.mock(|when, then| {
        when.method(POST).path("/_plugins/_ml/agents/root-1/_execute");
        then.status(200)
            .json_body(agent_answer("team/a b?x#1", "int-5", "kept apart"));
    });
    let gateway = spawn_gateway(&agent, FrameConvention::Ndjson)
        .await
        .expect("spawn gateway");
    let client = gateway.client(FrameConvention::Ndjson);

    let subscription = client
        .send_message(
            &question("q", Some("team/a b?x#1"), false),
            CancellationHandle::new(),
        )
        .await
        .expect("send");
    let mut session = ConversationSession::new();
    assert_eq!(session.drive(subscription).await, StreamTermination::Completed);

    let history = client
        .conversation("team/a b?x#1")
        .await
        .expect("history");
    assert_eq!(history.conversation_id.as_deref(), Some("team/a b?x#1"));
    assert_eq!(history.interactions.len(), 1);
    assert_eq!(history.interactions[0].response, "kept apart");

    let sibling = client.conversation("team").await.expect("sibling history");
    assert!(sibling.interactions.is_empty());
}
