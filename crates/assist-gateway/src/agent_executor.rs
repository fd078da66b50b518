//! Upstream agent framework calls.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;
use tokio::sync::OnceCell;

pub const ML_COMMONS_BASE_PATH: &str = "/_plugins/_ml";
pub const DEFAULT_ROOT_AGENT_CONFIG_NAME: &str = "os_chat";
pub const DEFAULT_AGENT_REQUEST_TIMEOUT_MS: u64 = 300_000;

const MEMORY_ID_FIELD: &str = "memory_id";
const INTERACTION_ID_FIELDS: [&str; 2] = ["parent_message_id", "parent_interaction_id"];
const RESPONSE_FIELD: &str = "response";

#[derive(Debug, Error)]
/// Enumerates supported `AgentCallError` values.
pub enum AgentCallError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("agent framework returned non-success status {status}: {body}")]
    HttpStatus { status: u16, body: String },
    #[error("invalid agent response: {0}")]
    InvalidResponse(String),
    #[error("root agent is not configured: {0}")]
    MissingRootAgent(String),
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
/// Parameters passed to the root agent.
pub struct AgentRunPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub question: Option<String>,
    pub verbose: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub regenerate_interaction_id: Option<String>,
    #[serde(rename = "prompt.prefix", skip_serializing_if = "Option::is_none")]
    pub prompt_prefix: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
/// Ids and answer text reported by one agent run. Missing fields are empty.
pub struct AgentRunOutput {
    pub conversation_id: String,
    pub interaction_id: String,
    pub response: String,
}

#[async_trait]
/// Trait contract for `AgentExecutor` behavior.
pub trait AgentExecutor: Send + Sync {
    async fn execute(&self, payload: AgentRunPayload) -> Result<AgentRunOutput, AgentCallError>;
}

#[derive(Debug, Clone)]
/// Public struct `AgentExecutorConfig` used across Assist components.
pub struct AgentExecutorConfig {
    pub api_base: String,
    /// Skips the config lookup when set.
    pub root_agent_id: Option<String>,
    pub root_agent_config_name: String,
    pub request_timeout_ms: u64,
}

impl Default for AgentExecutorConfig {
    fn default() -> Self {
        Self {
            api_base: "http://127.0.0.1:9200".to_string(),
            root_agent_id: None,
            root_agent_config_name: DEFAULT_ROOT_AGENT_CONFIG_NAME.to_string(),
            request_timeout_ms: DEFAULT_AGENT_REQUEST_TIMEOUT_MS,
        }
    }
}

/// Executes the root agent over HTTP. Calls are never retried.
#[derive(Debug)]
pub struct HttpAgentExecutor {
    client: reqwest::Client,
    config: AgentExecutorConfig,
    root_agent_id: OnceCell<String>,
}

impl HttpAgentExecutor {
    pub fn new(config: AgentExecutorConfig) -> Result<Self, AgentCallError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_millis(
                config.request_timeout_ms.max(1),
            ))
            .build()?;
        let root_agent_id = match config
            .root_agent_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
        {
            Some(id) => OnceCell::new_with(Some(id.to_string())),
            None => OnceCell::new(),
        };
        Ok(Self {
            client,
            config,
            root_agent_id,
        })
    }

    fn ml_url(&self, path: &str) -> String {
        format!(
            "{}{ML_COMMONS_BASE_PATH}{path}",
            self.config.api_base.trim_end_matches('/')
        )
    }

    /// Returns the root agent id, resolving it through the config API on first use.
    pub async fn root_agent_id(&self) -> Result<&str, AgentCallError> {
        self.root_agent_id
            .get_or_try_init(|| self.fetch_root_agent_id())
            .await
            .map(String::as_str)
    }

    async fn fetch_root_agent_id(&self) -> Result<String, AgentCallError> {
        let config_name = self.config.root_agent_config_name.as_str();
        let response = self
            .client
            .get(self.ml_url(&format!("/config/{config_name}")))
            .send()
            .await?;
        let status = response.status();
        let raw = response.text().await?;
        if !status.is_success() {
            return Err(AgentCallError::HttpStatus {
                status: status.as_u16(),
                body: raw,
            });
        }
        let body = serde_json::from_str::<Value>(&raw).map_err(|error| {
            AgentCallError::InvalidResponse(format!("failed to parse agent config: {error}"))
        })?;
        let agent_id = ["configuration", "ml_configuration"]
            .iter()
            .find_map(|section| body.get(section)?.get("agent_id")?.as_str())
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| AgentCallError::MissingRootAgent(config_name.to_string()))?;
        tracing::debug!(config_name, agent_id, "resolved root agent id");
        Ok(agent_id.to_string())
    }
}

#[async_trait]
impl AgentExecutor for HttpAgentExecutor {
    async fn execute(&self, payload: AgentRunPayload) -> Result<AgentRunOutput, AgentCallError> {
        let agent_id = self.root_agent_id().await?;
        let started = std::time::Instant::now();
        let response = self
            .client
            .post(self.ml_url(&format!("/agents/{agent_id}/_execute")))
            .json(&json!({ "parameters": payload }))
            .send()
            .await?;
        let status = response.status();
        let raw = response.text().await?;
        if !status.is_success() {
            tracing::warn!(
                agent_id,
                status = status.as_u16(),
                "agent execution returned non-success status"
            );
            return Err(AgentCallError::HttpStatus {
                status: status.as_u16(),
                body: raw,
            });
        }
        let output = parse_agent_run_output(&raw)?;
        tracing::debug!(
            agent_id,
            elapsed_ms = started.elapsed().as_millis() as u64,
            conversation_id = %output.conversation_id,
            interaction_id = %output.interaction_id,
            "agent execution completed"
        );
        Ok(output)
    }
}

/// Extracts ids and answer text from an `_execute` response body.
pub fn parse_agent_run_output(raw: &str) -> Result<AgentRunOutput, AgentCallError> {
    let body = serde_json::from_str::<Value>(raw).map_err(|error| {
        AgentCallError::InvalidResponse(format!("failed to parse agent response: {error}"))
    })?;
    let Some(items) = body
        .pointer("/inference_results/0/output")
        .and_then(Value::as_array)
    else {
        return Ok(AgentRunOutput::default());
    };

    let find_result = |names: &[&str]| -> String {
        items
            .iter()
            .find(|item| {
                item.get("name")
                    .and_then(Value::as_str)
                    .is_some_and(|name| names.contains(&name))
            })
            .and_then(output_item_text)
            .unwrap_or_default()
    };

    Ok(AgentRunOutput {
        conversation_id: find_result(&[MEMORY_ID_FIELD]),
        interaction_id: find_result(&INTERACTION_ID_FIELDS),
        response: find_result(&[RESPONSE_FIELD]),
    })
}

fn output_item_text(item: &Value) -> Option<String> {
    if let Some(result) = item.get("result").and_then(Value::as_str) {
        return Some(result.to_string());
    }
    item.pointer("/dataAsMap/response")
        .and_then(Value::as_str)
        .map(str::to_string)
}
