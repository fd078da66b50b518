use std::io::Write;

use anyhow::{bail, Context, Result};
use assist_client::{
    AssistantHttpClient, AssistantHttpClientConfig, ChatAction, ConversationSession,
    ConversationState, StreamTermination,
};
use assist_core::CancellationHandle;
use assist_gateway::{
    run_gateway_server, AgentExecutorConfig, ChatStreamConfig, GatewayServerConfig,
};
use assist_protocol::{
    ConversationSnapshot, InputContext, MessageInput, MessageType, SendMessageRequest,
};

use crate::cli_args::{AbortArgs, AskArgs, Cli, Command, HistoryArgs, ServeArgs};

pub(crate) async fn run_cli(cli: Cli) -> Result<()> {
    match &cli.command {
        Command::Serve(args) => run_serve(args, &cli).await,
        Command::Ask(args) => run_ask(args, &cli).await,
        Command::Abort(args) => run_abort(args, &cli).await,
        Command::History(args) => run_history(args, &cli).await,
    }
}

fn build_client(cli: &Cli) -> Result<AssistantHttpClient> {
    AssistantHttpClient::new(AssistantHttpClientConfig {
        base_url: cli.gateway_url.clone(),
        request_timeout_ms: cli.request_timeout_ms,
        convention: cli.framing,
    })
    .context("failed to build gateway client")
}

fn gateway_config_from_args(args: &ServeArgs, cli: &Cli) -> GatewayServerConfig {
    GatewayServerConfig {
        bind: args.bind.clone(),
        state_dir: args.state_dir.clone(),
        framing: cli.framing,
        max_body_bytes: args.max_body_bytes,
        agent: AgentExecutorConfig {
            api_base: args.agent_api_base.clone(),
            root_agent_id: args.root_agent_id.clone(),
            root_agent_config_name: args.root_agent_config.clone(),
            request_timeout_ms: args.agent_timeout_ms,
        },
        stream: ChatStreamConfig {
            stream_chunk_chars: args.stream_chunk_chars,
            stream_pacing_ms: args.stream_pacing_ms,
        },
    }
}

async fn run_serve(args: &ServeArgs, cli: &Cli) -> Result<()> {
    let config = gateway_config_from_args(args, cli);
    println!(
        "assistant gateway starting: bind={} framing={} state_dir={}",
        config.bind,
        config.framing,
        config.state_dir.display()
    );
    run_gateway_server(config).await
}

async fn run_ask(args: &AskArgs, cli: &Cli) -> Result<()> {
    let client = build_client(cli)?;
    let input = MessageInput {
        context: args.context.as_ref().map(|content| InputContext {
            app_id: None,
            content: Some(content.clone()),
        }),
        prompt_prefix: args.prompt_prefix.clone(),
        ..MessageInput::text(args.question.clone())
    };
    let request = SendMessageRequest {
        input: input.clone(),
        conversation_id: args.conversation_id.clone(),
        stream: !args.no_stream,
    };

    let abort = CancellationHandle::new();
    let ctrl_c_abort = abort.clone();
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c_abort.cancel();
        }
    });

    let mut session = ConversationSession::new();
    session.dispatch(ChatAction::Send(input));
    let subscription = client
        .send_message(&request, abort.clone())
        .await
        .context("failed to send question")?;

    let mut printer = AnswerPrinter::default();
    let print_live = !args.json;
    let termination = session
        .drive_with(subscription, |state| {
            if print_live {
                printer.print_new_content(state);
            }
        })
        .await;
    ctrl_c.abort();
    if print_live && printer.printed_any {
        println!();
    }

    let state = session.into_state();
    if termination == StreamTermination::Aborted {
        if let Some(conversation_id) = state.conversation_id.as_deref() {
            forward_abort(&client, conversation_id).await;
        }
        eprintln!("aborted");
        return Ok(());
    }
    if args.json {
        println!("{}", render_state_json(&state)?);
    } else if let Some(conversation_id) = state.conversation_id.as_deref() {
        eprintln!("conversation: {conversation_id}");
    }
    if let Some(error) = state.error {
        bail!("assistant response failed: {error}");
    }
    Ok(())
}

/// Asks the gateway to cancel the call; `None` when the request itself failed.
async fn forward_abort(client: &AssistantHttpClient, conversation_id: &str) -> Option<bool> {
    match client.abort(conversation_id).await {
        Ok(aborted) => {
            tracing::info!(conversation_id, aborted, "forwarded abort to gateway");
            Some(aborted)
        }
        Err(error) => {
            tracing::warn!(
                conversation_id,
                error = %error,
                "failed to forward abort to gateway"
            );
            None
        }
    }
}

async fn run_abort(args: &AbortArgs, cli: &Cli) -> Result<()> {
    let client = build_client(cli)?;
    let aborted = client
        .abort(&args.conversation_id)
        .await
        .context("failed to abort conversation")?;
    println!(
        "abort: conversation_id={} aborted={aborted}",
        args.conversation_id
    );
    Ok(())
}

async fn run_history(args: &HistoryArgs, cli: &Cli) -> Result<()> {
    let client = build_client(cli)?;
    let snapshot = client
        .conversation(&args.conversation_id)
        .await
        .context("failed to load conversation")?;
    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&snapshot).context("failed to render history")?
        );
        return Ok(());
    }
    print!("{}", render_history_text(&snapshot));
    Ok(())
}

/// Prints the growth of the latest answer message between state updates.
#[derive(Debug, Default)]
struct AnswerPrinter {
    message_id: Option<String>,
    printed_chars: usize,
    printed_any: bool,
}

impl AnswerPrinter {
    fn next_delta(&mut self, state: &ConversationState) -> Option<String> {
        let message = state
            .messages
            .iter()
            .rev()
            .find(|message| message.message_type == MessageType::Output)?;
        if self.message_id.as_deref() != Some(message.message_id.as_str()) {
            self.message_id = Some(message.message_id.clone());
            self.printed_chars = 0;
        }
        let delta = message
            .content
            .chars()
            .skip(self.printed_chars)
            .collect::<String>();
        if delta.is_empty() {
            return None;
        }
        self.printed_chars += delta.chars().count();
        Some(delta)
    }

    fn print_new_content(&mut self, state: &ConversationState) {
        if let Some(delta) = self.next_delta(state) {
            print!("{delta}");
            let _ = std::io::stdout().flush();
            self.printed_any = true;
        }
    }
}

fn render_state_json(state: &ConversationState) -> Result<String> {
    let snapshot = ConversationSnapshot {
        conversation_id: state.conversation_id.clone(),
        interactions: state.interactions.clone(),
        messages: state.messages.clone(),
        ..ConversationSnapshot::default()
    };
    serde_json::to_string_pretty(&snapshot).context("failed to render conversation state")
}

fn render_history_text(snapshot: &ConversationSnapshot) -> String {
    let mut lines = String::new();
    for message in &snapshot.messages {
        let role = match message.message_type {
            MessageType::Input => "you",
            MessageType::Output => "assistant",
        };
        lines.push_str(&format!("{role}: {}\n", message.content));
    }
    lines
}
