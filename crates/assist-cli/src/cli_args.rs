use std::path::PathBuf;

use assist_protocol::FrameConvention;
use clap::{ArgAction, Args, Parser, Subcommand};

fn parse_positive_usize(value: &str) -> Result<usize, String> {
    let parsed = value
        .parse::<usize>()
        .map_err(|error| format!("failed to parse integer: {error}"))?;
    if parsed == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(parsed)
}

fn parse_positive_u64(value: &str) -> Result<u64, String> {
    let parsed = value
        .parse::<u64>()
        .map_err(|error| format!("failed to parse integer: {error}"))?;
    if parsed == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(parsed)
}

fn parse_frame_convention(value: &str) -> Result<FrameConvention, String> {
    value
        .parse::<FrameConvention>()
        .map_err(|error| error.to_string())
}

#[derive(Debug, Parser)]
#[command(
    name = "assist",
    about = "Streaming chat assistant gateway and terminal client",
    version
)]
/// Public struct `Cli` used across Assist components.
pub(crate) struct Cli {
    #[arg(
        long = "gateway-url",
        env = "ASSIST_GATEWAY_URL",
        default_value = "http://127.0.0.1:8787",
        global = true,
        help = "Base URL of the assistant gateway used by client commands"
    )]
    pub(crate) gateway_url: String,

    #[arg(
        long = "request-timeout-ms",
        env = "ASSIST_REQUEST_TIMEOUT_MS",
        default_value_t = 300_000,
        value_parser = parse_positive_u64,
        global = true,
        help = "Client-side timeout for one gateway request, including a streamed body"
    )]
    pub(crate) request_timeout_ms: u64,

    #[arg(
        long = "framing",
        env = "ASSIST_STREAM_FRAMING",
        default_value = "ndjson",
        value_parser = parse_frame_convention,
        global = true,
        help = "Stream frame convention: ndjson or legacy-sse"
    )]
    pub(crate) framing: FrameConvention,

    #[command(subcommand)]
    pub(crate) command: Command,
}

#[derive(Debug, Subcommand)]
pub(crate) enum Command {
    /// Run the assistant gateway in front of the agent framework
    Serve(ServeArgs),
    /// Ask a question and print the answer as it streams in
    Ask(AskArgs),
    /// Cancel the outstanding agent call of a conversation
    Abort(AbortArgs),
    /// Print the stored history of a conversation
    History(HistoryArgs),
}

#[derive(Debug, Args)]
pub(crate) struct ServeArgs {
    #[arg(
        long,
        env = "ASSIST_GATEWAY_BIND",
        default_value = "127.0.0.1:8787",
        help = "Socket address for the gateway (host:port)"
    )]
    pub(crate) bind: String,

    #[arg(
        long = "state-dir",
        env = "ASSIST_STATE_DIR",
        default_value = ".assist",
        help = "Directory holding persisted conversations"
    )]
    pub(crate) state_dir: PathBuf,

    #[arg(
        long = "agent-api-base",
        env = "ASSIST_AGENT_API_BASE",
        default_value = "http://127.0.0.1:9200",
        help = "Base URL of the agent framework cluster"
    )]
    pub(crate) agent_api_base: String,

    #[arg(
        long = "root-agent-id",
        env = "ASSIST_ROOT_AGENT_ID",
        help = "Root agent id; when omitted it is resolved from --root-agent-config"
    )]
    pub(crate) root_agent_id: Option<String>,

    #[arg(
        long = "root-agent-config",
        env = "ASSIST_ROOT_AGENT_CONFIG",
        default_value = "os_chat",
        help = "Agent framework config name holding the root agent id"
    )]
    pub(crate) root_agent_config: String,

    #[arg(
        long = "agent-timeout-ms",
        env = "ASSIST_AGENT_TIMEOUT_MS",
        default_value_t = 300_000,
        value_parser = parse_positive_u64,
        help = "Timeout for one agent execution call"
    )]
    pub(crate) agent_timeout_ms: u64,

    #[arg(
        long = "stream-chunk-chars",
        env = "ASSIST_STREAM_CHUNK_CHARS",
        default_value_t = 16,
        value_parser = parse_positive_usize,
        help = "Characters per appendMessageContent event"
    )]
    pub(crate) stream_chunk_chars: usize,

    #[arg(
        long = "stream-pacing-ms",
        env = "ASSIST_STREAM_PACING_MS",
        default_value_t = 0,
        help = "Delay between appendMessageContent events"
    )]
    pub(crate) stream_pacing_ms: u64,

    #[arg(
        long = "max-body-bytes",
        env = "ASSIST_MAX_BODY_BYTES",
        default_value_t = 256 * 1024,
        value_parser = parse_positive_usize,
        help = "Largest accepted request body"
    )]
    pub(crate) max_body_bytes: usize,
}

#[derive(Debug, Args)]
pub(crate) struct AskArgs {
    #[arg(value_name = "QUESTION", help = "Question to send")]
    pub(crate) question: String,

    #[arg(
        long = "conversation-id",
        env = "ASSIST_CONVERSATION_ID",
        help = "Continue an existing conversation"
    )]
    pub(crate) conversation_id: Option<String>,

    #[arg(long, help = "Page context prepended to the question")]
    pub(crate) context: Option<String>,

    #[arg(long = "prompt-prefix", help = "Prompt prefix forwarded to the agent")]
    pub(crate) prompt_prefix: Option<String>,

    #[arg(
        long = "no-stream",
        action = ArgAction::SetTrue,
        help = "Ask the gateway for one JSON body instead of a stream"
    )]
    pub(crate) no_stream: bool,

    #[arg(
        long,
        action = ArgAction::SetTrue,
        help = "Print the final conversation state as JSON"
    )]
    pub(crate) json: bool,
}

#[derive(Debug, Args)]
pub(crate) struct AbortArgs {
    #[arg(value_name = "CONVERSATION_ID")]
    pub(crate) conversation_id: String,
}

#[derive(Debug, Args)]
pub(crate) struct HistoryArgs {
    #[arg(value_name = "CONVERSATION_ID")]
    pub(crate) conversation_id: String,

    #[arg(long, action = ArgAction::SetTrue, help = "Print raw JSON")]
    pub(crate) json: bool,
}

#[cfg(test)]
mod tests {
    use assist_protocol::FrameConvention;
    use clap::Parser;

    use super::{Cli, Command};

    #[test]
    fn unit_serve_defaults_are_applied() {
        let cli = Cli::try_parse_from(["assist", "serve"]).expect("parse");
        assert_eq!(cli.framing, FrameConvention::Ndjson);
        let Command::Serve(args) = cli.command else {
            panic!("expected serve");
        };
        assert_eq!(args.bind, "127.0.0.1:8787");
        assert_eq!(args.root_agent_config, "os_chat");
        assert_eq!(args.agent_timeout_ms, 300_000);
        assert_eq!(args.stream_chunk_chars, 16);
        assert!(args.root_agent_id.is_none());
    }

    #[test]
    fn functional_ask_accepts_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "assist",
            "ask",
            "why is it slow?",
            "--conversation-id",
            "conv-1",
            "--framing",
            "legacy-sse",
            "--no-stream",
        ])
        .expect("parse");
        assert_eq!(cli.framing, FrameConvention::LegacySse);
        let Command::Ask(args) = cli.command else {
            panic!("expected ask");
        };
        assert_eq!(args.question, "why is it slow?");
        assert_eq!(args.conversation_id.as_deref(), Some("conv-1"));
        assert!(args.no_stream);
        assert!(!args.json);
    }

    #[test]
    fn regression_invalid_values_are_rejected() {
        assert!(Cli::try_parse_from(["assist", "serve", "--stream-chunk-chars", "0"]).is_err());
        assert!(Cli::try_parse_from(["assist", "--framing", "xml", "abort", "c"]).is_err());
        assert!(Cli::try_parse_from(["assist", "history"]).is_err());
    }
}
