use std::fs;
use std::io::Read;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::info;
use uuid::Uuid;

use camber_core::{Engine, EngineConfig};
use camber_observability::{default_logs_dir, init_logging};
use camber_reasoner::{OpenAiCompatibleReasoner, ReasonerConfig};
use camber_server::{serve, AppState};
use camber_tools::{validate_tool_schemas, ToolRegistry};
use camber_types::{History, Turn};

const LOG_RETENTION_DAYS: u64 = 14;

#[derive(Parser, Debug)]
#[command(name = "camber-engine")]
#[command(about = "Headless Camber agent backend")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the HTTP and WebSocket transports.
    Serve {
        #[arg(long, alias = "host", default_value = "127.0.0.1")]
        hostname: String,
        #[arg(long, default_value_t = 8000)]
        port: u16,
        #[arg(long, env = "CAMBER_REASONER_URL")]
        reasoner_url: Option<String>,
        #[arg(long, env = "CAMBER_REASONER_MODEL")]
        model: Option<String>,
        #[arg(long)]
        api_key: Option<String>,
        #[arg(long, default_value_t = 8)]
        max_cycles: usize,
    },
    /// One prompt through the full engine, print the final assistant reply.
    Run {
        prompt: String,
        #[arg(long)]
        reasoner_url: Option<String>,
        #[arg(long)]
        model: Option<String>,
        #[arg(long)]
        api_key: Option<String>,
        #[arg(long, default_value_t = 8)]
        max_cycles: usize,
    },
    /// Dispatch one tool call directly, bypassing the reasoner.
    Tool {
        /// `{"tool": .., "args": {..}}`, inline, `@file`, or `-` for stdin
        #[arg(long)]
        json: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Serve {
            hostname,
            port,
            reasoner_url,
            model,
            api_key,
            max_cycles,
        } => {
            let logs_dir = default_logs_dir();
            let (_log_guard, log_info) = init_logging(&logs_dir, LOG_RETENTION_DAYS)?;
            info!("engine logging initialized: {:?}", log_info);
            let addr: SocketAddr = format!("{hostname}:{port}")
                .parse()
                .context("invalid hostname or port")?;
            let state = build_state(reasoner_url, model, api_key, max_cycles)?;
            info!("starting camber-engine on http://{addr}");
            serve(addr, state).await?;
        }
        Command::Run {
            prompt,
            reasoner_url,
            model,
            api_key,
            max_cycles,
        } => {
            let state = build_state(reasoner_url, model, api_key, max_cycles)?;
            let history = History::from_turns(vec![Turn::user(prompt)])?;
            let run_id = Uuid::new_v4().to_string();
            let history = state
                .engine
                .run(&run_id, history, CancellationToken::new())
                .await?;
            let reply = history.last().map(|t| t.content()).unwrap_or_default();
            println!("{reply}");
        }
        Command::Tool { json } => {
            let payload = read_tool_json(&json)?;
            let tool = payload
                .get("tool")
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .to_string();
            if tool.is_empty() {
                anyhow::bail!("tool is required in input json");
            }
            let args = payload
                .get("args")
                .cloned()
                .unwrap_or_else(|| serde_json::json!({}));
            let registry = ToolRegistry::builtin();
            let result = registry.dispatch(&tool, &args).await;
            println!("{}", serde_json::to_string_pretty(&result.to_value())?);
        }
    }

    Ok(())
}

fn build_state(
    reasoner_url: Option<String>,
    model: Option<String>,
    api_key: Option<String>,
    max_cycles: usize,
) -> anyhow::Result<AppState> {
    let max_cycles = validate_max_cycles(max_cycles)?;
    let tools = ToolRegistry::builtin();
    let schemas = tools.schemas();
    validate_tool_schemas(&schemas).context("builtin tool schemas failed validation")?;

    let mut config = ReasonerConfig::from_env();
    if let Some(url) = trimmed(reasoner_url) {
        config.base_url = url;
    }
    if let Some(model) = trimmed(model) {
        config.model = model;
    }
    if let Some(key) = trimmed(api_key) {
        config.api_key = Some(key);
    }

    let reasoner = Arc::new(OpenAiCompatibleReasoner::new(config, schemas));
    let engine = Engine::new(
        reasoner,
        tools,
        EngineConfig {
            max_cycles,
            ..EngineConfig::default()
        },
    );
    Ok(AppState::new(engine))
}

fn validate_max_cycles(max_cycles: usize) -> anyhow::Result<usize> {
    if max_cycles == 0 {
        anyhow::bail!("--max-cycles must be at least 1");
    }
    Ok(max_cycles)
}

fn trimmed(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn read_tool_json(input: &str) -> anyhow::Result<serde_json::Value> {
    if input.trim() == "-" {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf)?;
        return Ok(serde_json::from_str(&buf)?);
    }
    if let Some(path) = input.strip_prefix('@') {
        let raw = fs::read_to_string(path)?;
        return Ok(serde_json::from_str(&raw)?);
    }
    Ok(serde_json::from_str(input)?)
}
