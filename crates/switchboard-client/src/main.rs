//! switchboard - real-time session client
//!
//! Connects to a Switchboard server to watch, send and request messages
//! from the command line.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use serde_json::Value;
use switchboard_client::{
    ConnectionStatus, Message, Priority, Session, SessionBuilder, SessionConfig, SessionEvent,
};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "switchboard")]
#[command(about = "Switchboard real-time session client")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct ConnectArgs {
    /// Path to a TOML (or .json) config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Server WebSocket URL (overrides the config file)
    #[arg(long, env = "SWITCHBOARD_URL")]
    url: Option<String>,

    /// Auth token (overrides the config file)
    #[arg(long, env = "SWITCHBOARD_TOKEN")]
    token: Option<String>,

    /// Seconds to wait for the connection
    #[arg(long, default_value_t = 15)]
    wait: u64,
}

#[derive(Subcommand)]
enum Commands {
    /// Print inbound messages and connection changes until Ctrl-C
    Listen {
        #[command(flatten)]
        connect: ConnectArgs,

        /// Message types to print
        #[arg(short = 't', long = "type", required = true)]
        types: Vec<String>,
    },

    /// Send one message
    Send {
        #[command(flatten)]
        connect: ConnectArgs,

        /// Message type
        #[arg(short = 't', long = "type")]
        kind: String,

        /// JSON payload
        #[arg(short, long, default_value = "{}")]
        payload: String,

        /// Queue priority
        #[arg(long, default_value = "normal")]
        priority: Priority,
    },

    /// Send a correlated request and print the response
    Request {
        #[command(flatten)]
        connect: ConnectArgs,

        /// Request type; the response type is `<type>_response`
        #[arg(short = 't', long = "type")]
        kind: String,

        /// JSON payload
        #[arg(short, long, default_value = "{}")]
        payload: String,

        /// Response timeout in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,
    },

    /// Generate a sample config file (TOML, or JSON for a .json path)
    InitConfig {
        /// Path to write config
        #[arg(short, long, default_value = "switchboard.toml")]
        output: PathBuf,

        /// Server URL
        #[arg(long, default_value = "ws://localhost:4000/realtime")]
        url: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive("switchboard=info".parse()?))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Listen { connect, types } => listen(connect, types).await?,
        Commands::Send {
            connect,
            kind,
            payload,
            priority,
        } => send(connect, kind, &payload, priority).await?,
        Commands::Request {
            connect,
            kind,
            payload,
            timeout_ms,
        } => request(connect, &kind, &payload, timeout_ms).await?,
        Commands::InitConfig { output, url } => init_config(output, url)?,
    }

    Ok(())
}

fn load_config(args: &ConnectArgs) -> anyhow::Result<SessionConfig> {
    let mut config = match (&args.config, &args.url) {
        (Some(path), _) => SessionConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        (None, Some(url)) => SessionConfig::new(url.clone()),
        (None, None) => anyhow::bail!("either --config or --url is required"),
    };
    if let (Some(_), Some(url)) = (&args.config, &args.url) {
        config.url.clone_from(url);
    }
    if let Some(token) = &args.token {
        config.token = Some(token.clone());
    }
    config.validate()?;
    Ok(config)
}

async fn open(args: &ConnectArgs) -> anyhow::Result<Session> {
    let config = load_config(args)?;
    info!(url = %config.url, client_id = %config.client_id, "connecting");

    let session = SessionBuilder::new(config).build()?;
    session.connect().await?;
    session
        .wait_for_status(ConnectionStatus::Connected, Duration::from_secs(args.wait))
        .await
        .context("server unreachable")?;
    Ok(session)
}

fn parse_payload(payload: &str) -> anyhow::Result<Value> {
    serde_json::from_str(payload).context("payload is not valid JSON")
}

async fn listen(args: ConnectArgs, types: Vec<String>) -> anyhow::Result<()> {
    let session = open(&args).await?;
    let mut events = session.events();

    let _subscriptions: Vec<_> = types
        .into_iter()
        .map(|kind| {
            session.subscribe(kind, |message: &Message| {
                let line = serde_json::json!({
                    "id": message.id,
                    "type": message.kind,
                    "payload": message.payload,
                    "timestamp": message.timestamp,
                });
                println!("{line}");
            })
        })
        .collect();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                break;
            }
            event = events.recv() => match event {
                Ok(SessionEvent::StatusChanged(status)) => info!(status = %status, "status"),
                Ok(SessionEvent::Reconnecting { attempt, delay }) => {
                    info!(attempt, delay_ms = delay.as_millis() as u64, "reconnecting");
                }
                Ok(SessionEvent::ReconnectFailed { attempts }) => {
                    anyhow::bail!("gave up after {attempts} reconnection attempts");
                }
                Ok(SessionEvent::AuthenticationFailed { reason }) => {
                    anyhow::bail!("authentication failed: {reason}");
                }
                Ok(SessionEvent::Error(error)) => warn!(error = %error, "transport error"),
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "missed events"),
                Err(RecvError::Closed) => break,
            }
        }
    }

    let state = session.state();
    info!(
        sent = state.messages_sent,
        received = state.messages_received,
        avg_latency_ms = state.average_latency_ms,
        "session summary"
    );
    session.close().await;
    Ok(())
}

async fn send(
    args: ConnectArgs,
    kind: String,
    payload: &str,
    priority: Priority,
) -> anyhow::Result<()> {
    let payload = parse_payload(payload)?;
    let session = open(&args).await?;

    let message = Message::new(kind, payload).with_priority(priority);
    let id = message.id.clone();
    session.send(message).await?;
    println!("sent {id}");

    session.close().await;
    Ok(())
}

async fn request(
    args: ConnectArgs,
    kind: &str,
    payload: &str,
    timeout_ms: Option<u64>,
) -> anyhow::Result<()> {
    let payload = parse_payload(payload)?;
    let session = open(&args).await?;

    let response = session
        .request(kind, payload, timeout_ms.map(Duration::from_millis))
        .await;
    session.close().await;

    println!("{}", serde_json::to_string_pretty(&response?)?);
    Ok(())
}

fn init_config(output: PathBuf, url: String) -> anyhow::Result<()> {
    let config = SessionConfig::new(url);
    config.validate()?;
    config.save(&output)?;

    println!("Config written to {}", output.display());
    println!();
    println!("Add a token if your server requires one, then run:");
    println!("  switchboard listen --config {} --type presence", output.display());

    Ok(())
}
