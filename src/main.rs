use std::io::IsTerminal;
use std::io::Read;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use crush_client::{ensure_server, Client};
use crush_core::app::DefaultProviderFactory;
use crush_server::Server;
use crush_shared::event::EventPayload;
use crush_shared::host::{default_host, parse_host_url};
use crush_shared::instance::Instance as InstanceSpec;
use crush_shared::AgentEventKind;

#[derive(Parser)]
#[command(name = "crush", about = "Local agent runtime with a terminal-first RPC surface")]
struct Cli {
    /// Server host (unix://, npipe://, or tcp://)
    #[arg(long, short = 'H', global = true)]
    host: Option<String>,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the crush server in the foreground
    Server,

    /// Run a single non-interactive prompt and exit
    Run {
        /// The prompt; stdin is prepended when piped
        prompt: Vec<String>,

        /// Workspace directory (defaults to the current directory)
        #[arg(long)]
        path: Option<String>,

        /// Skip all permission requests for this instance
        #[arg(long)]
        yolo: bool,

        /// Only print the assistant's reply
        #[arg(short, long)]
        quiet: bool,
    },

    /// Ask a running server to shut down
    Shutdown,
}

fn init_logging(debug: bool) {
    use tracing_subscriber::EnvFilter;

    let default = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.debug);

    let host = cli.host.clone().unwrap_or_else(default_host);

    match cli.command {
        Commands::Server => {
            let host = parse_host_url(&host).map_err(anyhow::Error::msg)?;
            let server = Server::new(Arc::new(DefaultProviderFactory));
            info!(host = %host, "starting crush server");
            server.listen_and_serve(&host).await
        }
        Commands::Run {
            prompt,
            path,
            yolo,
            quiet,
        } => run_prompt(&host, prompt, path, yolo, quiet).await,
        Commands::Shutdown => {
            let client = Client::new(&host)?;
            client.shutdown_server().await?;
            info!("server asked to shut down");
            Ok(())
        }
    }
}

/// The non-interactive flow: bootstrap a server if needed, create an
/// instance for the workspace, run one prompt, print the reply, clean up.
async fn run_prompt(
    host: &str,
    prompt: Vec<String>,
    path: Option<String>,
    yolo: bool,
    quiet: bool,
) -> Result<()> {
    let mut prompt = prompt.join(" ");
    if !std::io::stdin().is_terminal() {
        let mut piped = String::new();
        std::io::stdin().read_to_string(&mut piped)?;
        if !piped.trim().is_empty() {
            prompt = if prompt.is_empty() {
                piped.trim().to_string()
            } else {
                format!("{}\n\n{prompt}", piped.trim())
            };
        }
    }
    if prompt.trim().is_empty() {
        bail!("no prompt provided");
    }

    let workspace = match path {
        Some(p) => p,
        None => std::env::current_dir()?.to_string_lossy().to_string(),
    };

    let client = ensure_server(host).await?;
    let instance = client
        .create_instance(&InstanceSpec {
            path: workspace,
            yolo,
            ..Default::default()
        })
        .await
        .context("failed to create instance")?;

    let result = run_in_instance(&client, &instance.id, &prompt, quiet).await;
    let _ = client.delete_instance(&instance.id).await;
    result
}

async fn run_in_instance(client: &Client, id: &str, prompt: &str, quiet: bool) -> Result<()> {
    let session = client.create_session(id, "crush run").await?;
    let mut events = client.events(id).await?;

    client.run_agent(id, &session.id, prompt, vec![]).await?;

    while let Some(event) = events.recv().await {
        if let EventPayload::AgentEvent(agent_event) = event.payload {
            match agent_event.kind {
                AgentEventKind::Response => {
                    if let Some(message) = agent_event.message {
                        println!("{}", message.content());
                    }
                    return Ok(());
                }
                AgentEventKind::Error => {
                    bail!(
                        "agent error: {}",
                        agent_event.error.unwrap_or_else(|| "unknown".into())
                    );
                }
                AgentEventKind::Summarize | AgentEventKind::Queued => {
                    if !quiet {
                        info!(kind = ?agent_event.kind, "agent progress");
                    }
                }
            }
        }
    }
    bail!("event stream closed before the agent finished")
}
