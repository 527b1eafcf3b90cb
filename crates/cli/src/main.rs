mod chat;
mod config;
mod error;
mod server;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use runtime::{Orchestrator, SessionManager};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

use config::Config;
use error::{Error, Result};

const CONFIG_FILE: &str = "switchboard.toml";

/// Characters of each tool description shown at startup.
const DESCRIPTION_PREVIEW: usize = 60;

#[derive(Parser)]
#[command(name = "switchboard")]
#[command(about = "Route language-model tool calls to MCP tool providers", long_about = None)]
#[command(version)]
struct Cli {
    /// Config file (default: ./switchboard.toml if present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the WebSocket chat endpoint
    Serve {
        /// Address to bind (overrides server.bind)
        #[arg(short, long)]
        bind: Option<String>,
    },
    /// Start an interactive chat session in the terminal
    Chat,
    /// Connect the providers and list their tools
    Tools,
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Some(Commands::Serve { bind }) => {
            let bind = bind.unwrap_or_else(|| config.server.bind.clone());
            cmd_serve(&config, &bind).await
        }
        Some(Commands::Chat) | None => cmd_chat(&config).await,
        Some(Commands::Tools) => cmd_tools(&config).await,
    }
}

fn init_tracing(verbose: bool) {
    let default_filter = if verbose {
        "cli=debug,runtime=debug,mcp=debug,info"
    } else {
        "cli=info,runtime=info,mcp=info,warn"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_writer(std::io::stderr)
                .with_filter(filter),
        )
        .init();
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) if !path.exists() => Err(Error::ConfigNotFound {
            path: path.to_path_buf(),
        }),
        Some(path) => Ok(Config::load(path)?),
        None if Path::new(CONFIG_FILE).exists() => Ok(Config::load(CONFIG_FILE)?),
        None => {
            tracing::info!("no {CONFIG_FILE} found, using defaults");
            Ok(Config::default_config())
        }
    }
}

async fn connect(config: &Config) -> Result<Arc<SessionManager>> {
    let manager = SessionManager::connect_all(&config.providers, &config.overrides).await?;

    tracing::info!(tools = manager.len(), "tool providers connected");
    for capability in manager.capabilities() {
        tracing::info!(
            tool = %capability.exposed_name,
            description = %preview(&capability.description, DESCRIPTION_PREVIEW),
            "tool available"
        );
    }
    Ok(Arc::new(manager))
}

fn preview(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((end, _)) => &text[..end],
        None => text,
    }
}

async fn cmd_serve(config: &Config, bind: &str) -> Result<()> {
    let backend = config.backend()?;
    tracing::info!(backend = %backend, "model backend ready");

    let tools = connect(config).await?;
    let orchestrator = Arc::new(
        Orchestrator::new(backend, Arc::clone(&tools))
            .with_config(config.agent.orchestrator_config()),
    );

    let result = server::serve(orchestrator, bind).await;
    tools.disconnect_all().await;
    tracing::info!("tool providers disconnected");
    result
}

async fn cmd_chat(config: &Config) -> Result<()> {
    println!("switchboard v{}", env!("CARGO_PKG_VERSION"));

    let backend = config.backend()?;
    println!("Model: {}", backend.model());

    let tools = connect(config).await?;
    println!("Tools: {}", tools.len());

    let orchestrator = Orchestrator::new(backend, Arc::clone(&tools))
        .with_config(config.agent.orchestrator_config());

    let result = chat::run(&orchestrator).await;
    tools.disconnect_all().await;
    println!("\nSession ended.");
    Ok(result?)
}

async fn cmd_tools(config: &Config) -> Result<()> {
    let tools = connect(config).await?;

    if tools.is_empty() {
        println!("No tools registered.");
    } else {
        println!("{:<28}  DESCRIPTION", "TOOL");
        println!("{}", "-".repeat(80));
        for capability in tools.capabilities() {
            println!(
                "{:<28}  {}",
                capability.exposed_name,
                preview(&capability.description, DESCRIPTION_PREVIEW)
            );
        }
    }

    tools.disconnect_all().await;
    Ok(())
}
