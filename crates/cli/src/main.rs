//! rago CLI: operator tooling for the agent runtime.
//!
//! Commands:
//! - `servers`: Start auto-start servers and show their health
//! - `tools`: List the federated tool catalog
//! - `skills`: List loaded skills
//! - `call`: Call one federated tool directly
//! - `memory`: Query long-term memory

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;

#[derive(Parser)]
#[command(name = "rago", about = "rago: LLM agent runtime", version, author)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file (default: ~/.rago/config.toml)
    #[arg(short, long, global = true, env = "RAGO_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start auto-start servers and show their health
    Servers,

    /// List the federated tool catalog
    Tools {
        /// Include tools hidden from the LLM
        #[arg(short, long)]
        all: bool,
    },

    /// List loaded skills
    Skills,

    /// Call a tool by its federated name
    Call {
        tool: String,

        /// JSON object of arguments
        #[arg(default_value = "{}")]
        args: String,
    },

    /// Long-term memory
    Memory {
        #[command(subcommand)]
        command: MemoryCommands,
    },
}

#[derive(Subcommand)]
enum MemoryCommands {
    /// Search stored memories
    Search {
        query: String,

        #[arg(short, long, default_value_t = 10)]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config = commands::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Servers => commands::servers::run(&config).await?,
        Commands::Tools { all } => commands::tools::run(&config, all).await?,
        Commands::Skills => commands::skills::run(&config)?,
        Commands::Call { tool, args } => commands::call::run(&config, &tool, &args).await?,
        Commands::Memory {
            command: MemoryCommands::Search { query, limit },
        } => commands::memory::search(&config, &query, limit).await?,
    }

    Ok(())
}
