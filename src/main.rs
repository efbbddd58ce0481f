//! falco-responder - automated security response daemon
//!
//! Turns analyzed security findings into safe response commands and runs
//! them under an approval policy.

use clap::{Parser, Subcommand};
use falco_responder::agent::AgentMode;
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

mod cli;

/// Log filter override, e.g. `RESPONDER_LOG=falco_responder::engine=trace`
const LOG_ENV: &str = "RESPONDER_LOG";

/// falco-responder - Security Response Orchestrator
#[derive(Parser)]
#[command(name = "falco-responder")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the responder in the foreground
    Start {
        /// Config file (defaults to ~/.falco-responder/config.yaml)
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// JSON-lines file of findings to replay (stdin when omitted)
        #[arg(short, long)]
        findings: Option<PathBuf>,
        /// Simulate command execution
        #[arg(long)]
        dry_run: bool,
        /// Agent mode: passive, semi_auto, auto, learning
        #[arg(short, long)]
        mode: Option<AgentMode>,
    },

    /// Stop the running responder
    Stop,

    /// Show responder status
    Status {
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Show recent audit entries from the store
    Audit {
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Number of entries to show
        #[arg(short = 'n', long, default_value = "20")]
        limit: usize,
        /// Re-verify the stored hash chains
        #[arg(long)]
        verify: bool,
    },

    /// Map a finding file (YAML or JSON) to response commands
    Map {
        /// Finding file
        file: PathBuf,
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Map as if the caller requested automatic execution
        #[arg(long)]
        auto_execute: bool,
        /// Print the commands as JSON
        #[arg(long)]
        json: bool,
    },

    /// Run the safety checker on a command line
    Check {
        /// Command to check
        command: String,
    },

    /// List the command template catalog
    Templates,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = match cli.verbose {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };

    match std::env::var(LOG_ENV) {
        Ok(filter) => {
            let subscriber = FmtSubscriber::builder()
                .with_env_filter(EnvFilter::new(filter))
                .with_target(false)
                .finish();
            tracing::subscriber::set_global_default(subscriber)?;
        }
        Err(_) => {
            let subscriber = FmtSubscriber::builder()
                .with_max_level(level)
                .with_target(false)
                .finish();
            tracing::subscriber::set_global_default(subscriber)?;
        }
    }

    match cli.command {
        Commands::Start {
            config,
            findings,
            dry_run,
            mode,
        } => {
            info!("🛡️ Starting falco-responder...");
            cli::start::run(cli::start::StartOptions {
                config,
                findings,
                dry_run,
                mode,
            })
            .await?;
        }
        Commands::Stop => {
            cli::stop::run().await?;
        }
        Commands::Status { config } => {
            cli::status::run(config.as_deref()).await?;
        }
        Commands::Audit { config, limit, verify } => {
            cli::status::audit(config.as_deref(), limit, verify).await?;
        }
        Commands::Map {
            file,
            config,
            auto_execute,
            json,
        } => {
            cli::map::run(&file, config.as_deref(), auto_execute, json).await?;
        }
        Commands::Check { command } => {
            cli::check::run(&command)?;
        }
        Commands::Templates => {
            cli::templates::run();
        }
    }

    Ok(())
}
