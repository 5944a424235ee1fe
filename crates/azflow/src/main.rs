mod commands;
mod service;
mod specs;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "azflow")]
#[command(about = "Grant roles to the managed identities of Azure VMs and scale sets", long_about = None)]
struct Cli {
    /// Path to azflow.yaml (otherwise discovered)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a reconcile pass over declared role assignments
    Reconcile {
        /// YAML or JSON file with the declared specs
        #[arg(short, long)]
        specs: PathBuf,
        /// Keep running passes while failures are retryable
        #[arg(short, long)]
        wait: bool,
        /// Overall deadline in seconds
        #[arg(short, long)]
        timeout: Option<u64>,
        /// Maximum number of passes with --wait
        #[arg(long, default_value = "5")]
        max_attempts: u32,
    },
    /// Remove role assignments (they go away with their resource)
    Delete,
    /// List operations still in flight
    Operations {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .init();

    // Version needs no settings
    if matches!(cli.command, Commands::Version) {
        println!("azflow {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let settings = azflow_config::Settings::load(cli.config.as_deref())?;
    tracing::debug!(state_dir = %settings.state_dir.display(), "settings loaded");

    match cli.command {
        Commands::Reconcile {
            specs,
            wait,
            timeout,
            max_attempts,
        } => {
            commands::reconcile::handle(&settings, &specs, wait, timeout, max_attempts).await?;
        }
        Commands::Delete => {
            commands::delete::handle(&settings).await?;
        }
        Commands::Operations { json } => {
            commands::operations::handle(&settings, json).await?;
        }
        Commands::Version => {
            unreachable!("Version is handled before settings are loaded");
        }
    }

    Ok(())
}
