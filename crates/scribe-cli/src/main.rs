//! `scribe` -- CLI binary for the scribe completion gateway.
//!
//! Provides the following subcommands:
//!
//! - `scribe complete` -- Send one prompt and print the generated text.
//! - `scribe stream` -- Send one prompt and print text as it arrives.
//!
//! Both accept `--sync` to use the blocking calling convention instead of
//! the async one.

use clap::{Parser, Subcommand};

mod commands;

/// scribe completion gateway CLI.
#[derive(Parser)]
#[command(name = "scribe", about = "scribe completion gateway CLI", version)]
struct Cli {
    /// Enable verbose (debug-level) logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to a JSON settings file. Defaults apply when omitted.
    #[arg(short, long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level subcommands.
#[derive(Subcommand)]
enum Commands {
    /// Send one prompt and print the generated text.
    Complete(commands::complete::CompleteArgs),

    /// Send one prompt and print text deltas as they arrive.
    Stream(commands::stream::StreamArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let settings = commands::load_settings(cli.config.as_deref())?;

    match cli.command {
        Commands::Complete(args) => commands::complete::run(args, settings).await,
        Commands::Stream(args) => commands::stream::run(args, settings).await,
    }
}
