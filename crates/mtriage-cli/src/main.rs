//! mtriage - resumable media triage pipelines
//!
//! Command-line interface over the selector/analyser engine.

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use mtriage_cli::commands::{self, run::RunCommand, validate::ValidateCommand};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(
    name = "mtriage",
    version,
    about = "Select media from sources and analyse it in resumable batches",
    after_help = "EXAMPLES:\n  \
                  # List selectors and analysers with their arguments\n  \
                  mtriage modules\n\n  \
                  # Check a config without running it\n  \
                  mtriage validate run.yaml\n\n  \
                  # Run, stopping on unexpected element errors\n  \
                  mtriage run run.yaml --dev\n\n\
                  Set MTRIAGE_THREADS to override the worker count."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the pipeline a config describes
    Run(RunCommand),

    /// Check a config against the registered modules
    Validate(ValidateCommand),

    /// List available modules
    Modules,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = match &cli.command {
        Commands::Modules => Level::WARN,
        _ if cli.verbose => Level::DEBUG,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;

    match cli.command {
        Commands::Run(cmd) => cmd.execute().map(|_| ()),
        Commands::Validate(cmd) => cmd.execute(),
        Commands::Modules => commands::modules::list_modules(),
    }
}
