use clap::{Parser, Subcommand};
use color_eyre::eyre::Result;
use std::io::stderr;
use tracing::debug;
use tracing_subscriber::{EnvFilter, fmt, prelude::*, registry};

mod cmd;

use cmd::generate::GenerateArgs;
use cmd::run::RunArgs;

#[derive(Parser, Debug)]
#[command(author, version, about = "Tinkerbell-style workflow controller", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output - shows more detailed logs
    #[arg(short, long, global = true, default_value_t = false)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the controller against an in-memory store and simulated remote service
    Run(RunArgs),
    /// Print generated resources as JSON
    Generate(GenerateArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();

    // RUST_LOG wins; otherwise our crates log at info, or debug with --verbose
    let level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "tackle={level},tackle_controller={level},tackle_crd={level}"
        ))
    });
    registry()
        .with(filter)
        .with(fmt::layer().with_writer(stderr))
        .init();
    debug!("Logger initialized");

    match cli.command {
        Commands::Run(args) => cmd::run::run(args).await,
        Commands::Generate(args) => cmd::generate::run(args),
    }
}
