use clap::{Parser, Subcommand};

mod commands;

use commands::{BatchArgs, WalkForwardArgs};

#[derive(Parser)]
#[command(name = "forecast-guard")]
#[command(about = "Walk-forward validation for directional forecasters", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a walk-forward backtest for one symbol
    WalkForward(WalkForwardArgs),
    /// Run many symbols concurrently and validate the pooled predictions
    Batch(BatchArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::WalkForward(args) => {
            commands::run_walk_forward(args).await?;
        }
        Commands::Batch(args) => {
            commands::run_batch(args).await?;
        }
    }

    Ok(())
}
