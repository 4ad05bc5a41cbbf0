use clap::{Parser, Subcommand};
use igloo_coordinator::commands;
use igloo_coordinator::config::Settings;
use std::path::PathBuf;
use tokio::signal;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Settings file; defaults to `COORDINATOR_CONFIG_PATH` when set.
    #[arg(short, long)]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Aggregate a query dump into a statistics snapshot.
    Aggregate {
        #[arg(short, long)]
        input: PathBuf,
        #[arg(long)]
        pretty: bool,
    },
    /// Check a statistics snapshot and print its canonical form.
    Validate {
        #[arg(short, long)]
        input: PathBuf,
    },
    /// Replay a file of query dumps, one per line, through a live tracker.
    Replay {
        #[arg(short, long)]
        input: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let settings = match args.config.as_deref() {
        Some(path) => Settings::load(Some(path))?,
        None => Settings::new()?,
    };

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&settings.log_filter)),
        )
        .init();

    let output = match args.command {
        Command::Aggregate { input, pretty } => {
            commands::aggregate(&input, pretty || settings.pretty_json)?
        }
        Command::Validate { input } => commands::validate(&input, settings.pretty_json)?,
        Command::Replay { input } => {
            let (shutdown_tx, shutdown_rx) = watch::channel(false);
            tokio::spawn(async move {
                if let Err(e) = signal::ctrl_c().await {
                    warn!(error = %e, "failed to listen for ctrl-c");
                    return;
                }
                info!("Shutting down replay...");
                let _ = shutdown_tx.send(true);
            });
            commands::replay(&input, &settings, shutdown_rx).await?
        }
    };
    println!("{output}");
    Ok(())
}
