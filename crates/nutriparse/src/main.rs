//! Unified launcher for the nutriparse service.
//!
//! `serve` runs the HTTP API, `worker` runs a worker pool, `start` runs
//! both in one process. `jobs` and `cleanup` are operator utilities that
//! talk to the store directly.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use nutriparse_logging::{init_logging, LogConfig};
use nutriparse_parser::CancellationToken;
use std::path::PathBuf;
use std::process::ExitCode;

mod cli;

#[derive(Parser, Debug)]
#[command(name = "nutriparse", about = "Nutrition document parsing service")]
struct Cli {
    /// Enable verbose logging to stderr
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    /// Configuration file (TOML); defaults + NUTRIPARSE_* env otherwise
    #[arg(short = 'c', long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the HTTP API server
    Serve,

    /// Run a worker pool against the shared store
    Worker {
        /// Override dispatcher.concurrency
        #[arg(long)]
        slots: Option<usize>,
    },

    /// Run API and worker pool in one process
    Start,

    /// List jobs
    Jobs {
        /// Filter by state (pending, queued, leased, running, completed,
        /// failed, cancelled)
        #[arg(long)]
        state: Option<String>,

        /// Maximum jobs to display
        #[arg(long, default_value = "50")]
        limit: u64,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show one job in full
    Job {
        id: String,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Request cancellation of a job
    Cancel { id: String },

    /// Delete terminal jobs (and their blobs) older than the retention
    /// window
    Cleanup {
        /// Override cleanup.retention_days
        #[arg(long)]
        days: Option<u32>,
    },

    /// Print the effective configuration
    Config,
}

fn main() -> ExitCode {
    let args = Cli::parse();
    if let Err(err) = init_logging(LogConfig {
        app_name: "nutriparse",
        verbose: args.verbose,
    }) {
        eprintln!("failed to initialize logging: {err:?}");
        return ExitCode::from(1);
    }

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{err:?}");
            ExitCode::from(1)
        }
    }
}

fn run(args: Cli) -> Result<()> {
    let config = nutriparse_protocol::AppConfig::load(args.config.as_deref())
        .context("failed to load configuration")?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;

    match args.command {
        Commands::Serve => runtime.block_on(cli::serve::run(config, false, None)),
        Commands::Worker { slots } => runtime.block_on(cli::worker::run(config, slots)),
        Commands::Start => runtime.block_on(cli::serve::run(config, true, None)),
        Commands::Jobs { state, limit, json } => cli::jobs::run(&config, state, limit, json),
        Commands::Job { id, json } => cli::jobs::show(&config, &id, json),
        Commands::Cancel { id } => cli::jobs::cancel(&config, &id),
        Commands::Cleanup { days } => runtime.block_on(cli::jobs::cleanup(&config, days)),
        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

/// Resolve a shutdown token that trips on SIGINT/SIGTERM.
pub(crate) fn shutdown_token() -> CancellationToken {
    let token = CancellationToken::new();
    let trip = token.clone();
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            let mut sigterm = match tokio::signal::unix::signal(
                tokio::signal::unix::SignalKind::terminate(),
            ) {
                Ok(signal) => signal,
                Err(err) => {
                    tracing::error!(error = %err, "failed to install SIGTERM handler");
                    let _ = ctrl_c.await;
                    trip.cancel();
                    return;
                }
            };
            tokio::select! {
                _ = ctrl_c => {}
                _ = sigterm.recv() => {}
            }
        }
        #[cfg(not(unix))]
        {
            let _ = ctrl_c.await;
        }
        tracing::info!("shutdown signal received");
        trip.cancel();
    });
    token
}
