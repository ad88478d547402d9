//! procflow command-line interface
//!
//! Runs the post-processing supervisor for one simulation.

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use console::style;
use tracing_subscriber::EnvFilter;

mod commands;

use commands::{check, run};

/// Exit code for configuration and internal errors.
const EXIT_ERROR: i32 = 2;

/// procflow - year-set post-processing for climate simulations
#[derive(Parser)]
#[command(name = "procflow")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Log output format
    #[arg(long, value_enum, default_value = "console", global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Console,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Supervise a run until every year set completes or fails
    Run {
        /// Run configuration (YAML)
        #[arg(short, long, env = "PROCFLOW_CONFIG")]
        config: Option<PathBuf>,

        /// Where to write the state file
        #[arg(long)]
        state: Option<PathBuf>,

        /// Evaluate readiness and write the state file once, without dispatching jobs
        #[arg(long)]
        dry_run: bool,

        /// Use the in-process mock scheduler instead of the real one
        #[arg(long)]
        mock: bool,
    },

    /// Validate a configuration and show the planned year sets and jobs
    Check {
        /// Run configuration (YAML)
        #[arg(short, long, env = "PROCFLOW_CONFIG")]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Setup logging
    let level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match cli.log_format {
        LogFormat::Console => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_current_span(false)
            .init(),
    }

    // Execute command
    let result = match cli.command {
        Commands::Run {
            config,
            state,
            dry_run,
            mock,
        } => run::execute(config.as_deref(), state.as_deref(), dry_run, mock).await,

        Commands::Check { config } => check::execute(config.as_deref()).await.map(|()| 0),
    };

    // Handle errors
    let code = match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {:#}", style("Error:").red().bold(), e);
            EXIT_ERROR
        }
    };
    std::process::exit(code);
}
