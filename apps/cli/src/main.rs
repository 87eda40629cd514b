//! Relay CLI - command-line interface for the relay backend router.
//!
//! This CLI provides a `relay` command for validating router configuration,
//! previewing and dispatching routing decisions, and inspecting usage and
//! backend health.

mod commands;

use clap::{CommandFactory, Parser, Subcommand};
use commands::{health, route, stats, validate};
use std::path::PathBuf;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// Relay - adaptive backend selection and dispatch
#[derive(Parser, Debug)]
#[command(
    name = "relay",
    author,
    version,
    about = "Relay - adaptive backend selection and dispatch",
    long_about = "Relay picks the best language-model backend for each request from a \
                  configured catalogue,\nbalancing quality, cost and speed against live usage, \
                  and falls back automatically on failure."
)]
struct Args {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "warn", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Validate a router configuration file
    ///
    /// Parses the TOML file, checks every constraint and builds the backend
    /// connections it declares.
    Validate {
        /// Path to the configuration file
        config: PathBuf,

        /// Output results as JSON
        #[arg(long)]
        json: bool,
    },

    /// Route a message to the best backend
    ///
    /// Analyzes the message, ranks the catalogue and dispatches through the
    /// fallback chain. With --dry-run only the decision is shown.
    Route(route::RouteArgs),

    /// Show per-backend usage, limits and circuit state
    Stats {
        /// Path to the configuration file
        config: PathBuf,

        /// Output results as JSON
        #[arg(long)]
        json: bool,
    },

    /// Probe every configured backend
    Health {
        /// Path to the configuration file
        config: PathBuf,

        /// Per-backend probe timeout in seconds
        #[arg(long, default_value = "5")]
        timeout: u64,

        /// Output results as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let level = match args.log_level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "error" => Level::ERROR,
        _ => Level::WARN,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .without_time()
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let Some(command) = args.command else {
        Args::command().print_help()?;
        return Ok(());
    };

    match command {
        Command::Validate { config, json } => validate::execute(&config, json),
        Command::Route(route_args) => route::execute(route_args).await,
        Command::Stats { config, json } => stats::execute(&config, json),
        Command::Health { config, timeout, json } => health::execute(&config, timeout, json).await,
    }
}
