//! Cadence CLI, the main entry point.
//!
//! Commands:
//! - `run`       Start a channel and the exchange engine
//! - `index`     Reindex the reference library
//! - `search`    Query the reference library
//! - `calendar`  Show the daily chapter assignment for a month
//! - `config`    Show, validate or initialize configuration

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(
    name = "cadence",
    about = "Cadence: a persona that answers in its own time",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (defaults to ~/.cadence/config.toml)
    #[arg(short, long, global = true, env = "CADENCE_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Only log warnings and errors
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a channel and answer messages until it closes
    Run {
        /// Override the configured channel ("cli" or "telegram")
        #[arg(long)]
        channel: Option<String>,
    },

    /// Reindex the reference library
    Index {
        /// Rewrite every source even if unchanged
        #[arg(short, long)]
        force: bool,
    },

    /// Search the reference library
    Search {
        query: String,

        /// Number of hits
        #[arg(short, long, default_value_t = 5)]
        k: usize,
    },

    /// Show the chapter assigned to each day of a month
    Calendar {
        #[arg(long)]
        year: Option<i32>,

        #[arg(long, value_parser = clap::value_parser!(u32).range(1..=12))]
        month: Option<u32>,
    },

    /// Show, validate or initialize configuration
    Config {
        /// Print the effective configuration
        #[arg(long, conflicts_with = "init")]
        show: bool,

        /// Write a default config file if none exists
        #[arg(long)]
        init: bool,
    },
}

fn init_tracing(cli: &Cli) {
    let level = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "warn"
    } else {
        "info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    // Logs go to stderr so the CLI channel owns stdout.
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    if cli.log_json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_tracing(&cli);

    let path = cli.config.as_deref();
    match cli.command {
        Commands::Config { show, init } => commands::config_cmd::run(path, show, init).await?,
        Commands::Run { channel } => {
            let mut config = commands::load_config(path)?;
            if let Some(kind) = channel {
                config.channel.kind = kind;
            }
            commands::run::run(config).await?
        }
        Commands::Index { force } => commands::index::run(commands::load_config(path)?, force).await?,
        Commands::Search { query, k } => {
            commands::search::run(commands::load_config(path)?, &query, k).await?
        }
        Commands::Calendar { year, month } => {
            commands::calendar::run(commands::load_config(path)?, year, month).await?
        }
    }

    Ok(())
}
