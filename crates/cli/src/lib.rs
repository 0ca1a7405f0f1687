pub mod commands;

use clap::{Parser, Subcommand};
use kickoff_core::config::{AppConfig, LoadOptions, LogFormat};
use std::process::ExitCode;

use crate::commands::cache::CacheCommand;
use crate::commands::query::QueryArgs;

#[derive(Debug, Parser)]
#[command(
    name = "kickoff",
    about = "Kickoff football data CLI",
    long_about = "Plan and execute batched football data queries with shared caching, retries, and a circuit breaker.",
    after_help = "Examples:\n  kickoff plan --require head_to_head --param team_a_name=Arsenal --param team_b_name=Chelsea\n  kickoff fetch --require standings --param league=39 --param season=2024\n  kickoff doctor --json"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Show the leveled execution plan for a query without calling the provider")]
    Plan {
        #[command(flatten)]
        query: QueryArgs,
    },
    #[command(about = "Plan and execute a query, printing the structured result")]
    Fetch {
        #[command(flatten)]
        query: QueryArgs,
        #[arg(long, value_name = "SECS", help = "Fail the whole batch after this many seconds")]
        deadline_secs: Option<u64>,
    },
    #[command(about = "Manage the persistent response cache")]
    Cache {
        #[command(subcommand)]
        action: CacheCommand,
    },
    #[command(about = "Apply pending cache database migrations")]
    Migrate,
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Validate config, provider credentials, endpoint catalog, and cache backend")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
}

/// Logs go to stderr; stdout carries command output.
fn init_logging(config: &AppConfig) {
    use tracing::Level;

    let log_level = config.logging.level.parse::<Level>().unwrap_or(Level::INFO);
    let builder =
        tracing_subscriber::fmt().with_target(false).with_max_level(log_level).with_writer(std::io::stderr);

    let _ = match config.logging.format {
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    if let Ok(config) = AppConfig::load(LoadOptions::default()) {
        init_logging(&config);
    }

    let result = match cli.command {
        Command::Plan { query } => commands::plan::run(query),
        Command::Fetch { query, deadline_secs } => commands::fetch::run(query, deadline_secs),
        Command::Cache { action } => commands::cache::run(action),
        Command::Migrate => commands::migrate::run(),
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::Doctor { json } => {
            commands::CommandResult { exit_code: 0, output: commands::doctor::run(json) }
        }
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
