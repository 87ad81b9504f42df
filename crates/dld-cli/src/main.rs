//! dld - stage Linked Data dumps for a dockerized triple store
//!
//! Reads `dld.yml`, copies or downloads the declared datasets into the
//! loader's import directory and prunes whatever is no longer configured.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use dld_import::StageError;

mod cmd;
mod config;

use config::Config;

/// Conventional exit status after SIGINT
const EXIT_INTERRUPTED: i32 = 130;

#[derive(Parser)]
#[command(name = "dld")]
#[command(about = "Stage Linked Data dumps into a triple store's import directory")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    /// Tool settings file (default: ./dld.toml or ~/.config/dld/config.toml)
    #[arg(long, global = true)]
    config_file: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Copy/download configured datasets and prune the import directory
    Stage(cmd::stage::StageArgs),
    /// Show the staged payloads and their target graphs
    Status(cmd::status::StatusArgs),
    /// Show current tool settings
    Config,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let progress = dld_core::ProgressContext::new();

    // TTY: log lines are printed above the transfer bars
    let multi = if progress.is_tty() {
        Some(progress.multi())
    } else {
        None
    };
    dld_core::init_logging(cli.debug, multi);

    dld_core::install_signal_handlers().context("Failed to install signal handlers")?;

    let config = if let Some(path) = &cli.config_file {
        Config::from_file(path)?
    } else {
        Config::load()?
    };
    dld_core::set_http_config(config.http.to_http_config());

    let result = match cli.command {
        Command::Stage(args) => cmd::stage::run(args, &config, &progress),
        Command::Status(args) => cmd::status::run(args),
        Command::Config => {
            print_config(&config);
            Ok(())
        }
    };

    if let Err(e) = &result {
        if is_interrupted(e) {
            log::warn!("interrupted, import directory left unreconciled");
            std::process::exit(EXIT_INTERRUPTED);
        }
    }
    result
}

fn is_interrupted(e: &anyhow::Error) -> bool {
    matches!(e.downcast_ref::<StageError>(), Some(StageError::Interrupted))
        || dld_core::is_shutdown_requested()
}

fn print_config(config: &Config) {
    let mut table = cmd::table(&["Setting", "Value"]);
    table.add_row(vec![
        "Workers",
        &format!("{} (max: {})", config.workers.default, config.workers.max),
    ]);
    table.add_row(vec!["HEAD timeout", &format!("{}s", config.http.head_timeout)]);
    table.add_row(vec!["Read timeout", &format!("{}s", config.http.read_timeout)]);
    table.add_row(vec![
        "Connect timeout",
        &format!("{}s", config.http.connect_timeout),
    ]);
    table.add_row(vec![
        "Max downloads",
        &config.http.max_downloads.to_string(),
    ]);

    eprintln!("\n{table}");
}
