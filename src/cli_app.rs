//! CLI surface: argument parsing and command dispatch.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use source_index_watcher::core::config::Config;
use source_index_watcher::core::errors::{Result, SiwError};
use source_index_watcher::daemon::runner::WatcherWorker;

/// Source index watcher: discovers projects in watched directories and
/// queues file changes in the analysis catalog.
#[derive(Debug, Parser)]
#[command(name = "siw", version, about, long_about = None)]
pub struct Cli {
    /// Path to the configuration file.
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the worker until SIGTERM/SIGINT; prints final statistics as JSON.
    Watch,
    /// Run exactly one scan cycle and exit.
    Scan,
    /// Print the effective configuration as TOML.
    Config,
}

/// Dispatch a parsed command line.
pub fn run(cli: &Cli) -> Result<()> {
    let config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Command::Watch => {
            require_watch_dirs(&config)?;
            let worker = WatcherWorker::init(config)?;
            let stats = worker.run();
            println!("{}", serde_json::to_string_pretty(&stats)?);
            Ok(())
        }
        Command::Scan => {
            require_watch_dirs(&config)?;
            let mut worker = WatcherWorker::init(config)?;
            let result = worker.run_once();
            worker.finish();
            let stats = result?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
            Ok(())
        }
        Command::Config => {
            let rendered = toml::to_string_pretty(&config).map_err(|err| SiwError::Serialization {
                context: "toml",
                details: err.to_string(),
            })?;
            print!("{rendered}");
            Ok(())
        }
    }
}

fn require_watch_dirs(config: &Config) -> Result<()> {
    if config.watcher.watch_dirs.is_empty() {
        return Err(SiwError::InvalidConfig {
            details: "watcher.watch_dirs is empty; nothing to observe".to_string(),
        });
    }
    Ok(())
}
