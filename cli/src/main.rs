mod cli;
mod commands;
mod config;
mod data;
mod logging;
mod publisher;

use clap::Parser;
use color_eyre::eyre::Result;
use tracing::warn;

use cli::{Cli, Commands};
use config::{config_path, ensure_dirs, LogLevel, UserConfig};
use logging::LogMode;

fn main() -> Result<()> {
    color_eyre::install()?;
    let _ = ensure_dirs();

    let cli = Cli::parse();
    let (config, load_error) = match UserConfig::load() {
        Ok(config) => (config, None),
        Err(e) => (UserConfig::default(), Some(e)),
    };
    let log_level_override = cli.log_level.as_deref().map(LogLevel::from_str);

    // stdout carries deltas when emitting, so logs go to file as well as stderr.
    let mode = match cli.command {
        Commands::Run { emit: true, .. } => LogMode::Both,
        _ => LogMode::Stderr,
    };
    let _guard = logging::init(config.log_level, mode, log_level_override);

    if let Some(e) = load_error {
        warn!(path = ?config_path(), error = %e, "Falling back to default config");
    }

    match cli.command {
        Commands::Run {
            interval_secs,
            emit,
        } => commands::run::run(config, interval_secs, emit),
        Commands::Once {
            item,
            group,
            compact,
        } => commands::once::run(config, item.as_deref(), group.as_deref(), compact),
        Commands::Query {
            path,
            from,
            to,
            aggregation,
            compact,
        } => commands::query::run(
            config,
            &path,
            &from,
            to.as_deref(),
            aggregation.as_deref(),
            compact,
        ),
        Commands::Config { path, reset, check } => commands::config::run(path, reset, check),
    }
}
