pub mod config;
pub mod once;
pub mod query;
pub mod run;

use std::sync::Arc;

use color_eyre::eyre::{Result, WrapErr};
use serde::Serialize;
use tokio::runtime::Runtime;
use tracing::debug;

use crate::config::UserConfig;
use crate::data::{SqliteSource, UsageCoordinator};

fn build_runtime() -> Result<Runtime> {
    Ok(tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?)
}

fn open_coordinator(config: &UserConfig) -> Result<UsageCoordinator> {
    let database = &config.source.database;
    let source = SqliteSource::open(database)
        .wrap_err_with(|| format!("Failed to open sample database {}", database.display()))?;

    debug!(
        database = ?source.path(),
        power_items = config.power.len(),
        tankage_items = config.tankage.len(),
        groups = config.groups.len(),
        "Coordinator ready"
    );
    Ok(UsageCoordinator::new(Arc::new(source), config))
}

fn print_json<T: Serialize>(value: &T, compact: bool) -> Result<()> {
    if compact {
        println!("{}", serde_json::to_string(value)?);
    } else {
        println!("{}", serde_json::to_string_pretty(value)?);
    }
    Ok(())
}
