use chrono::{DateTime, Utc};
use color_eyre::eyre::{eyre, Result};
use serde::Serialize;
use usagewatch_protocol::{Domain, ItemUsage};

use crate::config::UserConfig;
use crate::data::{PassOutcome, UsageCoordinator};

/// One item as seen by the coordinator after a pass.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ItemReport<'a> {
    path: &'a str,
    domain: Domain,
    enabled: bool,
    computed_at: Option<DateTime<Utc>>,
    usage: Option<ItemUsage>,
}

pub fn run(
    config: UserConfig,
    item: Option<&str>,
    group: Option<&str>,
    compact: bool,
) -> Result<()> {
    let runtime = super::build_runtime()?;

    runtime.block_on(async {
        let coordinator = super::open_coordinator(&config)?;

        if let PassOutcome::Completed { power, tankage } = coordinator.calculate_all().await {
            if power.timed_out + tankage.timed_out > 0 {
                eprintln!(
                    "Warning: {} item(s) timed out and are missing from the snapshot",
                    power.timed_out + tankage.timed_out
                );
            }
        }

        match (item, group) {
            (Some(path), _) => super::print_json(&item_report(&coordinator, path)?, compact),
            (None, Some(id)) => {
                let usage = coordinator
                    .get_group(id)
                    .ok_or_else(|| eyre!("No configured group named {id}"))?;
                super::print_json(&usage, compact)
            }
            (None, None) => super::print_json(&coordinator.get_usage_data(), compact),
        }
    })
}

fn item_report<'a>(coordinator: &'a UsageCoordinator, path: &str) -> Result<ItemReport<'a>> {
    let configured = coordinator
        .find_item_config(path)
        .ok_or_else(|| eyre!("No configured item for path {path}"))?;

    Ok(ItemReport {
        path: configured.path(),
        domain: configured.domain(),
        enabled: configured.enabled(),
        computed_at: coordinator.computed_at(path),
        usage: coordinator.get_usage_for_path(path),
    })
}
