use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};

use color_eyre::eyre::Result;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::config::UserConfig;
use crate::data::PassOutcome;
use crate::publisher::DeltaPublisher;

pub fn run(config: UserConfig, interval_secs: Option<u64>, emit: bool) -> Result<()> {
    let runtime = super::build_runtime()?;
    runtime.block_on(run_async(config, interval_secs, emit))
}

async fn run_async(
    config: UserConfig,
    interval_secs: Option<u64>,
    emit: bool,
) -> Result<()> {
    let coordinator = Arc::new(super::open_coordinator(&config)?);
    let interval_secs = interval_secs.unwrap_or(config.engine.interval_secs).max(1);
    let mut publisher =
        emit.then(|| DeltaPublisher::new(Duration::from_millis(config.publish.min_interval_ms)));

    info!(
        version = env!("CARGO_PKG_VERSION"),
        interval_secs,
        emit,
        "Usage watcher starting"
    );

    let mut pass_tick = tokio::time::interval(Duration::from_secs(interval_secs));
    pass_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    let (done_tx, mut done_rx) = mpsc::channel::<PassOutcome>(8);

    loop {
        tokio::select! {
            _ = pass_tick.tick() => {
                if coordinator.is_running() {
                    debug!("Pass still in flight, not spawning another");
                    continue;
                }
                let coordinator = Arc::clone(&coordinator);
                let done_tx = done_tx.clone();
                tokio::spawn(async move {
                    let outcome = coordinator.calculate_all().await;
                    let _ = done_tx.send(outcome).await;
                });
            }
            Some(outcome) = done_rx.recv() => {
                match outcome {
                    PassOutcome::Skipped => {
                        warn!("Previous pass still running, tick dropped");
                    }
                    PassOutcome::Completed { power, tankage } => {
                        debug!(
                            power = power.computed,
                            tankage = tankage.computed,
                            "Pass finished"
                        );
                        if let Some(publisher) = publisher.as_mut() {
                            let snapshot = coordinator.get_usage_data();
                            if let Err(e) = publisher.publish(&snapshot, Instant::now(), &mut io::stdout()) {
                                error!(error = %e, "Failed to write usage delta");
                            }
                        }
                    }
                }
            }
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    error!(error = %e, "Failed to listen for shutdown signal");
                }
                info!("Shutdown requested");
                break;
            }
        }
    }

    coordinator.stop();
    info!("Usage watcher stopped");
    Ok(())
}
