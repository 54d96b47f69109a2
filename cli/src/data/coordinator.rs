//! Runs both engines as one pass and serves the merged result.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use tracing::{debug, info};
use usagewatch_protocol::{
    Domain, Energy, GroupPeriodTotal, GroupTotals, GroupUsage, ItemUsage, PeriodResult,
    TankageTotals, UsageSnapshot,
};

use crate::config::{GroupConfig, PowerItemConfig, TankageItemConfig, UserConfig};
use crate::data::pass::{EngineLimits, PassSummary};
use crate::data::power::{self, PowerUsageEngine};
use crate::data::query::{QueryError, QueryPort, TimeRange};
use crate::data::tankage::{self, TankageUsageEngine};

const CUSTOM_LABEL: &str = "custom";

#[derive(Debug, thiserror::Error)]
pub enum UsageError {
    #[error("No configured item for path {0}")]
    UnknownPath(String),

    #[error("Invalid range: end must be after start")]
    InvalidRange,

    #[error(transparent)]
    Query(#[from] QueryError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassOutcome {
    Completed {
        power: PassSummary,
        tankage: PassSummary,
    },
    /// Another pass was already running.
    Skipped,
}

#[derive(Debug, Clone, Copy)]
pub enum ConfiguredItem<'a> {
    Power(&'a PowerItemConfig),
    Tankage(&'a TankageItemConfig),
}

impl<'a> ConfiguredItem<'a> {
    pub fn domain(&self) -> Domain {
        match self {
            ConfiguredItem::Power(_) => Domain::Power,
            ConfiguredItem::Tankage(_) => Domain::Tankage,
        }
    }

    pub fn path(&self) -> &'a str {
        match *self {
            ConfiguredItem::Power(item) => &item.path,
            ConfiguredItem::Tankage(item) => &item.path,
        }
    }

    pub fn enabled(&self) -> bool {
        match self {
            ConfiguredItem::Power(item) => item.enabled,
            ConfiguredItem::Tankage(item) => item.enabled,
        }
    }
}

/// Default aggregation window for an ad-hoc range of `elapsed` length.
pub fn calculate_aggregation(elapsed: Duration) -> Duration {
    const MINUTE: u64 = 60;
    const HOUR: u64 = 60 * MINUTE;
    const DAY: u64 = 24 * HOUR;

    let secs = elapsed.as_secs();
    let window = if secs <= HOUR {
        MINUTE
    } else if secs <= 6 * HOUR {
        5 * MINUTE
    } else if secs <= DAY {
        15 * MINUTE
    } else if secs <= 7 * DAY {
        HOUR
    } else if secs <= 30 * DAY {
        4 * HOUR
    } else {
        12 * HOUR
    };
    Duration::from_secs(window)
}

/// Clears the in-progress flag when the pass ends, however it ends.
struct PassGuard<'a>(&'a AtomicBool);

impl<'a> PassGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for PassGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct UsageCoordinator {
    port: Arc<dyn QueryPort>,
    power: PowerUsageEngine,
    tankage: TankageUsageEngine,
    groups: Vec<GroupConfig>,
    group_cache: DashMap<String, GroupUsage>,
    running: AtomicBool,
    ready: AtomicBool,
    last_completed: RwLock<Option<DateTime<Utc>>>,
}

impl UsageCoordinator {
    pub fn new(port: Arc<dyn QueryPort>, config: &UserConfig) -> Self {
        let limits = EngineLimits::from_config(&config.engine);

        Self {
            power: PowerUsageEngine::new(Arc::clone(&port), config.power.clone(), limits),
            tankage: TankageUsageEngine::new(
                Arc::clone(&port),
                config.tankage.clone(),
                limits,
                config.engine.tankage_smoothing,
            ),
            port,
            groups: config.groups.clone(),
            group_cache: DashMap::new(),
            running: AtomicBool::new(false),
            ready: AtomicBool::new(false),
            last_completed: RwLock::new(None),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn last_completed(&self) -> Option<DateTime<Utc>> {
        *self.last_completed.read()
    }

    /// One pass over both engines. Returns immediately with
    /// [`PassOutcome::Skipped`] if a pass is already in flight.
    pub async fn calculate_all(&self) -> PassOutcome {
        let Some(_guard) = PassGuard::acquire(&self.running) else {
            debug!("Usage pass already running, skipping");
            return PassOutcome::Skipped;
        };

        let started = Instant::now();
        let (power, tankage) = tokio::join!(self.power.calculate_all(), self.tankage.calculate_all());

        self.refresh_groups();
        *self.last_completed.write() = Some(Utc::now());
        self.ready.store(true, Ordering::Release);

        info!(
            power_items = power.computed,
            tankage_items = tankage.computed,
            timed_out = power.timed_out + tankage.timed_out,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Usage pass complete"
        );

        PassOutcome::Completed { power, tankage }
    }

    pub fn get_usage_data(&self) -> UsageSnapshot {
        if !self.is_ready() {
            return UsageSnapshot::not_ready(Utc::now());
        }

        let mut items = self.tankage.get_usage_data();
        // Power wins on a path configured in both domains, as in lookups.
        items.extend(self.power.get_usage_data());

        let groups = (!self.groups.is_empty()).then(|| {
            self.group_cache
                .iter()
                .map(|entry| (entry.key().clone(), entry.value().clone()))
                .collect::<BTreeMap<_, _>>()
        });

        UsageSnapshot {
            timestamp: self.last_completed().unwrap_or_else(Utc::now),
            ready: true,
            items,
            groups,
        }
    }

    pub fn get_usage_for_path(&self, path: &str) -> Option<ItemUsage> {
        self.power
            .get_usage_for_path(path)
            .or_else(|| self.tankage.get_usage_for_path(path))
    }

    /// When the cached result for `path` was computed.
    pub fn computed_at(&self, path: &str) -> Option<DateTime<Utc>> {
        self.power
            .cached_at(path)
            .or_else(|| self.tankage.cached_at(path))
    }

    pub fn get_group(&self, id: &str) -> Option<GroupUsage> {
        self.group_cache.get(id).map(|entry| entry.value().clone())
    }

    pub fn find_item_config(&self, path: &str) -> Option<ConfiguredItem<'_>> {
        self.power
            .find_item(path)
            .map(ConfiguredItem::Power)
            .or_else(|| self.tankage.find_item(path).map(ConfiguredItem::Tankage))
    }

    /// Usage for one configured item over an arbitrary range, bypassing the
    /// caches.
    pub async fn calculate_custom_range(
        &self,
        path: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        aggregation: Option<Duration>,
    ) -> Result<PeriodResult, UsageError> {
        let item = self
            .find_item_config(path)
            .ok_or_else(|| UsageError::UnknownPath(path.to_string()))?;
        let elapsed = (end - start).to_std().map_err(|_| UsageError::InvalidRange)?;
        if elapsed.is_zero() {
            return Err(UsageError::InvalidRange);
        }

        let window = aggregation.unwrap_or_else(|| calculate_aggregation(elapsed));
        let range = TimeRange::new(start, end);
        debug!(path, window_secs = window.as_secs(), "Custom range query");

        let samples = self.port.query_aggregated(path, &range, window).await?;
        let (Some(first), Some(last)) = (samples.first().copied(), samples.last().copied()) else {
            return Ok(PeriodResult::insufficient("No data available for this period"));
        };
        if samples.len() < 2 {
            return Ok(PeriodResult::insufficient("Insufficient data points"));
        }

        let result = match item {
            ConfiguredItem::Power(item) => {
                let directionality = power::resolve_directionality(item);
                let energy = self.power.calculate_energy_from_data(&samples, directionality);
                PeriodResult::Power(power::power_period(CUSTOM_LABEL, first, last, energy))
            }
            ConfiguredItem::Tankage(item) => {
                let samples = tankage::normalize_samples(item, &samples);
                let totals = self.tankage.calculate_tankage_from_data(&samples, item.large);
                let (first, last) = (samples[0], samples[samples.len() - 1]);
                PeriodResult::Tankage(tankage::tankage_period(CUSTOM_LABEL, first, last, totals))
            }
        };

        Ok(result)
    }

    fn refresh_groups(&self) {
        for group in &self.groups {
            let usage = self.group_usage(group);
            self.group_cache.insert(group.id.clone(), usage);
        }
    }

    fn group_usage(&self, group: &GroupConfig) -> GroupUsage {
        let mut periods: BTreeMap<String, GroupPeriodTotal> = BTreeMap::new();

        for path in &group.paths {
            let member = match group.domain {
                Domain::Power => self.power.get_usage_for_path(path),
                Domain::Tankage => self.tankage.get_usage_for_path(path),
            };
            let Some(member) = member else {
                continue;
            };

            for (range, result) in &member.periods {
                let total = periods
                    .entry(range.clone())
                    .or_insert_with(|| empty_total(group.domain));

                match (&mut total.totals, result) {
                    (GroupTotals::Power(sum), PeriodResult::Power(period)) => {
                        sum.consumed_wh += period.energy.consumed_wh;
                        sum.generated_wh += period.energy.generated_wh;
                        total.members += 1;
                    }
                    (GroupTotals::Tankage(sum), PeriodResult::Tankage(period)) => {
                        sum.consumed += period.consumed;
                        sum.added += period.added;
                        total.members += 1;
                    }
                    _ => {}
                }
            }
        }

        GroupUsage {
            id: group.id.clone(),
            name: group.display_name().to_string(),
            domain: group.domain,
            paths: group.paths.clone(),
            periods,
        }
    }

    /// Drop every cached result. The next completed pass makes the
    /// coordinator ready again.
    pub fn stop(&self) {
        self.power.stop();
        self.tankage.stop();
        self.group_cache.clear();
        self.ready.store(false, Ordering::Release);
        info!("Usage coordinator stopped");
    }
}

fn empty_total(domain: Domain) -> GroupPeriodTotal {
    GroupPeriodTotal {
        members: 0,
        totals: match domain {
            Domain::Power => GroupTotals::Power(Energy::default()),
            Domain::Tankage => GroupTotals::Tankage(TankageTotals::default()),
        },
    }
}
