//! Volume usage for tank level and volume measurement points.
//!
//! Levels are noisy: sloshing, heel and sensor jitter all look like small
//! rises and falls. Every fall counts as consumption, but a rise only counts
//! as an addition once it is large enough and slow enough to be a real fill.
//! Big refill steps are kept out of the smoothing average so they survive
//! intact.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};
use usagewatch_protocol::{ItemUsage, PeriodResult, Sample, TankagePeriod, TankageTotals};

use crate::config::{PeriodConfig, TankageItemConfig};
use crate::data::cache::UsageCache;
use crate::data::pass::{fan_out, unique_paths, EngineLimits, PassSummary};
use crate::data::period;
use crate::data::query::{FirstLast, QueryError, QueryPort, TimeRange};

pub const M3_PER_GALLON: f64 = 0.003_785_41;

/// Smallest rise counted as an addition.
pub const MIN_ADDITION_M3: f64 = M3_PER_GALLON;
pub const MIN_ADDITION_LARGE_M3: f64 = 5.0 * M3_PER_GALLON;
/// A single-step rise at least this big is a refill and is never smoothed.
pub const REFILL_STEP_M3: f64 = 10.0 * M3_PER_GALLON;

const MIN_SPACING_MS: i64 = 2 * 60 * 1000;
const MIN_ADDITION_ELAPSED_MS: i64 = 5 * 60 * 1000;
const SMOOTHING_WINDOW_MS: i64 = 6 * 60 * 60 * 1000;
const MIN_COVERAGE: f64 = 0.7;

pub const UNIT_RATIO: &str = "ratio";
pub const UNIT_M3: &str = "m3";
pub const UNIT_UNKNOWN: &str = "unknown";

pub fn unit_for(item: &TankageItemConfig) -> String {
    if let Some(unit) = &item.unit {
        return unit.clone();
    }

    let unit = if item.path.contains("currentLevel") {
        UNIT_RATIO
    } else if item.path.contains("remaining") || item.path.contains("currentVolume") {
        UNIT_M3
    } else {
        UNIT_UNKNOWN
    };
    unit.to_string()
}

/// Factor that converts raw readings to reported units. Ratio readings with
/// a known capacity become m³.
fn scale_for(item: &TankageItemConfig) -> (f64, String) {
    let unit = unit_for(item);
    match item.capacity {
        Some(capacity) if unit == UNIT_RATIO => (capacity, UNIT_M3.to_string()),
        _ => (1.0, unit),
    }
}

pub fn normalize_samples(item: &TankageItemConfig, samples: &[Sample]) -> Vec<Sample> {
    let (factor, _) = scale_for(item);
    samples
        .iter()
        .map(|s| Sample::new(s.timestamp, s.value * factor))
        .collect()
}

/// Trailing six-hour mean, restarted at every refill step. Refill samples
/// keep their raw value.
pub fn smooth(samples: &[Sample]) -> Vec<Sample> {
    let mut smoothed = Vec::with_capacity(samples.len());
    let mut window_start = 0;
    let mut sum = 0.0;

    for (i, sample) in samples.iter().enumerate() {
        let is_refill = i > 0 && sample.value - samples[i - 1].value >= REFILL_STEP_M3;
        if is_refill {
            window_start = i;
            sum = 0.0;
        }

        sum += sample.value;
        while sample.millis_since(&samples[window_start]) > SMOOTHING_WINDOW_MS {
            sum -= samples[window_start].value;
            window_start += 1;
        }

        let value = if is_refill {
            sample.value
        } else {
            sum / (i - window_start + 1) as f64
        };
        smoothed.push(Sample::new(sample.timestamp, value));
    }

    smoothed
}

/// Walk the series tracking the last evaluated point. Samples closer than
/// two minutes to it are skipped without moving it.
pub fn detect_changes(samples: &[Sample], large: bool) -> TankageTotals {
    let min_addition = if large {
        MIN_ADDITION_LARGE_M3
    } else {
        MIN_ADDITION_M3
    };
    let mut totals = TankageTotals::default();

    let Some((first, rest)) = samples.split_first() else {
        return totals;
    };
    let mut tracked = *first;

    for sample in rest {
        let elapsed_ms = sample.millis_since(&tracked);
        if elapsed_ms < MIN_SPACING_MS {
            continue;
        }

        let delta = sample.value - tracked.value;
        if delta < 0.0 {
            totals.consumed += -delta;
        } else if delta >= min_addition && elapsed_ms >= MIN_ADDITION_ELAPSED_MS {
            totals.added += delta;
        }

        tracked = *sample;
    }

    totals
}

/// Fraction of `range` spanned by the first and last sample.
pub fn coverage_ratio(first: &Sample, last: &Sample, range: Duration) -> f64 {
    let range_ms = range.as_millis() as f64;
    if range_ms <= 0.0 {
        return 0.0;
    }
    last.millis_since(first) as f64 / range_ms
}

pub fn tankage_period(
    label: &str,
    first: Sample,
    last: Sample,
    totals: TankageTotals,
) -> TankagePeriod {
    let hours = last.millis_since(&first) as f64 / 3_600_000.0;
    let rate = |amount: f64| if hours > 0.0 { amount / hours } else { 0.0 };

    TankagePeriod {
        period: label.to_string(),
        start_time: first.timestamp,
        end_time: last.timestamp,
        start_value: first.value,
        end_value: last.value,
        delta: last.value - first.value,
        consumed: totals.consumed,
        added: totals.added,
        consumption_rate: rate(totals.consumed),
        addition_rate: rate(totals.added),
    }
}

/// Raw first/last when the backend has them, else the sequence endpoints.
fn endpoints(first_last: &FirstLast, samples: &[Sample]) -> Option<(Sample, Sample)> {
    first_last
        .both()
        .or_else(|| Some((*samples.first()?, *samples.last()?)))
}

fn item_path(item: &TankageItemConfig) -> &str {
    &item.path
}

pub struct TankageUsageEngine {
    port: Arc<dyn QueryPort>,
    items: Vec<TankageItemConfig>,
    limits: EngineLimits,
    smoothing: bool,
    cache: UsageCache,
}

impl TankageUsageEngine {
    pub fn new(
        port: Arc<dyn QueryPort>,
        items: Vec<TankageItemConfig>,
        limits: EngineLimits,
        smoothing: bool,
    ) -> Self {
        Self {
            port,
            items: unique_paths("tankage", items, item_path),
            limits,
            smoothing,
            cache: UsageCache::new(),
        }
    }

    pub fn find_item(&self, path: &str) -> Option<&TankageItemConfig> {
        self.items.iter().find(|item| item.path == path)
    }

    pub async fn calculate_all(&self) -> PassSummary {
        let started = Instant::now();
        let enabled: Vec<_> = self.items.iter().filter(|item| item.enabled).collect();

        let summary = fan_out("tankage", enabled, self.limits, item_path, |item| {
            self.calculate_for_item(item)
        })
        .await;

        info!(
            computed = summary.computed,
            timed_out = summary.timed_out,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Tankage usage pass complete"
        );
        summary
    }

    pub async fn calculate_for_item(&self, item: &TankageItemConfig) -> ItemUsage {
        let end = Utc::now();
        let (_, unit) = scale_for(item);

        let mut periods = BTreeMap::new();
        for period in item.effective_periods() {
            let result = self.calculate_usage_for_period(item, &period, end).await;
            periods.insert(period.range.clone(), result);
        }

        let usage = ItemUsage {
            path: item.path.clone(),
            name: item.display_name().to_string(),
            unit,
            capacity: item.capacity,
            periods,
        };
        self.cache.insert(usage.clone(), Utc::now());

        debug!(path = %item.path, unit = %usage.unit, "Tankage usage updated");
        usage
    }

    pub async fn calculate_usage_for_period(
        &self,
        item: &TankageItemConfig,
        period: &PeriodConfig,
        end: DateTime<Utc>,
    ) -> PeriodResult {
        let (range_len, window) = match (
            period::parse_descriptor(&period.range),
            period::parse_descriptor(&period.aggregation),
        ) {
            (Ok(range), Ok(window)) => (range, window),
            (Err(e), _) | (_, Err(e)) => {
                warn!(path = %item.path, period = %period.range, error = %e, "Invalid period");
                return PeriodResult::insufficient(e.to_string());
            }
        };

        let range = TimeRange::trailing(end, range_len);
        match self
            .compute_period(item, &period.range, &range, range_len, window)
            .await
        {
            Ok(result) => result,
            Err(e) => {
                warn!(path = %item.path, period = %period.range, error = %e, "Tankage query failed");
                PeriodResult::insufficient(format!("Query failed: {e}"))
            }
        }
    }

    async fn compute_period(
        &self,
        item: &TankageItemConfig,
        label: &str,
        range: &TimeRange,
        range_len: Duration,
        window: Duration,
    ) -> Result<PeriodResult, QueryError> {
        let first_last = self.port.query_first_last(&item.path, range).await?;
        let samples = self.port.query_aggregated(&item.path, range, window).await?;

        if samples.len() < 2 {
            return Ok(PeriodResult::insufficient("Insufficient data points"));
        }
        let Some((first, last)) = endpoints(&first_last, &samples) else {
            return Ok(PeriodResult::insufficient("No data available for this period"));
        };

        let coverage = coverage_ratio(&first, &last, range_len);
        if coverage < MIN_COVERAGE {
            let reason = format!("Insufficient coverage: {:.0}%", coverage * 100.0);
            debug!(path = %item.path, period = label, %reason, "Skipping period");
            return Ok(PeriodResult::insufficient(reason));
        }

        let samples = normalize_samples(item, &samples);
        let totals = self.calculate_tankage_from_data(&samples, item.large);

        let (factor, _) = scale_for(item);
        let first = Sample::new(first.timestamp, first.value * factor);
        let last = Sample::new(last.timestamp, last.value * factor);

        Ok(PeriodResult::Tankage(tankage_period(label, first, last, totals)))
    }

    /// Smoothing (when enabled) and change detection over an already
    /// normalized series.
    pub fn calculate_tankage_from_data(&self, samples: &[Sample], large: bool) -> TankageTotals {
        if self.smoothing {
            detect_changes(&smooth(samples), large)
        } else {
            detect_changes(samples, large)
        }
    }

    pub fn get_usage_data(&self) -> BTreeMap<String, ItemUsage> {
        self.cache.snapshot()
    }

    pub fn get_usage_for_path(&self, path: &str) -> Option<ItemUsage> {
        self.cache.get(path)
    }

    pub fn cached_at(&self, path: &str) -> Option<DateTime<Utc>> {
        self.cache.computed_at(path)
    }

    pub fn stop(&self) {
        self.cache.clear();
        debug!("Tankage usage cache cleared");
    }
}
