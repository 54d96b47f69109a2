//! Energy usage for power measurement points.
//!
//! Each period integrates the mean-aggregated power series with the
//! trapezoidal rule, holding the last value across gaps, and then splits the
//! signed result into consumed and generated energy by directionality.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};
use usagewatch_protocol::{
    Directionality, Energy, ItemUsage, PeriodResult, PowerPeriod, Sample,
};

use crate::config::{PeriodConfig, PowerItemConfig};
use crate::data::cache::UsageCache;
use crate::data::pass::{fan_out, unique_paths, EngineLimits, PassSummary};
use crate::data::period;
use crate::data::query::{QueryError, QueryPort, TimeRange};

const MS_PER_HOUR: f64 = 3_600_000.0;
const HOUR_SECS: u64 = 3600;
const DAY_SECS: u64 = 86_400;

/// One row of the path-based directionality table.
#[derive(Debug, Clone, Copy)]
pub struct DirectionalityRule {
    pub any_of: &'static [&'static str],
    pub none_of: &'static [&'static str],
    pub directionality: Directionality,
}

impl DirectionalityRule {
    fn matches(&self, lowercase_path: &str) -> bool {
        self.any_of.iter().any(|k| lowercase_path.contains(k))
            && !self.none_of.iter().any(|k| lowercase_path.contains(k))
    }
}

/// Evaluated top to bottom, first match wins. No match means
/// [`Directionality::BidirectionalNormal`].
pub const DIRECTIONALITY_RULES: &[DirectionalityRule] = &[
    DirectionalityRule {
        any_of: &["solar", "panel", "alternator"],
        none_of: &[],
        directionality: Directionality::Producer,
    },
    DirectionalityRule {
        any_of: &["acin", "shore"],
        none_of: &[],
        directionality: Directionality::Consumer,
    },
    DirectionalityRule {
        any_of: &["battery"],
        none_of: &["acout"],
        directionality: Directionality::BidirectionalReversed,
    },
];

pub fn detect_directionality(path: &str) -> Directionality {
    let path = path.to_lowercase();
    DIRECTIONALITY_RULES
        .iter()
        .find(|rule| rule.matches(&path))
        .map(|rule| rule.directionality)
        .unwrap_or(Directionality::BidirectionalNormal)
}

/// Configured directionality, or the detected one when absent or unrecognized.
pub fn resolve_directionality(item: &PowerItemConfig) -> Directionality {
    match item.directionality.as_deref() {
        None => detect_directionality(&item.path),
        Some(value) => Directionality::parse(value).unwrap_or_else(|| {
            let detected = detect_directionality(&item.path);
            warn!(
                path = %item.path,
                configured = value,
                detected = detected.as_str(),
                "Unknown directionality, using auto-detection"
            );
            detected
        }),
    }
}

/// Signed integration result before directionality is applied.
/// Both buckets hold magnitudes.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct EnergyBuckets {
    pub positive_wh: f64,
    pub negative_wh: f64,
}

/// Trapezoidal integration over consecutive pairs.
///
/// With a `gap_threshold`, pairs further apart than the threshold contribute
/// the earlier value times the elapsed time instead. Producers and consumers
/// drop pairs whose average is negative.
pub fn integrate(
    samples: &[Sample],
    directionality: Directionality,
    gap_threshold: Option<Duration>,
) -> EnergyBuckets {
    let drop_negative = matches!(
        directionality,
        Directionality::Producer | Directionality::Consumer
    );
    let gap_ms = gap_threshold.map(|t| t.as_millis() as i64);
    let mut buckets = EnergyBuckets::default();

    for pair in samples.windows(2) {
        let (earlier, later) = (&pair[0], &pair[1]);
        let elapsed_ms = later.millis_since(earlier);
        if elapsed_ms <= 0 {
            continue;
        }

        let average = (earlier.value + later.value) / 2.0;
        if drop_negative && average < 0.0 {
            continue;
        }

        let hours = elapsed_ms as f64 / MS_PER_HOUR;
        let wh = match gap_ms {
            Some(gap) if elapsed_ms > gap => earlier.value * hours,
            _ => average * hours,
        };

        if wh >= 0.0 {
            buckets.positive_wh += wh;
        } else {
            buckets.negative_wh += -wh;
        }
    }

    buckets
}

pub fn apply_directionality(directionality: Directionality, buckets: EnergyBuckets) -> Energy {
    let EnergyBuckets {
        positive_wh,
        negative_wh,
    } = buckets;

    match directionality {
        Directionality::Producer => {
            if negative_wh > 0.0 {
                debug!(negative_wh, "Discarding negative energy for producer");
            }
            Energy {
                consumed_wh: 0.0,
                generated_wh: positive_wh,
            }
        }
        Directionality::Consumer => {
            if negative_wh > 0.0 {
                debug!(negative_wh, "Discarding negative energy for consumer");
            }
            Energy {
                consumed_wh: positive_wh,
                generated_wh: 0.0,
            }
        }
        Directionality::BidirectionalNormal => Energy {
            consumed_wh: negative_wh,
            generated_wh: positive_wh,
        },
        Directionality::BidirectionalReversed => Energy {
            consumed_wh: positive_wh,
            generated_wh: negative_wh,
        },
    }
}

/// `None` when every expected calendar bucket has at least one sample,
/// otherwise the reason to report. Ranges up to a day are checked per UTC
/// hour, longer ranges per UTC day.
pub fn coverage_shortfall(samples: &[Sample], range: Duration) -> Option<String> {
    let (bucket_secs, unit) = if range.as_secs() <= DAY_SECS {
        (HOUR_SECS, "hours")
    } else {
        (DAY_SECS, "days")
    };

    let covered: HashSet<i64> = samples
        .iter()
        .map(|s| s.timestamp.timestamp().div_euclid(bucket_secs as i64))
        .collect();
    let expected = range.as_secs().div_ceil(bucket_secs) as usize;

    (covered.len() < expected)
        .then(|| format!("Insufficient coverage: {}/{} {}", covered.len(), expected, unit))
}

pub fn power_period(label: &str, first: Sample, last: Sample, energy: Energy) -> PowerPeriod {
    PowerPeriod {
        period: label.to_string(),
        start_time: first.timestamp,
        end_time: last.timestamp,
        start_value: first.value,
        end_value: last.value,
        delta: last.value - first.value,
        energy,
    }
}

fn item_path(item: &PowerItemConfig) -> &str {
    &item.path
}

pub struct PowerUsageEngine {
    port: Arc<dyn QueryPort>,
    items: Vec<PowerItemConfig>,
    limits: EngineLimits,
    cache: UsageCache,
}

impl PowerUsageEngine {
    pub fn new(port: Arc<dyn QueryPort>, items: Vec<PowerItemConfig>, limits: EngineLimits) -> Self {
        Self {
            port,
            items: unique_paths("power", items, item_path),
            limits,
            cache: UsageCache::new(),
        }
    }

    pub fn find_item(&self, path: &str) -> Option<&PowerItemConfig> {
        self.items.iter().find(|item| item.path == path)
    }

    /// Recompute every enabled item. Items fail or time out individually.
    pub async fn calculate_all(&self) -> PassSummary {
        let started = Instant::now();
        let enabled: Vec<_> = self.items.iter().filter(|item| item.enabled).collect();

        let summary = fan_out("power", enabled, self.limits, item_path, |item| {
            self.calculate_for_item(item)
        })
        .await;

        info!(
            computed = summary.computed,
            timed_out = summary.timed_out,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Power usage pass complete"
        );
        summary
    }

    pub async fn calculate_for_item(&self, item: &PowerItemConfig) -> ItemUsage {
        let directionality = resolve_directionality(item);
        let end = Utc::now();

        let mut periods = BTreeMap::new();
        for period in item.effective_periods() {
            let result = self
                .calculate_usage_for_period(&item.path, directionality, &period, end)
                .await;
            periods.insert(period.range.clone(), result);
        }

        let usage = ItemUsage {
            path: item.path.clone(),
            name: item.display_name().to_string(),
            unit: "Wh".to_string(),
            capacity: None,
            periods,
        };
        self.cache.insert(usage.clone(), Utc::now());

        debug!(path = %item.path, directionality = directionality.as_str(), "Power usage updated");
        usage
    }

    /// Usage for one period ending at `end`. Never fails: problems surface
    /// as an insufficient-data result.
    pub async fn calculate_usage_for_period(
        &self,
        path: &str,
        directionality: Directionality,
        period: &PeriodConfig,
        end: DateTime<Utc>,
    ) -> PeriodResult {
        let (range_len, window) = match (
            period::parse_descriptor(&period.range),
            period::parse_descriptor(&period.aggregation),
        ) {
            (Ok(range), Ok(window)) => (range, window),
            (Err(e), _) | (_, Err(e)) => {
                warn!(path, period = %period.range, error = %e, "Invalid period");
                return PeriodResult::insufficient(e.to_string());
            }
        };

        let range = TimeRange::trailing(end, range_len);
        match self
            .compute_period(path, directionality, &period.range, &range, range_len, window)
            .await
        {
            Ok(result) => result,
            Err(e) => {
                warn!(path, period = %period.range, error = %e, "Power query failed");
                PeriodResult::insufficient(format!("Query failed: {e}"))
            }
        }
    }

    async fn compute_period(
        &self,
        path: &str,
        directionality: Directionality,
        label: &str,
        range: &TimeRange,
        range_len: Duration,
        window: Duration,
    ) -> Result<PeriodResult, QueryError> {
        let first_last = self.port.query_first_last(path, range).await?;
        let Some((first, last)) = first_last.both() else {
            return Ok(PeriodResult::insufficient("No data available for this period"));
        };

        let samples = self.port.query_aggregated(path, range, window).await?;
        if samples.len() < 2 {
            return Ok(PeriodResult::insufficient("Insufficient data points"));
        }

        if let Some(reason) = coverage_shortfall(&samples, range_len) {
            debug!(path, period = label, %reason, "Skipping period");
            return Ok(PeriodResult::insufficient(reason));
        }

        let buckets = integrate(&samples, directionality, Some(window * 2));
        let energy = apply_directionality(directionality, buckets);

        Ok(PeriodResult::Power(power_period(label, first, last, energy)))
    }

    /// Integrate an externally supplied series without gap handling.
    pub fn calculate_energy_from_data(
        &self,
        samples: &[Sample],
        directionality: Directionality,
    ) -> Energy {
        apply_directionality(directionality, integrate(samples, directionality, None))
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
        debug!("Power usage cache cleared");
    }
}
