use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single time-series point as returned by the query backend.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

impl Sample {
    pub fn new(timestamp: DateTime<Utc>, value: f64) -> Self {
        Self { timestamp, value }
    }

    /// Milliseconds elapsed from `earlier` to `self`.
    pub fn millis_since(&self, earlier: &Sample) -> i64 {
        (self.timestamp - earlier.timestamp).num_milliseconds()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Domain {
    Power,
    Tankage,
}

impl Domain {
    pub fn label(&self) -> &'static str {
        match self {
            Domain::Power => "power",
            Domain::Tankage => "tankage",
        }
    }
}

/// How signed power readings split into consumed and generated energy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Directionality {
    /// Only ever generates (solar, alternator). Negative readings are noise.
    Producer,
    /// Only ever consumes (shore power, AC input). Negative readings are noise.
    Consumer,
    /// Positive readings generate, negative readings consume.
    BidirectionalNormal,
    /// Positive readings consume, negative readings generate (battery discharge is positive).
    BidirectionalReversed,
}

impl Directionality {
    pub fn as_str(&self) -> &'static str {
        match self {
            Directionality::Producer => "producer",
            Directionality::Consumer => "consumer",
            Directionality::BidirectionalNormal => "bidirectional-normal",
            Directionality::BidirectionalReversed => "bidirectional-reversed",
        }
    }

    /// Parse a configured value. Case, `-` and `_` are ignored; a bare
    /// `bidirectional` means the normal sign convention.
    pub fn parse(value: &str) -> Option<Self> {
        let normalized: String = value
            .chars()
            .filter(|c| *c != '-' && *c != '_' && !c.is_whitespace())
            .collect::<String>()
            .to_lowercase();

        match normalized.as_str() {
            "producer" => Some(Directionality::Producer),
            "consumer" => Some(Directionality::Consumer),
            "bidirectional" | "bidirectionalnormal" => Some(Directionality::BidirectionalNormal),
            "bidirectionalreversed" => Some(Directionality::BidirectionalReversed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Energy {
    pub consumed_wh: f64,
    pub generated_wh: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct TankageTotals {
    pub consumed: f64,
    pub added: f64,
}

/// Marker result for a period that could not be computed with confidence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InsufficientData {
    pub insufficient_data: bool,
    pub reason: String,
}

impl InsufficientData {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            insufficient_data: true,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PowerPeriod {
    pub period: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub start_value: f64,
    pub end_value: f64,
    pub delta: f64,
    pub energy: Energy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TankagePeriod {
    pub period: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub start_value: f64,
    pub end_value: f64,
    pub delta: f64,
    pub consumed: f64,
    pub added: f64,
    /// Consumed volume per hour over the reported interval.
    pub consumption_rate: f64,
    /// Added volume per hour over the reported interval.
    pub addition_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PeriodResult {
    Insufficient(InsufficientData),
    Power(PowerPeriod),
    Tankage(TankagePeriod),
}

impl PeriodResult {
    pub fn insufficient(reason: impl Into<String>) -> Self {
        PeriodResult::Insufficient(InsufficientData::new(reason))
    }

    pub fn is_insufficient(&self) -> bool {
        matches!(self, PeriodResult::Insufficient(_))
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            PeriodResult::Insufficient(data) => Some(&data.reason),
            _ => None,
        }
    }

    pub fn as_power(&self) -> Option<&PowerPeriod> {
        match self {
            PeriodResult::Power(period) => Some(period),
            _ => None,
        }
    }

    pub fn as_tankage(&self) -> Option<&TankagePeriod> {
        match self {
            PeriodResult::Tankage(period) => Some(period),
            _ => None,
        }
    }
}

/// Usage of one configured item across all of its periods.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemUsage {
    pub path: String,
    pub name: String,
    pub unit: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capacity: Option<f64>,
    pub periods: BTreeMap<String, PeriodResult>,
}

impl ItemUsage {
    pub fn period(&self, range: &str) -> Option<&PeriodResult> {
        self.periods.get(range)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum GroupTotals {
    Power(Energy),
    Tankage(TankageTotals),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupPeriodTotal {
    /// Members that contributed a populated result for this period.
    pub members: usize,
    #[serde(flatten)]
    pub totals: GroupTotals,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupUsage {
    pub id: String,
    pub name: String,
    pub domain: Domain,
    pub paths: Vec<String>,
    pub periods: BTreeMap<String, GroupPeriodTotal>,
}

/// Merged view of both engines' caches, as served to readers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageSnapshot {
    pub timestamp: DateTime<Utc>,
    pub ready: bool,
    pub items: BTreeMap<String, ItemUsage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub groups: Option<BTreeMap<String, GroupUsage>>,
}

impl UsageSnapshot {
    pub fn not_ready(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            ready: false,
            items: BTreeMap::new(),
            groups: None,
        }
    }
}
