use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{ItemUsage, PeriodResult};
use crate::version::SCHEMA_VERSION;

const JOULES_PER_WH: f64 = 3600.0;
const SECONDS_PER_HOUR: f64 = 3600.0;

/// One flattened `key -> value` update for the message bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeltaValue {
    pub path: String,
    pub value: f64,
}

/// A batch of flattened usage values, as forwarded by the publisher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageDelta {
    pub version: u32,
    pub timestamp: DateTime<Utc>,
    pub values: Vec<DeltaValue>,
}

impl UsageDelta {
    pub fn from_items<'a>(
        timestamp: DateTime<Utc>,
        items: impl IntoIterator<Item = &'a ItemUsage>,
    ) -> Self {
        let values = items.into_iter().flat_map(item_values).collect();
        Self {
            version: SCHEMA_VERSION,
            timestamp,
            values,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

/// Flattens one item to `<path>.usage.<period>.<metric>` keys.
///
/// Power energy is published in joules; tankage volumes in m³ and rates in
/// m³/s. Periods without sufficient data are skipped.
pub fn item_values(item: &ItemUsage) -> Vec<DeltaValue> {
    let mut values = Vec::new();

    for (range, result) in &item.periods {
        let prefix = format!("{}.usage.{}", item.path, range);
        let mut push = |metric: &str, value: f64| {
            values.push(DeltaValue {
                path: format!("{}.{}", prefix, metric),
                value,
            });
        };

        match result {
            PeriodResult::Insufficient(_) => {}
            PeriodResult::Power(period) => {
                push("consumed", period.energy.consumed_wh * JOULES_PER_WH);
                push("generated", period.energy.generated_wh * JOULES_PER_WH);
            }
            PeriodResult::Tankage(period) => {
                push("consumed", period.consumed);
                push("added", period.added);
                push("consumptionRate", period.consumption_rate / SECONDS_PER_HOUR);
                push("additionRate", period.addition_rate / SECONDS_PER_HOUR);
            }
        }
    }

    values
}
