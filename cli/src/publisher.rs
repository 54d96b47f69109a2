use std::io::Write;
use std::time::{Duration, Instant};

use tracing::debug;
use usagewatch_protocol::{UsageDelta, UsageSnapshot};

/// Writes snapshot deltas as JSON lines, at most once per `min_interval`.
pub struct DeltaPublisher {
    min_interval: Duration,
    last_sent: Option<Instant>,
}

impl DeltaPublisher {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_sent: None,
        }
    }

    /// Returns whether anything was written.
    pub fn publish<W: Write>(
        &mut self,
        snapshot: &UsageSnapshot,
        now: Instant,
        out: &mut W,
    ) -> std::io::Result<bool> {
        if !snapshot.ready {
            return Ok(false);
        }

        if let Some(last) = self.last_sent {
            if now.saturating_duration_since(last) < self.min_interval {
                debug!(
                    min_interval_ms = self.min_interval.as_millis() as u64,
                    "Delta rate limited"
                );
                return Ok(false);
            }
        }

        let delta = UsageDelta::from_items(snapshot.timestamp, snapshot.items.values());
        if delta.is_empty() {
            return Ok(false);
        }

        // One delta per line.
        writeln!(out, "{}", serde_json::to_string(&delta)?)?;
        out.flush()?;

        self.last_sent = Some(now);
        debug!(values = delta.values.len(), "Published usage delta");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use chrono::{TimeZone, Utc};
    use usagewatch_protocol::{Energy, ItemUsage, PeriodResult, PowerPeriod};

    fn snapshot() -> UsageSnapshot {
        let at = Utc.timestamp_opt(1_704_067_200, 0).unwrap();
        let mut periods = BTreeMap::new();
        periods.insert(
            "1h".to_string(),
            PeriodResult::Power(PowerPeriod {
                period: "1h".to_string(),
                start_time: at,
                end_time: at,
                start_value: 10.0,
                end_value: 10.0,
                delta: 0.0,
                energy: Energy {
                    consumed_wh: 1.0,
                    generated_wh: 0.0,
                },
            }),
        );
        let item = ItemUsage {
            path: "electrical.shore.power".to_string(),
            name: "Shore".to_string(),
            unit: "Wh".to_string(),
            capacity: None,
            periods,
        };

        let mut items = BTreeMap::new();
        items.insert(item.path.clone(), item);
        UsageSnapshot {
            timestamp: at,
            ready: true,
            items,
            groups: None,
        }
    }

    #[test]
    fn test_publish_rate_limited() {
        let mut publisher = DeltaPublisher::new(Duration::from_millis(1000));
        let mut out = Vec::new();
        let start = Instant::now();

        assert!(publisher.publish(&snapshot(), start, &mut out).unwrap());
        assert!(!publisher
            .publish(&snapshot(), start + Duration::from_millis(500), &mut out)
            .unwrap());
        assert!(publisher
            .publish(&snapshot(), start + Duration::from_millis(1000), &mut out)
            .unwrap());

        // Every delta is a single line even with several values.
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines.iter().all(|line| line.starts_with('{') && line.ends_with('}')));

        let delta = UsageDelta::from_json(lines[0]).unwrap();
        assert_eq!(delta.values[0].path, "electrical.shore.power.usage.1h.consumed");
        assert_eq!(delta.values[0].value, 3600.0);
    }

    #[test]
    fn test_not_ready_snapshot_is_not_published() {
        let mut publisher = DeltaPublisher::new(Duration::ZERO);
        let mut out = Vec::new();
        let snapshot = UsageSnapshot::not_ready(Utc::now());

        assert!(!publisher.publish(&snapshot, Instant::now(), &mut out).unwrap());
        assert!(out.is_empty());
    }
}
