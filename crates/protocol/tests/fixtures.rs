use std::collections::BTreeMap;

use chrono::{DateTime, TimeZone, Utc};
use pretty_assertions::assert_eq;
use serde_json::json;
use usagewatch_protocol::*;

fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1704067200 + secs, 0).unwrap()
}

fn sample_power_period() -> PowerPeriod {
    PowerPeriod {
        period: "24h".to_string(),
        start_time: at(0),
        end_time: at(86400),
        start_value: 120.0,
        end_value: 80.0,
        delta: -40.0,
        energy: Energy {
            consumed_wh: 0.0,
            generated_wh: 2400.0,
        },
    }
}

fn sample_tankage_period() -> TankagePeriod {
    TankagePeriod {
        period: "7d".to_string(),
        start_time: at(0),
        end_time: at(7200),
        start_value: 0.2,
        end_value: 0.15,
        delta: -0.05,
        consumed: 0.06,
        added: 0.01,
        consumption_rate: 0.03,
        addition_rate: 0.005,
    }
}

fn sample_power_item() -> ItemUsage {
    let mut periods = BTreeMap::new();
    periods.insert(
        "24h".to_string(),
        PeriodResult::Power(sample_power_period()),
    );
    periods.insert(
        "30d".to_string(),
        PeriodResult::insufficient("Insufficient coverage: 12/30 days"),
    );

    ItemUsage {
        path: "electrical.solar.1.panelPower".to_string(),
        name: "Solar".to_string(),
        unit: "Wh".to_string(),
        capacity: None,
        periods,
    }
}

fn sample_tankage_item() -> ItemUsage {
    let mut periods = BTreeMap::new();
    periods.insert(
        "7d".to_string(),
        PeriodResult::Tankage(sample_tankage_period()),
    );

    ItemUsage {
        path: "tanks.freshWater.0.currentVolume".to_string(),
        name: "Fresh water".to_string(),
        unit: "m3".to_string(),
        capacity: Some(0.4),
        periods,
    }
}

fn sample_snapshot() -> UsageSnapshot {
    let mut items = BTreeMap::new();
    for item in [sample_power_item(), sample_tankage_item()] {
        items.insert(item.path.clone(), item);
    }

    let mut group_periods = BTreeMap::new();
    group_periods.insert(
        "24h".to_string(),
        GroupPeriodTotal {
            members: 1,
            totals: GroupTotals::Power(Energy {
                consumed_wh: 0.0,
                generated_wh: 2400.0,
            }),
        },
    );

    let mut groups = BTreeMap::new();
    groups.insert(
        "solar".to_string(),
        GroupUsage {
            id: "solar".to_string(),
            name: "All solar".to_string(),
            domain: Domain::Power,
            paths: vec!["electrical.solar.1.panelPower".to_string()],
            periods: group_periods,
        },
    );

    UsageSnapshot {
        timestamp: at(86400),
        ready: true,
        items,
        groups: Some(groups),
    }
}

#[test]
fn insufficient_period_serializes_as_tagged_flag() {
    let value = serde_json::to_value(PeriodResult::insufficient("No data available for this period"))
        .unwrap();

    assert_eq!(
        value,
        json!({
            "insufficientData": true,
            "reason": "No data available for this period",
        })
    );
}

#[test]
fn power_period_uses_camel_case_energy() {
    let value = serde_json::to_value(PeriodResult::Power(sample_power_period())).unwrap();

    assert_eq!(value["energy"], json!({"consumedWh": 0.0, "generatedWh": 2400.0}));
    assert_eq!(value["startValue"], json!(120.0));
    assert_eq!(value["period"], json!("24h"));
    assert!(value.get("insufficientData").is_none());
}

#[test]
fn period_results_deserialize_to_matching_variant() {
    let power = serde_json::to_string(&PeriodResult::Power(sample_power_period())).unwrap();
    let tankage = serde_json::to_string(&PeriodResult::Tankage(sample_tankage_period())).unwrap();
    let insufficient = serde_json::to_string(&PeriodResult::insufficient("gap")).unwrap();

    let power: PeriodResult = serde_json::from_str(&power).unwrap();
    let tankage: PeriodResult = serde_json::from_str(&tankage).unwrap();
    let insufficient: PeriodResult = serde_json::from_str(&insufficient).unwrap();

    assert_eq!(power.as_power(), Some(&sample_power_period()));
    assert_eq!(tankage.as_tankage(), Some(&sample_tankage_period()));
    assert_eq!(insufficient.reason(), Some("gap"));
}

#[test]
fn snapshot_json_shape() {
    let value = serde_json::to_value(sample_snapshot()).unwrap();

    assert_eq!(value["ready"], json!(true));
    assert!(value["items"]["electrical.solar.1.panelPower"]["periods"]["24h"].is_object());
    assert_eq!(
        value["items"]["tanks.freshWater.0.currentVolume"]["capacity"],
        json!(0.4)
    );
    assert!(value["items"]["electrical.solar.1.panelPower"]
        .get("capacity")
        .is_none());
    assert_eq!(
        value["groups"]["solar"]["periods"]["24h"],
        json!({"members": 1, "consumedWh": 0.0, "generatedWh": 2400.0})
    );

    let parsed: UsageSnapshot = serde_json::from_value(value).unwrap();
    assert_eq!(parsed, sample_snapshot());
}

#[test]
fn not_ready_snapshot_omits_groups() {
    let value = serde_json::to_value(UsageSnapshot::not_ready(at(0))).unwrap();

    assert_eq!(value["ready"], json!(false));
    assert_eq!(value["items"], json!({}));
    assert!(value.get("groups").is_none());
}

#[test]
fn directionality_parse_accepts_config_spellings() {
    assert_eq!(Directionality::parse("producer"), Some(Directionality::Producer));
    assert_eq!(
        Directionality::parse("Bidirectional"),
        Some(Directionality::BidirectionalNormal)
    );
    assert_eq!(
        Directionality::parse("bidirectional_reversed"),
        Some(Directionality::BidirectionalReversed)
    );
    assert_eq!(Directionality::parse("sideways"), None);
}

#[test]
fn delta_flattens_populated_periods_only() {
    let delta = UsageDelta::from_items(at(0), [&sample_power_item(), &sample_tankage_item()]);

    let keys: Vec<&str> = delta.values.iter().map(|v| v.path.as_str()).collect();
    assert_eq!(
        keys,
        vec![
            "electrical.solar.1.panelPower.usage.24h.consumed",
            "electrical.solar.1.panelPower.usage.24h.generated",
            "tanks.freshWater.0.currentVolume.usage.7d.consumed",
            "tanks.freshWater.0.currentVolume.usage.7d.added",
            "tanks.freshWater.0.currentVolume.usage.7d.consumptionRate",
            "tanks.freshWater.0.currentVolume.usage.7d.additionRate",
        ]
    );

    assert_eq!(delta.values[1].value, 2400.0 * 3600.0);
    assert_eq!(delta.values[4].value, 0.03 / 3600.0);
    assert_eq!(delta.version, SCHEMA_VERSION);
    assert!(is_supported(delta.version));
}

#[test]
fn delta_json_is_parseable() {
    let delta = UsageDelta::from_items(at(0), [&sample_tankage_item()]);
    let json = delta.to_json().unwrap();

    assert_eq!(UsageDelta::from_json(&json).unwrap(), delta);
}
