use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use usagewatch_protocol::Domain;

use crate::data::period;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "off" | "none" => LogLevel::Off,
            "error" => LogLevel::Error,
            "warn" | "warning" => LogLevel::Warn,
            "debug" => LogLevel::Debug,
            "trace" => LogLevel::Trace,
            _ => LogLevel::Info,
        }
    }

    pub fn as_tracing_level(&self) -> Option<tracing::Level> {
        match self {
            LogLevel::Off => None,
            LogLevel::Error => Some(tracing::Level::ERROR),
            LogLevel::Warn => Some(tracing::Level::WARN),
            LogLevel::Info => Some(tracing::Level::INFO),
            LogLevel::Debug => Some(tracing::Level::DEBUG),
            LogLevel::Trace => Some(tracing::Level::TRACE),
        }
    }
}

/// A time range paired with the window the backend averages samples over.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodConfig {
    pub range: String,
    pub aggregation: String,
}

impl PeriodConfig {
    pub fn new(range: &str, aggregation: &str) -> Self {
        Self {
            range: range.to_string(),
            aggregation: aggregation.to_string(),
        }
    }
}

pub fn default_periods() -> Vec<PeriodConfig> {
    vec![
        PeriodConfig::new("1h", "1m"),
        PeriodConfig::new("24h", "15m"),
        PeriodConfig::new("7d", "1h"),
        PeriodConfig::new("30d", "4h"),
    ]
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PowerItemConfig {
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Kept as free text so an unknown value can fall back to auto-detection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directionality: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub periods: Vec<PeriodConfig>,
}

impl PowerItemConfig {
    pub fn new(path: &str) -> Self {
        Self {
            path: path.to_string(),
            name: None,
            directionality: None,
            periods: Vec::new(),
            enabled: true,
        }
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.path)
    }

    pub fn effective_periods(&self) -> Vec<PeriodConfig> {
        if self.periods.is_empty() {
            default_periods()
        } else {
            self.periods.clone()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TankageItemConfig {
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Raises the refill threshold for tanks where level noise is larger.
    #[serde(default)]
    pub large: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    /// Tank capacity in m³, used to convert ratio readings to volume.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capacity: Option<f64>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub periods: Vec<PeriodConfig>,
}

impl TankageItemConfig {
    pub fn new(path: &str) -> Self {
        Self {
            path: path.to_string(),
            name: None,
            large: false,
            unit: None,
            capacity: None,
            periods: Vec::new(),
            enabled: true,
        }
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.path)
    }

    pub fn effective_periods(&self) -> Vec<PeriodConfig> {
        if self.periods.is_empty() {
            default_periods()
        } else {
            self.periods.clone()
        }
    }
}

/// Named set of same-domain items whose usage is summed per period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupConfig {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub domain: Domain,
    pub paths: Vec<String>,
}

impl GroupConfig {
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// SQLite database holding the `samples` table.
    pub database: PathBuf,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            database: data_dir().join("samples.db"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub interval_secs: u64,
    pub max_concurrent_items: usize,
    pub item_timeout_secs: u64,
    pub tankage_smoothing: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            interval_secs: 60,
            max_concurrent_items: 8,
            item_timeout_secs: 120,
            tankage_smoothing: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PublishConfig {
    pub min_interval_ms: u64,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            min_interval_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct UserConfig {
    pub log_level: LogLevel,
    pub source: SourceConfig,
    pub engine: EngineConfig,
    pub publish: PublishConfig,
    pub power: Vec<PowerItemConfig>,
    pub tankage: Vec<TankageItemConfig>,
    pub groups: Vec<GroupConfig>,
}

pub fn config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("~/.config"))
        .join("usagewatch")
}

pub fn data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("~/.local/share"))
        .join("usagewatch")
}

pub fn runtime_dir() -> PathBuf {
    dirs::runtime_dir()
        .or_else(dirs::cache_dir)
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("usagewatch")
}

pub fn config_path() -> PathBuf {
    config_dir().join("config.toml")
}

pub fn ensure_dirs() -> std::io::Result<()> {
    fs::create_dir_all(config_dir())?;
    fs::create_dir_all(data_dir())?;
    Ok(())
}

impl UserConfig {
    /// The user's config, or defaults when no file exists yet. A file that
    /// fails to parse is an error so the caller can report it once logging
    /// is up.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_or_default(&config_path())
    }

    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        Self::load_from(path)
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn save(&self) -> Result<(), ConfigError> {
        ensure_dirs()?;
        let content = toml::to_string_pretty(self)?;
        fs::write(config_path(), content)?;
        Ok(())
    }

    /// Human-readable problems with the configuration. Empty when valid.
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();

        let power_paths = check_items(
            "power",
            self.power.iter().map(|i| (i.path.as_str(), i.effective_periods())),
            &mut problems,
        );
        let tankage_paths = check_items(
            "tankage",
            self.tankage.iter().map(|i| (i.path.as_str(), i.effective_periods())),
            &mut problems,
        );

        for item in &self.power {
            if let Some(value) = &item.directionality {
                if usagewatch_protocol::Directionality::parse(value).is_none() {
                    problems.push(format!(
                        "power item {}: unknown directionality '{}' (auto-detect will be used)",
                        item.path, value
                    ));
                }
            }
        }

        for item in &self.tankage {
            if let Some(capacity) = item.capacity {
                if capacity <= 0.0 {
                    problems.push(format!(
                        "tankage item {}: capacity must be positive",
                        item.path
                    ));
                }
            }
        }

        let mut group_ids = HashSet::new();
        for group in &self.groups {
            if !group_ids.insert(group.id.as_str()) {
                problems.push(format!("group {}: duplicate id", group.id));
            }
            let known = match group.domain {
                Domain::Power => &power_paths,
                Domain::Tankage => &tankage_paths,
            };
            for path in &group.paths {
                if !known.contains(path.as_str()) {
                    problems.push(format!(
                        "group {}: {} is not a configured {} item",
                        group.id,
                        path,
                        group.domain.label()
                    ));
                }
            }
        }

        problems
    }
}

fn check_items<'a>(
    domain: &str,
    items: impl Iterator<Item = (&'a str, Vec<PeriodConfig>)>,
    problems: &mut Vec<String>,
) -> HashSet<&'a str> {
    let mut paths = HashSet::new();

    for (path, periods) in items {
        if !paths.insert(path) {
            problems.push(format!("{} item {}: duplicate path", domain, path));
        }

        let mut ranges = HashSet::new();
        for p in &periods {
            if !ranges.insert(p.range.as_str()) {
                problems.push(format!(
                    "{} item {}: duplicate period {}",
                    domain, path, p.range
                ));
            }
            if let Err(e) = period::parse_descriptor(&p.range) {
                problems.push(format!("{} item {}: {}", domain, path, e));
            }
            if let Err(e) = period::parse_descriptor(&p.aggregation) {
                problems.push(format!("{} item {}: {}", domain, path, e));
            }
        }
    }

    paths
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
log_level = "debug"

[engine]
max_concurrent_items = 4

[[power]]
path = "electrical.solar.1.panelPower"
name = "Solar"
directionality = "producer"
periods = [{ range = "24h", aggregation = "15m" }]

[[power]]
path = "electrical.shore.power"
enabled = false

[[tankage]]
path = "tanks.freshWater.0.currentLevel"
large = true
capacity = 0.4

[[groups]]
id = "generation"
type = "power"
paths = ["electrical.solar.1.panelPower"]
"#;

    #[test]
    fn test_parse_sample_config() {
        let config = UserConfig::from_toml(SAMPLE).unwrap();

        assert_eq!(config.log_level, LogLevel::Debug);
        assert_eq!(config.engine.max_concurrent_items, 4);
        assert_eq!(config.engine.interval_secs, 60);
        assert_eq!(config.power.len(), 2);
        assert!(config.power[0].enabled);
        assert!(!config.power[1].enabled);
        assert_eq!(config.power[0].display_name(), "Solar");
        assert!(config.tankage[0].large);
        assert_eq!(config.groups[0].domain, Domain::Power);
        assert!(config.validate().is_empty());
    }

    #[test]
    fn test_load_or_default() {
        let dir = std::env::temp_dir().join(format!("usagewatch-config-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();

        let missing = dir.join("missing.toml");
        let config = UserConfig::load_or_default(&missing).unwrap();
        assert!(config.power.is_empty());

        let broken = dir.join("broken.toml");
        fs::write(&broken, "[[power]]\npath = 42\n").unwrap();
        assert!(matches!(
            UserConfig::load_or_default(&broken),
            Err(ConfigError::Parse(_))
        ));

        let valid = dir.join("valid.toml");
        fs::write(&valid, SAMPLE).unwrap();
        assert_eq!(UserConfig::load_or_default(&valid).unwrap().power.len(), 2);

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_default_periods_applied() {
        let item = TankageItemConfig::new("tanks.fuel.0.currentLevel");
        let ranges: Vec<_> = item
            .effective_periods()
            .into_iter()
            .map(|p| p.range)
            .collect();
        assert_eq!(ranges, vec!["1h", "24h", "7d", "30d"]);
    }

    #[test]
    fn test_validate_reports_problems() {
        let mut config = UserConfig::default();
        let mut solar = PowerItemConfig::new("electrical.solar");
        solar.periods = vec![
            PeriodConfig::new("24h", "15m"),
            PeriodConfig::new("24h", "5m"),
            PeriodConfig::new("fortnight", "1h"),
        ];
        solar.directionality = Some("sideways".to_string());
        config.power = vec![solar.clone(), solar];
        config.groups = vec![GroupConfig {
            id: "tanks".to_string(),
            name: None,
            domain: Domain::Tankage,
            paths: vec!["electrical.solar".to_string()],
        }];

        let problems = config.validate();
        assert!(problems.iter().any(|p| p.contains("duplicate path")));
        assert!(problems.iter().any(|p| p.contains("duplicate period 24h")));
        assert!(problems.iter().any(|p| p.contains("fortnight")));
        assert!(problems.iter().any(|p| p.contains("sideways")));
        assert!(problems
            .iter()
            .any(|p| p.contains("not a configured tankage item")));
    }

    #[test]
    fn test_log_level_from_str() {
        assert_eq!(LogLevel::from_str("WARN"), LogLevel::Warn);
        assert_eq!(LogLevel::from_str("none"), LogLevel::Off);
        assert_eq!(LogLevel::from_str("bogus"), LogLevel::Info);
        assert!(LogLevel::Off.as_tracing_level().is_none());
    }

    #[test]
    fn test_round_trip_through_toml() {
        let config = UserConfig::from_toml(SAMPLE).unwrap();
        let text = toml::to_string_pretty(&config).unwrap();
        assert_eq!(UserConfig::from_toml(&text).unwrap(), config);
    }
}
