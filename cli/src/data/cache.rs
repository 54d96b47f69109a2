use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use usagewatch_protocol::ItemUsage;

#[derive(Debug, Clone)]
pub struct CachedUsage {
    pub usage: ItemUsage,
    pub computed_at: DateTime<Utc>,
}

/// Per-engine usage cache keyed by item path.
///
/// Each path is written by exactly one task per pass, so entries are replaced
/// whole. Readers can see a mix of old and new entries while a pass runs.
#[derive(Debug, Default)]
pub struct UsageCache {
    entries: DashMap<String, CachedUsage>,
}

impl UsageCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, usage: ItemUsage, computed_at: DateTime<Utc>) {
        self.entries.insert(
            usage.path.clone(),
            CachedUsage {
                usage,
                computed_at,
            },
        );
    }

    pub fn get(&self, path: &str) -> Option<ItemUsage> {
        self.entries.get(path).map(|entry| entry.usage.clone())
    }

    pub fn computed_at(&self, path: &str) -> Option<DateTime<Utc>> {
        self.entries.get(path).map(|entry| entry.computed_at)
    }

    pub fn snapshot(&self) -> BTreeMap<String, ItemUsage> {
        self.entries
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().usage.clone()))
            .collect()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn usage(path: &str) -> ItemUsage {
        ItemUsage {
            path: path.to_string(),
            name: path.to_string(),
            unit: "Wh".to_string(),
            capacity: None,
            periods: BTreeMap::new(),
        }
    }

    #[test]
    fn test_insert_replaces_whole_entry() {
        let cache = UsageCache::new();
        let first = Utc.timestamp_opt(1_000, 0).unwrap();
        let second = Utc.timestamp_opt(2_000, 0).unwrap();

        cache.insert(usage("a"), first);
        let mut renamed = usage("a");
        renamed.name = "Renamed".to_string();
        cache.insert(renamed, second);

        assert_eq!(cache.snapshot().len(), 1);
        assert_eq!(cache.get("a").unwrap().name, "Renamed");
        assert_eq!(cache.computed_at("a"), Some(second));
    }

    #[test]
    fn test_snapshot_and_clear() {
        let cache = UsageCache::new();
        let now = Utc::now();
        cache.insert(usage("b"), now);
        cache.insert(usage("a"), now);

        let keys: Vec<_> = cache.snapshot().into_keys().collect();
        assert_eq!(keys, vec!["a", "b"]);

        cache.clear();
        assert!(cache.snapshot().is_empty());
        assert!(cache.get("a").is_none());
    }
}
