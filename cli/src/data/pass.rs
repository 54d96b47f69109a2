//! Bounded per-engine fan-out over configured items.

use std::collections::HashSet;
use std::future::Future;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use tracing::warn;

use crate::config::EngineConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineLimits {
    pub max_concurrent_items: usize,
    pub item_timeout: Duration,
}

impl EngineLimits {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            max_concurrent_items: config.max_concurrent_items.max(1),
            item_timeout: Duration::from_secs(config.item_timeout_secs.max(1)),
        }
    }
}

impl Default for EngineLimits {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

/// What one engine did during a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PassSummary {
    pub computed: usize,
    /// Items that hit the per-item timeout. Their previous cache entry is kept.
    pub timed_out: usize,
}

/// Drop items whose path was already configured, keeping the first. Each
/// path gets exactly one writer per pass.
pub(crate) fn unique_paths<T>(domain: &'static str, items: Vec<T>, path_of: fn(&T) -> &str) -> Vec<T> {
    let mut seen = HashSet::new();
    items
        .into_iter()
        .filter(|item| {
            let path = path_of(item);
            let first = seen.insert(path.to_string());
            if !first {
                warn!(domain, path, "Duplicate item path, keeping the first entry");
            }
            first
        })
        .collect()
}

/// Run `compute` for every item, at most `max_concurrent_items` at a time,
/// each bounded by `item_timeout`.
pub(crate) async fn fan_out<'a, T, R, F, Fut>(
    domain: &'static str,
    items: Vec<&'a T>,
    limits: EngineLimits,
    path_of: fn(&T) -> &str,
    compute: F,
) -> PassSummary
where
    T: 'a,
    F: Fn(&'a T) -> Fut,
    Fut: Future<Output = R> + 'a,
{
    let timeout = limits.item_timeout;

    // Built up front so the stream holds plain futures rather than closures.
    let work: Vec<_> = items
        .into_iter()
        .map(|item| {
            let path = path_of(item);
            let work = compute(item);
            async move {
                match tokio::time::timeout(timeout, work).await {
                    Ok(_) => true,
                    Err(_) => {
                        warn!(
                            domain,
                            path,
                            timeout_secs = timeout.as_secs(),
                            "Item timed out, keeping previous result"
                        );
                        false
                    }
                }
            }
        })
        .collect();

    let finished: Vec<bool> = stream::iter(work)
        .buffer_unordered(limits.max_concurrent_items.max(1))
        .collect()
        .await;

    let computed = finished.iter().filter(|done| **done).count();
    PassSummary {
        computed,
        timed_out: finished.len() - computed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn as_path(item: &String) -> &str {
        item
    }

    #[tokio::test(start_paused = true)]
    async fn test_fan_out_counts_timeouts() {
        let items = vec!["fast".to_string(), "slow".to_string(), "quick".to_string()];
        let limits = EngineLimits {
            max_concurrent_items: 2,
            item_timeout: Duration::from_secs(5),
        };

        let summary = fan_out("test", items.iter().collect(), limits, as_path, |item| async move {
            if item == "slow" {
                tokio::time::sleep(Duration::from_secs(60)).await;
            }
        })
        .await;

        assert_eq!(
            summary,
            PassSummary {
                computed: 2,
                timed_out: 1
            }
        );
    }

    #[tokio::test]
    async fn test_fan_out_respects_concurrency_cap() {
        let items: Vec<String> = (0..10).map(|i| i.to_string()).collect();
        let active = AtomicUsize::new(0);
        let peak = AtomicUsize::new(0);
        let limits = EngineLimits {
            max_concurrent_items: 3,
            item_timeout: Duration::from_secs(5),
        };

        let (active, peak) = (&active, &peak);
        let summary = fan_out("test", items.iter().collect(), limits, as_path, move |_| async move {
            let now = active.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            tokio::task::yield_now().await;
            active.fetch_sub(1, Ordering::SeqCst);
        })
        .await;

        assert_eq!(summary.computed, 10);
        assert!(peak.load(Ordering::SeqCst) <= 3);
    }

    #[test]
    fn test_unique_paths_keeps_first() {
        let items = vec![
            "a".to_string(),
            "b".to_string(),
            "a".to_string(),
            "c".to_string(),
            "b".to_string(),
        ];
        assert_eq!(unique_paths("test", items, as_path), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_limits_never_zero() {
        let config = EngineConfig {
            max_concurrent_items: 0,
            item_timeout_secs: 0,
            ..EngineConfig::default()
        };
        let limits = EngineLimits::from_config(&config);
        assert_eq!(limits.max_concurrent_items, 1);
        assert_eq!(limits.item_timeout, Duration::from_secs(1));
    }
}
