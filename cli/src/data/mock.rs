//! In-memory query port for engine and coordinator tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use tokio::sync::Semaphore;
use usagewatch_protocol::Sample;

use crate::data::query::{FirstLast, QueryError, QueryPort, TimeRange};

/// Serves fixed series per path. Ranges and windows are ignored so tests
/// control exactly what each engine sees.
#[derive(Default)]
pub struct MockPort {
    series: Mutex<HashMap<String, Vec<Sample>>>,
    failing: Mutex<HashSet<String>>,
    stalled: Mutex<HashSet<String>>,
    gate: Option<Arc<Semaphore>>,
    pub first_last_calls: AtomicUsize,
    pub aggregated_calls: AtomicUsize,
}

impl MockPort {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every query waits for a permit on `gate` before answering.
    pub fn gated(gate: Arc<Semaphore>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::default()
        }
    }

    pub fn with_series(self, path: &str, samples: Vec<Sample>) -> Self {
        self.series.lock().insert(path.to_string(), samples);
        self
    }

    pub fn failing(self, path: &str) -> Self {
        self.failing.lock().insert(path.to_string());
        self
    }

    /// Queries for `path` never answer from now on.
    pub fn stall(&self, path: &str) {
        self.stalled.lock().insert(path.to_string());
    }

    pub fn first_last_calls(&self) -> usize {
        self.first_last_calls.load(Ordering::SeqCst)
    }

    async fn wait(&self, path: &str) -> Result<(), QueryError> {
        if let Some(gate) = &self.gate {
            let _permit = gate
                .acquire()
                .await
                .map_err(|e| QueryError::Backend(e.to_string()))?;
        }
        let stalled = self.stalled.lock().contains(path);
        if stalled {
            std::future::pending::<()>().await;
        }
        let failing = self.failing.lock().contains(path);
        if failing {
            return Err(QueryError::Backend(format!("{path} unavailable")));
        }
        Ok(())
    }

    fn samples(&self, path: &str) -> Vec<Sample> {
        self.series.lock().get(path).cloned().unwrap_or_default()
    }
}

#[async_trait]
impl QueryPort for MockPort {
    async fn query_aggregated(
        &self,
        path: &str,
        _range: &TimeRange,
        _window: Duration,
    ) -> Result<Vec<Sample>, QueryError> {
        self.aggregated_calls.fetch_add(1, Ordering::SeqCst);
        self.wait(path).await?;
        Ok(self.samples(path))
    }

    async fn query_first_last(
        &self,
        path: &str,
        _range: &TimeRange,
    ) -> Result<FirstLast, QueryError> {
        self.first_last_calls.fetch_add(1, Ordering::SeqCst);
        self.wait(path).await?;
        let samples = self.samples(path);
        Ok(FirstLast {
            first: samples.first().copied(),
            last: samples.last().copied(),
        })
    }
}

/// 2024-01-01T00:00:00Z plus `secs`.
pub fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_704_067_200 + secs, 0).unwrap()
}

/// Evenly spaced samples starting at `at(0)`.
pub fn series(step_secs: i64, values: &[f64]) -> Vec<Sample> {
    values
        .iter()
        .enumerate()
        .map(|(i, value)| Sample::new(at(i as i64 * step_secs), *value))
        .collect()
}
