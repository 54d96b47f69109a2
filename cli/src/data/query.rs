//! The read-only time-series backend the engines pull samples from.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use usagewatch_protocol::Sample;

use crate::data::period;

#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Query task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("Backend error: {0}")]
    Backend(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// The `duration` leading up to `end`.
    pub fn trailing(end: DateTime<Utc>, duration: Duration) -> Self {
        Self {
            start: end - period::to_chrono(duration),
            end,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FirstLast {
    pub first: Option<Sample>,
    pub last: Option<Sample>,
}

impl FirstLast {
    pub fn both(&self) -> Option<(Sample, Sample)> {
        match (self.first, self.last) {
            (Some(first), Some(last)) => Some((first, last)),
            _ => None,
        }
    }
}

#[async_trait]
pub trait QueryPort: Send + Sync {
    /// Mean-aggregated samples over `window`-sized buckets, ascending by time.
    async fn query_aggregated(
        &self,
        path: &str,
        range: &TimeRange,
        window: Duration,
    ) -> Result<Vec<Sample>, QueryError>;

    /// First and last raw sample inside `range`.
    async fn query_first_last(&self, path: &str, range: &TimeRange)
        -> Result<FirstLast, QueryError>;
}
