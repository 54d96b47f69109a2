pub mod cache;
pub mod coordinator;
pub mod pass;
pub mod period;
pub mod power;
pub mod query;
pub mod sqlite_source;
pub mod tankage;

#[cfg(test)]
pub(crate) mod mock;

pub use coordinator::{PassOutcome, UsageCoordinator};
pub use sqlite_source::SqliteSource;
