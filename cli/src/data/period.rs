//! Parsing of range and aggregation descriptors such as `24h`, `15m` or `7d`.

use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PeriodError {
    #[error("invalid duration '{descriptor}': {reason}")]
    Invalid { descriptor: String, reason: String },

    #[error("duration '{0}' must be greater than zero")]
    Zero(String),
}

pub fn parse_descriptor(descriptor: &str) -> Result<Duration, PeriodError> {
    let duration = humantime::parse_duration(descriptor.trim()).map_err(|e| {
        PeriodError::Invalid {
            descriptor: descriptor.to_string(),
            reason: e.to_string(),
        }
    })?;

    if duration.is_zero() {
        return Err(PeriodError::Zero(descriptor.to_string()));
    }

    Ok(duration)
}

pub fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::MAX)
}
