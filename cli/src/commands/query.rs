use chrono::{DateTime, Utc};
use color_eyre::eyre::{eyre, Result, WrapErr};

use crate::config::UserConfig;
use crate::data::period;

fn parse_time(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .wrap_err_with(|| format!("Invalid RFC 3339 time '{}'", value))
}

pub fn run(
    config: UserConfig,
    path: &str,
    from: &str,
    to: Option<&str>,
    aggregation: Option<&str>,
    compact: bool,
) -> Result<()> {
    let start = parse_time(from)?;
    let end = match to {
        Some(to) => parse_time(to)?,
        None => Utc::now(),
    };
    let aggregation = aggregation
        .map(period::parse_descriptor)
        .transpose()
        .map_err(|e| eyre!("{}", e))?;

    let runtime = super::build_runtime()?;
    runtime.block_on(async {
        let coordinator = super::open_coordinator(&config)?;
        let result = coordinator
            .calculate_custom_range(path, start, end, aggregation)
            .await?;
        super::print_json(&result, compact)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_time_normalizes_offset() {
        let parsed = parse_time("2024-01-01T02:00:00+02:00").unwrap();
        assert_eq!(parsed.to_rfc3339(), "2024-01-01T00:00:00+00:00");
        assert!(parse_time("yesterday").is_err());
    }
}
