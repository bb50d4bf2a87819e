//! Shared duration-string grammar
//!
//! Delay elements, jump waits and the scheduler cadence all use the same
//! format: optional `Nd`, `Nh`, `Nm`, `Ns` components in that fixed order,
//! optionally separated by colons. "2d:3h", "1h", "45m" and "1d:2h:3m:4s"
//! are all valid; at least one component is required.

use chrono::Duration;
use regex::Regex;
use sdk::errors::EngineError;
use std::sync::OnceLock;

fn interval_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?:(\d+)d)?(?::)?(?:(\d+)h)?(?::)?(?:(\d+)m)?(?::)?(?:(\d+)s)?$")
            .expect("interval regex compiles")
    })
}

/// Parse a duration string in the shared grammar
///
/// Fails on anything outside the grammar and on strings with no component
/// at all.
pub fn parse_duration(interval: &str) -> Result<Duration, EngineError> {
    let captures = interval_regex()
        .captures(interval)
        .ok_or_else(|| EngineError::Validation(format!("invalid interval format '{}'", interval)))?;

    let part = |i: usize| -> Option<i64> {
        captures
            .get(i)
            .map(|m| m.as_str().parse::<i64>().unwrap_or(0))
    };

    let days = part(1);
    let hours = part(2);
    let minutes = part(3);
    let seconds = part(4);

    if days.is_none() && hours.is_none() && minutes.is_none() && seconds.is_none() {
        return Err(EngineError::Validation(format!(
            "invalid interval format '{}'",
            interval
        )));
    }

    Ok(Duration::days(days.unwrap_or(0))
        + Duration::hours(hours.unwrap_or(0))
        + Duration::minutes(minutes.unwrap_or(0))
        + Duration::seconds(seconds.unwrap_or(0)))
}

/// Split a parsed duration into its day part and the sub-day remainder
pub fn split_days(duration: Duration) -> (i64, i64) {
    let days = duration.num_days();
    let remainder = duration.num_seconds() - days * 86_400;
    (days, remainder)
}
