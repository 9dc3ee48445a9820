//! Normalization of human-readable duration, rate, and concurrency inputs.
//!
//! Bare numbers are milliseconds for durations; `"3s"` / `"20ms"` forms are
//! accepted too. Rates are invocations per second. Rejections carry the same
//! fixed messages as the runtime setters on [`crate::run::Task`].

use std::time::Duration;

use crate::error::ConfigError;

/// Parse a duration: a bare number is milliseconds, anything else goes
/// through the `humantime` grammar (`"3s"`, `"20ms"`, `"1m 30s"`).
pub fn duration(input: &str) -> Result<Duration, ConfigError> {
    let input = input.trim();
    if let Ok(ms) = input.parse::<f64>() {
        return if ms.is_finite() && ms > 0.0 {
            Ok(Duration::from_secs_f64(ms / 1000.0))
        } else {
            Err(ConfigError::Duration)
        };
    }
    match humantime::parse_duration(input) {
        Ok(parsed) if !parsed.is_zero() => Ok(parsed),
        _ => Err(ConfigError::Duration),
    }
}

/// Parse a rate in invocations per second.
pub fn rate(input: &str) -> Result<f64, ConfigError> {
    input
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|rate| rate.is_finite() && *rate > 0.0)
        .ok_or(ConfigError::Rate)
}

/// Parse a concurrency level. Fractional values are rejected, not rounded.
pub fn concurrent(input: &str) -> Result<usize, ConfigError> {
    let value = input
        .trim()
        .parse::<f64>()
        .map_err(|_| ConfigError::Concurrent)?;
    if value.is_finite() && value > 0.0 && value.fract() == 0.0 {
        Ok(value as usize)
    } else {
        Err(ConfigError::Concurrent)
    }
}
