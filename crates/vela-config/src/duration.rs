//! Go-style duration parsing.
//!
//! Accepts a sequence of decimal numbers each followed by a unit: `ns`, `us`
//! (or `µs`), `ms`, `s`, `m`, `h`. A bare `0` is also accepted.

use regex::Regex;
use std::sync::LazyLock;
use std::time::Duration;

use crate::{ConfigError, ConfigResult};

static DURATION_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:\d+(?:\.\d+)?(?:ns|us|µs|ms|s|m|h))+$").unwrap());

static COMPONENT_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+(?:\.\d+)?)(ns|us|µs|ms|s|m|h)").unwrap());

/// Parse a duration such as `300ms`, `5m` or `1h30m`.
pub fn parse_duration(input: &str) -> ConfigResult<Duration> {
    let input = input.trim();
    if input == "0" {
        return Ok(Duration::ZERO);
    }
    if !DURATION_REGEX.is_match(input) {
        return Err(ConfigError::InvalidDuration(input.to_string()));
    }

    let mut nanos: f64 = 0.0;
    for caps in COMPONENT_REGEX.captures_iter(input) {
        let value: f64 = caps[1]
            .parse()
            .map_err(|_| ConfigError::InvalidDuration(input.to_string()))?;
        let scale = match &caps[2] {
            "ns" => 1.0,
            "us" | "µs" => 1e3,
            "ms" => 1e6,
            "s" => 1e9,
            "m" => 60.0 * 1e9,
            "h" => 3600.0 * 1e9,
            _ => return Err(ConfigError::InvalidDuration(input.to_string())),
        };
        nanos += value * scale;
    }

    if !nanos.is_finite() || nanos > u64::MAX as f64 {
        return Err(ConfigError::InvalidDuration(input.to_string()));
    }
    Ok(Duration::from_nanos(nanos.round() as u64))
}
