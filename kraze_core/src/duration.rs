//! Minimal duration-string parsing for fields like `wait_timeout: "10m"`.
//!
//! Supports a leading integer followed by one of `s`, `m`, `h` (seconds,
//! minutes, hours). No external crate is warranted for three suffixes.

use std::time::Duration;

pub fn parse_duration(raw: &str) -> Option<Duration> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    let (num_part, unit) = raw.split_at(raw.len() - 1);
    let (num_str, multiplier) = match unit {
        "s" => (num_part, 1u64),
        "m" => (num_part, 60u64),
        "h" => (num_part, 3600u64),
        _ => (raw, 1u64), // bare number means seconds
    };
    num_str.parse::<u64>().ok().map(|n| Duration::from_secs(n * multiplier))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_seconds_minutes_hours() {
        assert_eq!(parse_duration("3s"), Some(Duration::from_secs(3)));
        assert_eq!(parse_duration("10m"), Some(Duration::from_secs(600)));
        assert_eq!(parse_duration("1h"), Some(Duration::from_secs(3600)));
    }

    #[test]
    fn bare_number_is_seconds() {
        assert_eq!(parse_duration("45"), Some(Duration::from_secs(45)));
    }

    #[test]
    fn zero_duration_disables_delay() {
        assert_eq!(parse_duration("0s"), Some(Duration::from_secs(0)));
    }

    #[test]
    fn garbage_is_none() {
        assert_eq!(parse_duration("soon"), None);
        assert_eq!(parse_duration(""), None);
    }
}
