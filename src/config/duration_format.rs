//! Duration parsing for configuration files.
//!
//! Accepts either a bare integer (seconds) or a humantime string such as
//! `15s`, `2m` or `1m 30s`. Serializes back to the humantime form.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::time::Duration;

#[derive(Deserialize)]
#[serde(untagged)]
enum RawDuration {
    Seconds(u64),
    Text(String),
}

/// Parse a duration string, accepting plain seconds as well as humantime.
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if let Ok(secs) = s.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }

    humantime::parse_duration(s)
        .map_err(|e| format!("invalid duration '{}': {} (expected e.g. 15 or 15s)", s, e))
}

pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    match RawDuration::deserialize(deserializer)? {
        RawDuration::Seconds(secs) => Ok(Duration::from_secs(secs)),
        RawDuration::Text(s) => parse_duration(&s).map_err(serde::de::Error::custom),
    }
}

pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    humantime::format_duration(*duration)
        .to_string()
        .serialize(serializer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Deserialize, Serialize)]
    struct Wrapper {
        #[serde(with = "super")]
        timeout: Duration,
    }

    #[test]
    fn test_parse_seconds_and_humantime() {
        assert_eq!(parse_duration("15").unwrap(), Duration::from_secs(15));
        assert_eq!(parse_duration("2m").unwrap(), Duration::from_secs(120));
        assert_eq!(parse_duration("1m 30s").unwrap(), Duration::from_secs(90));
        assert!(parse_duration("soon").is_err());
    }

    #[test]
    fn test_deserialize_number_or_string() {
        let w: Wrapper = serde_json::from_str(r#"{"timeout": 5}"#).unwrap();
        assert_eq!(w.timeout, Duration::from_secs(5));

        let w: Wrapper = serde_json::from_str(r#"{"timeout": "250ms"}"#).unwrap();
        assert_eq!(w.timeout, Duration::from_millis(250));
    }

    #[test]
    fn test_serialize_humantime() {
        let w = Wrapper {
            timeout: Duration::from_secs(90),
        };
        let json = serde_json::to_string(&w).unwrap();
        assert_eq!(json, r#"{"timeout":"1m 30s"}"#);
    }
}
