use serde::Deserialize;
use std::time::Duration;

/// Deserialize a human readable duration such as `"90s"`, `"30m"` or `"1h 30m"`.
pub fn deserialize_humantime_duration<'de, D>(d: D) -> Result<Duration, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = String::deserialize(d)?;
    humantime::parse_duration(raw.trim()).map_err(serde::de::Error::custom)
}

/// Raise `value` to `floor` when it is smaller.
pub fn clamp_floor(value: Duration, floor: Duration) -> Duration {
    value.max(floor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Deserialize, Debug)]
    struct Holder {
        #[serde(deserialize_with = "deserialize_humantime_duration")]
        timeout: Duration,
    }

    #[test]
    fn test_parse_humantime() {
        let holder: Holder = serde_json::from_str(r#"{"timeout": "1h 30m"}"#).unwrap();
        assert_eq!(holder.timeout, Duration::from_secs(90 * 60));
    }

    #[test]
    fn test_parse_invalid_duration_fails() {
        let res = serde_json::from_str::<Holder>(r#"{"timeout": "soon"}"#);
        assert!(res.is_err());
    }

    #[test]
    fn test_clamp_floor() {
        let floor = Duration::from_secs(120);
        assert_eq!(clamp_floor(Duration::from_secs(5), floor), floor);
        assert_eq!(
            clamp_floor(Duration::from_secs(600), floor),
            Duration::from_secs(600)
        );
    }
}
