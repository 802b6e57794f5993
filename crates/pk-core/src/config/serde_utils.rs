//! Shared serialization/deserialization utilities for configuration
//!
//! Durations are written as plain integers so TOML settings stay readable.

/// Duration serialized as whole seconds (u64)
pub mod duration_secs {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

/// Duration serialized as whole milliseconds (u64)
pub mod duration_millis {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let millis = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        serializer.serialize_u64(millis)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

/// Optional duration serialized as whole seconds; absent means `None`
///
/// Pair with `#[serde(default, skip_serializing_if = "Option::is_none")]`,
/// TOML has no null value.
pub mod option_duration_secs {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => serializer.serialize_some(&d.as_secs()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = Option::<u64>::deserialize(deserializer)?;
        Ok(secs.map(Duration::from_secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use std::time::Duration;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct TestConfig {
        #[serde(with = "duration_secs")]
        timeout: Duration,
        #[serde(with = "duration_millis")]
        grace: Duration,
        #[serde(
            default,
            with = "option_duration_secs",
            skip_serializing_if = "Option::is_none"
        )]
        escalate: Option<Duration>,
    }

    #[test]
    fn test_durations_from_toml() {
        let config: TestConfig = toml::from_str("timeout = 10\ngrace = 250\nescalate = 3\n").unwrap();
        assert_eq!(config.timeout, Duration::from_secs(10));
        assert_eq!(config.grace, Duration::from_millis(250));
        assert_eq!(config.escalate, Some(Duration::from_secs(3)));
    }

    #[test]
    fn test_optional_duration_absent() {
        let config: TestConfig = toml::from_str("timeout = 1\ngrace = 1\n").unwrap();
        assert_eq!(config.escalate, None);

        let text = toml::to_string(&config).unwrap();
        assert!(!text.contains("escalate"));
    }

    #[test]
    fn test_duration_secs_serialize() {
        let config = TestConfig {
            timeout: Duration::from_secs(30),
            grace: Duration::from_millis(800),
            escalate: None,
        };
        let json = serde_json::to_string(&config).unwrap();
        assert_eq!(json, r#"{"timeout":30,"grace":800}"#);
    }
}
