//! Shared serialization/deserialization utilities for configuration
//!
//! Durations are stored as plain integers so the TOML file stays readable.

/// Serialize `std::time::Duration` as whole seconds (u64)
///
/// # Example
///
/// ```ignore
/// #[derive(Serialize, Deserialize)]
/// struct Config {
///     #[serde(with = "st_core::config::serde_utils::duration_secs")]
///     timeout: Duration,
/// }
/// ```
pub mod duration_secs {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    /// Serialize a Duration as seconds (u64)
    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    /// Deserialize a Duration from seconds (u64)
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

/// Serialize `std::time::Duration` as milliseconds (u64), for sub-second knobs
pub mod duration_millis {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use std::time::Duration;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Timings {
        #[serde(with = "duration_secs")]
        period: Duration,
        #[serde(with = "duration_millis")]
        grace: Duration,
    }

    #[test]
    fn test_durations_serialize_as_integers() {
        let timings = Timings {
            period: Duration::from_secs(3600),
            grace: Duration::from_millis(250),
        };
        let json = serde_json::to_string(&timings).unwrap();
        assert_eq!(json, r#"{"period":3600,"grace":250}"#);
    }

    #[test]
    fn test_durations_deserialize_from_integers() {
        let timings: Timings = serde_json::from_str(r#"{"period":60,"grace":1500}"#).unwrap();
        assert_eq!(timings.period, Duration::from_secs(60));
        assert_eq!(timings.grace, Duration::from_millis(1500));
    }
}
