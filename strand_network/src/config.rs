//! Helpers shared by the configuration structs of the networking crates.

/// (De)serialise a [`Duration`](std::time::Duration) as a number of seconds.
///
/// Fractional values are accepted, so `0.25` is a quarter of a second.
pub mod duration_secs {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        if !secs.is_finite() || secs < 0.0 {
            return Err(D::Error::custom(format!("invalid duration: {}", secs)));
        }
        Ok(Duration::from_secs_f64(secs))
    }
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};
    use std::time::Duration;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Timeouts {
        #[serde(with = "super::duration_secs")]
        idle: Duration,
    }

    #[test]
    fn durations_are_seconds() {
        let parsed: Timeouts = serde_json::from_str(r#"{"idle": 1.5}"#).unwrap();
        assert_eq!(parsed.idle, Duration::from_millis(1500));

        assert!(serde_json::from_str::<Timeouts>(r#"{"idle": -1}"#).is_err());
        assert_eq!(serde_json::to_string(&parsed).unwrap(), r#"{"idle":1.5}"#);
    }
}
