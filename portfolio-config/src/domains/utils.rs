//! Utility functions and helpers for configuration

use serde::{Deserialize, Deserializer, Serializer};
use std::time::Duration;

pub fn default_false() -> bool {
    false
}

/// Serde helper module for optional Duration serialization as seconds.
///
/// Whole seconds are written as integers; fractions are accepted and kept.
pub mod serde_duration_option {
    use super::*;
    use serde::de::Error;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) if d.subsec_nanos() == 0 => serializer.serialize_some(&d.as_secs()),
            Some(d) => serializer.serialize_some(&d.as_secs_f64()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let seconds: Option<f64> = Option::deserialize(deserializer)?;
        seconds
            .map(|s| {
                Duration::try_from_secs_f64(s)
                    .map_err(|e| D::Error::custom(format!("invalid duration {}: {}", s, e)))
            })
            .transpose()
    }
}

/// Serde helper module for Duration serialization as milliseconds
pub mod serde_duration_millis {
    use super::*;

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
