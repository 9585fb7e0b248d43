//! Duration parsing and serde codecs for corral.
//!
//! Config files and session records need durations that are both
//! human-writable (`"30s"`, `"5m"`) and round-trippable through JSON, so
//! this crate standardizes on humantime strings on the wire and
//! `std::time::Duration` in memory.

use std::time::Duration;

use serde::{Deserialize, Deserializer, Serializer};

/// Parse a duration from either a humantime string (`"30s"`) or a bare
/// number of milliseconds, accepting whichever shape the caller wrote.
pub fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum DurationHelper {
        String(String),
        Millis(u64),
    }

    match DurationHelper::deserialize(deserializer)? {
        DurationHelper::String(s) => humantime::parse_duration(&s)
            .map_err(|e| serde::de::Error::custom(format!("invalid duration {s:?}: {e}"))),
        DurationHelper::Millis(ms) => Ok(Duration::from_millis(ms)),
    }
}

/// Serialize a Duration as a humantime string so config files and session
/// snapshots stay human-readable.
pub fn serialize_duration<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&humantime::format_duration(*duration).to_string())
}

/// Same as [`deserialize_duration`] but for an `Option<Duration>` field.
pub fn deserialize_duration_opt<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Helper {
        String(String),
        Millis(u64),
        Null,
    }

    match Option::<Helper>::deserialize(deserializer)? {
        None | Some(Helper::Null) => Ok(None),
        Some(Helper::String(s)) => humantime::parse_duration(&s)
            .map(Some)
            .map_err(|e| serde::de::Error::custom(format!("invalid duration {s:?}: {e}"))),
        Some(Helper::Millis(ms)) => Ok(Some(Duration::from_millis(ms))),
    }
}

/// Same as [`serialize_duration`] but for an `Option<Duration>` field.
pub fn serialize_duration_opt<S>(
    duration: &Option<Duration>,
    serializer: S,
) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    match duration {
        Some(d) => serializer.serialize_str(&humantime::format_duration(*d).to_string()),
        None => serializer.serialize_none(),
    }
}

/// Parse a free-standing CLI/config duration argument (`--retry-delay 2s`).
pub fn parse_duration_arg(s: &str) -> Result<Duration, String> {
    humantime::parse_duration(s).map_err(|e| format!("invalid duration {s:?}: {e}"))
}
