//! Duration text formats
//!
//! Parsing goes through `humantime`, which accepts `24h`, `1h30m`, `500ms`
//! and the stored seconds form (`"86400s"`). Rendered values use the
//! compound form (`"24h0m0s"`) that the control plane components expect.

use std::time::Duration;

pub use humantime::{parse_duration, DurationError};

/// Format as `24h0m0s`, `1m30s`, `20s` or `500ms`.
pub fn format_duration(d: Duration) -> String {
    if d.is_zero() {
        return "0s".to_string();
    }
    if d.as_secs() == 0 {
        return format!("{}ms", d.as_millis());
    }

    let secs = d.as_secs();
    let hours = secs / 3600;
    let minutes = (secs % 3600) / 60;
    let seconds = seconds_with_fraction(secs % 60, d.subsec_nanos());

    if hours > 0 {
        format!("{}h{}m{}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m{}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}

fn seconds_with_fraction(secs: u64, nanos: u32) -> String {
    if nanos == 0 {
        return secs.to_string();
    }
    let frac = format!("{:09}", nanos);
    format!("{}.{}", secs, frac.trim_end_matches('0'))
}

/// Serde adapter storing a duration as a seconds string (`"86400s"`).
pub mod seconds {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if duration.subsec_nanos() == 0 {
            serializer.serialize_str(&format!("{}s", duration.as_secs()))
        } else {
            serializer.serialize_str(&humantime::format_duration(*duration).to_string())
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(s.trim()).map_err(serde::de::Error::custom)
    }
}

/// Serde adapter for the compound form, used by the TOML config file.
pub mod compound {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        // Fractional seconds would not parse back from the compound form
        if duration.subsec_nanos() == 0 {
            serializer.serialize_str(&super::format_duration(*duration))
        } else {
            serializer.serialize_str(&humantime::format_duration(*duration).to_string())
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(s.trim()).map_err(serde::de::Error::custom)
    }
}
