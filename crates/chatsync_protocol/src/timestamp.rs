//! Server-assigned creation timestamps.

use crate::error::{ProtocolError, ProtocolResult};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Formats accepted for timestamps that carry no offset.
///
/// The first matches Python's `isoformat()`, the second SQL-style rows.
const NAIVE_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

/// A creation timestamp as assigned by the server.
///
/// The raw server text is kept verbatim so it can be echoed back in
/// `after=` queries. Ordering uses the parsed UTC instant first and the raw
/// text second, so two spellings of the same instant still order totally.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp {
    instant: DateTime<Utc>,
    raw: String,
}

impl Timestamp {
    /// Parses a server timestamp.
    ///
    /// Accepts RFC 3339, naive ISO 8601 (assumed UTC) and
    /// `YYYY-MM-DD HH:MM:SS[.f]`.
    pub fn parse(raw: &str) -> ProtocolResult<Self> {
        let trimmed = raw.trim();
        let instant = DateTime::parse_from_rfc3339(trimmed)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
            .or_else(|| {
                NAIVE_FORMATS
                    .iter()
                    .find_map(|fmt| NaiveDateTime::parse_from_str(trimmed, fmt).ok())
                    .map(|ndt| ndt.and_utc())
            })
            .ok_or_else(|| ProtocolError::InvalidTimestamp(raw.to_string()))?;

        Ok(Self {
            instant,
            raw: trimmed.to_string(),
        })
    }

    /// Creates a timestamp from integer epoch seconds.
    pub fn from_epoch_seconds(secs: i64) -> ProtocolResult<Self> {
        let instant = DateTime::from_timestamp(secs, 0)
            .ok_or_else(|| ProtocolError::InvalidTimestamp(secs.to_string()))?;
        Ok(Self {
            instant,
            raw: secs.to_string(),
        })
    }

    /// Returns the raw text as received from the server.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Returns the parsed instant.
    pub fn instant(&self) -> DateTime<Utc> {
        self.instant
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl FromStr for Timestamp {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawTimestamp {
    Text(String),
    Epoch(i64),
}

impl<'de> Deserialize<'de> for Timestamp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let parsed = match RawTimestamp::deserialize(deserializer)? {
            RawTimestamp::Text(text) => Self::parse(&text),
            RawTimestamp::Epoch(secs) => Self::from_epoch_seconds(secs),
        };
        parsed.map_err(serde::de::Error::custom)
    }
}

impl Serialize for Timestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.raw)
    }
}
