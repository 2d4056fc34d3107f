//! Wire shapes for the remote protocol.
//!
//! ```text
//! GET    /sync?last_sync_timestamp=<ISO8601>  -> { goals: [GoalDto], server_timestamp }
//! POST   /goals         GoalDto
//! PUT    /goals/{id}    GoalDto
//! DELETE /goals/{id}
//! ```
//!
//! Timestamps are accepted with a `Z` suffix, an explicit offset, or no
//! offset at all (read as UTC). Outgoing timestamps always carry an
//! explicit `+00:00` offset at microsecond precision.

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::SyncError;

/// A full-record snapshot of a goal as exchanged with the remote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GoalDto {
    pub id: Uuid,
    pub name: String,
    pub target_value: i64,
    pub current_value: i64,
    #[serde(with = "iso8601")]
    pub updated_at: DateTime<Utc>,
}

/// Response body of `GET /sync`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSet {
    /// Snapshots with `updated_at > cursor`, ascending by `updated_at`
    #[serde(default)]
    pub goals: Vec<GoalDto>,
    /// Remote clock at query time; becomes the next cursor
    #[serde(with = "iso8601")]
    pub server_timestamp: DateTime<Utc>,
}

/// Parse an ISO-8601 timestamp as sent by the remote.
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, SyncError> {
    let trimmed = raw.trim();
    let normalized = match trimmed.strip_suffix('Z').or_else(|| trimmed.strip_suffix('z')) {
        Some(stem) => format!("{}+00:00", stem),
        None => trimmed.to_string(),
    };

    if let Ok(ts) = DateTime::parse_from_rfc3339(&normalized) {
        return Ok(ts.with_timezone(&Utc));
    }
    // Space-separated date/time as produced by some serializers
    if let Ok(ts) = DateTime::parse_from_str(&normalized, "%Y-%m-%d %H:%M:%S%.f%:z") {
        return Ok(ts.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(&normalized, format) {
            return Ok(naive.and_utc());
        }
    }
    Err(SyncError::Decoding(format!("invalid ISO-8601 timestamp '{}'", raw)))
}

/// Format a timestamp for the wire: microseconds, explicit UTC offset.
#[must_use]
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, false)
}

pub(crate) mod iso8601 {
    use chrono::{DateTime, Utc};
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::format_timestamp(ts))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        super::parse_timestamp(&raw).map_err(de::Error::custom)
    }
}
