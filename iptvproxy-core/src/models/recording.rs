use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::Error;

/// Lifecycle state of a recording
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordingStatus {
    Scheduled,
    Live,
    Persisted,
}

impl RecordingStatus {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Scheduled => "scheduled",
            Self::Live => "live",
            Self::Persisted => "persisted",
        }
    }
}

impl fmt::Display for RecordingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordingStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "scheduled" => Ok(Self::Scheduled),
            "live" => Ok(Self::Live),
            "persisted" => Ok(Self::Persisted),
            other => Err(Error::InvalidInput(format!("Unknown recording status: {other}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recording {
    pub id: Uuid,
    pub provider: String,
    pub channel_number: u32,
    pub channel_name: String,
    pub program_title: String,
    pub start_utc: DateTime<Utc>,
    pub stop_utc: DateTime<Utc>,
    pub status: RecordingStatus,
}

impl Recording {
    /// New SCHEDULED recording with a fresh id.
    pub fn new(
        provider: impl Into<String>,
        channel_number: u32,
        channel_name: impl Into<String>,
        program_title: impl Into<String>,
        start_utc: DateTime<Utc>,
        stop_utc: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            provider: provider.into().to_lowercase(),
            channel_number,
            channel_name: channel_name.into(),
            program_title: program_title.into(),
            start_utc,
            stop_utc,
            status: RecordingStatus::Scheduled,
        }
    }

    #[must_use]
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.start_utc <= now
    }

    #[must_use]
    pub fn has_ended(&self, now: DateTime<Utc>) -> bool {
        self.stop_utc <= now
    }

    /// Index label, e.g. `News - [2024-01-01 10:00:00 - 2024-01-01 11:00:00]`
    #[must_use]
    pub fn label(&self) -> String {
        format!(
            "{} - [{} - {}]",
            self.program_title,
            self.start_utc.format("%Y-%m-%d %H:%M:%S"),
            self.stop_utc.format("%Y-%m-%d %H:%M:%S")
        )
    }
}
