//! Priority levels, source types and priority source rows

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

use super::Metadata;

/// Five-tier priority ladder for on-air sources
///
/// Lower number = higher priority. `Ord` follows the number, so
/// `Emergency < LiveOverride < ... < Fallback`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub enum PriorityLevel {
    /// EAS and emergency broadcasts
    Emergency = 0,
    /// Manual DJ takeover
    LiveOverride = 1,
    /// Scheduled live show
    LiveScheduled = 2,
    /// Automated playlist rotation
    Automation = 3,
    /// Last-resort safety content
    Fallback = 4,
}

/// Raised when an integer is outside the priority ladder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid priority level: {0}")]
pub struct InvalidPriorityLevel(pub i64);

impl PriorityLevel {
    /// All levels, highest priority first
    pub const ALL: [PriorityLevel; 5] = [
        PriorityLevel::Emergency,
        PriorityLevel::LiveOverride,
        PriorityLevel::LiveScheduled,
        PriorityLevel::Automation,
        PriorityLevel::Fallback,
    ];

    /// Numeric rank as stored in the database
    pub fn as_i64(self) -> i64 {
        self as i64
    }

    /// Human-readable level name
    pub fn name(self) -> &'static str {
        match self {
            PriorityLevel::Emergency => "Emergency",
            PriorityLevel::LiveOverride => "Live Override",
            PriorityLevel::LiveScheduled => "Live Scheduled",
            PriorityLevel::Automation => "Automation",
            PriorityLevel::Fallback => "Fallback",
        }
    }

    /// Whether a DJ session may hold this level
    pub fn is_live(self) -> bool {
        matches!(self, PriorityLevel::LiveOverride | PriorityLevel::LiveScheduled)
    }
}

impl TryFrom<i64> for PriorityLevel {
    type Error = InvalidPriorityLevel;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(PriorityLevel::Emergency),
            1 => Ok(PriorityLevel::LiveOverride),
            2 => Ok(PriorityLevel::LiveScheduled),
            3 => Ok(PriorityLevel::Automation),
            4 => Ok(PriorityLevel::Fallback),
            other => Err(InvalidPriorityLevel(other)),
        }
    }
}

impl From<PriorityLevel> for i64 {
    fn from(level: PriorityLevel) -> Self {
        level.as_i64()
    }
}

impl fmt::Display for PriorityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Kind of content a priority source plays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    /// Live input stream from a DJ
    Live,
    /// Single media item from the library
    Media,
    /// EAS or emergency content
    Emergency,
    /// Remote HTTP stream
    Webstream,
    /// Safety playlist
    Fallback,
}

impl SourceType {
    pub fn as_str(self) -> &'static str {
        match self {
            SourceType::Live => "live",
            SourceType::Media => "media",
            SourceType::Emergency => "emergency",
            SourceType::Webstream => "webstream",
            SourceType::Fallback => "fallback",
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "live" => Ok(SourceType::Live),
            "media" => Ok(SourceType::Media),
            "emergency" => Ok(SourceType::Emergency),
            "webstream" => Ok(SourceType::Webstream),
            "fallback" => Ok(SourceType::Fallback),
            other => Err(format!("unknown source type: {}", other)),
        }
    }
}

/// One (de)activation record of a broadcast source for a station
///
/// Rows are append-only: a transition inserts a new row and soft-deactivates
/// the previous one. Several rows may be active at once at different levels;
/// the active row with the smallest priority number is the one on air.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrioritySource {
    pub id: Uuid,
    pub station_id: String,
    pub mount_id: String,
    pub priority: PriorityLevel,
    pub source_type: SourceType,
    /// Media, webstream or live session this row points at
    pub source_id: String,
    #[serde(default)]
    pub metadata: Metadata,
    pub active: bool,
    pub activated_at: DateTime<Utc>,
    pub deactivated_at: Option<DateTime<Utc>>,
}

impl PrioritySource {
    /// New active row, activated at `now`
    pub fn activate(
        station_id: impl Into<String>,
        mount_id: impl Into<String>,
        priority: PriorityLevel,
        source_type: SourceType,
        source_id: impl Into<String>,
        metadata: Metadata,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            station_id: station_id.into(),
            mount_id: mount_id.into(),
            priority,
            source_type,
            source_id: source_id.into(),
            metadata,
            active: true,
            activated_at: now,
            deactivated_at: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active && self.deactivated_at.is_none()
    }

    /// Soft-deactivate; the row itself is kept for history
    pub fn deactivate(&mut self, now: DateTime<Utc>) {
        self.active = false;
        self.deactivated_at = Some(now);
    }

    pub fn is_emergency(&self) -> bool {
        self.priority == PriorityLevel::Emergency
    }

    pub fn is_live(&self) -> bool {
        self.source_type == SourceType::Live || self.priority.is_live()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_ordering_follows_number() {
        assert!(PriorityLevel::Emergency < PriorityLevel::LiveOverride);
        assert!(PriorityLevel::LiveOverride < PriorityLevel::LiveScheduled);
        assert!(PriorityLevel::LiveScheduled < PriorityLevel::Automation);
        assert!(PriorityLevel::Automation < PriorityLevel::Fallback);
    }

    #[test]
    fn test_priority_try_from_range() {
        for level in PriorityLevel::ALL {
            assert_eq!(PriorityLevel::try_from(level.as_i64()), Ok(level));
        }
        assert_eq!(PriorityLevel::try_from(5), Err(InvalidPriorityLevel(5)));
        assert_eq!(PriorityLevel::try_from(-1), Err(InvalidPriorityLevel(-1)));
    }

    #[test]
    fn test_priority_serializes_as_number() {
        let json = serde_json::to_string(&PriorityLevel::LiveScheduled).unwrap();
        assert_eq!(json, "2");
        assert!(serde_json::from_str::<PriorityLevel>("9").is_err());
    }

    #[test]
    fn test_source_type_names() {
        assert_eq!(SourceType::Live.to_string(), "live");
        assert_eq!("emergency".parse::<SourceType>(), Ok(SourceType::Emergency));
        assert!("tape".parse::<SourceType>().is_err());
    }

    #[test]
    fn test_deactivate_keeps_row() {
        let now = Utc::now();
        let mut row = PrioritySource::activate(
            "station-1",
            "mount-1",
            PriorityLevel::Automation,
            SourceType::Media,
            "media-1",
            Metadata::new(),
            now,
        );
        assert!(row.is_active());
        assert!(!row.is_live());

        row.deactivate(now);
        assert!(!row.is_active());
        assert_eq!(row.deactivated_at, Some(now));
        assert_eq!(row.source_id, "media-1");
    }

    #[test]
    fn test_is_live_by_level_or_type() {
        let now = Utc::now();
        let scheduled = PrioritySource::activate(
            "s", "m", PriorityLevel::LiveScheduled, SourceType::Media, "x", Metadata::new(), now,
        );
        let live_type = PrioritySource::activate(
            "s", "m", PriorityLevel::Automation, SourceType::Live, "y", Metadata::new(), now,
        );
        assert!(scheduled.is_live());
        assert!(live_type.is_live());
    }
}
