//! Executor (audio engine) telemetry snapshots

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::{Metadata, PriorityLevel};

/// Engine state as self-reported in heartbeats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutorStatus {
    Idle,
    Starting,
    Playing,
    Underrun,
    Stopped,
}

impl ExecutorStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ExecutorStatus::Idle => "idle",
            ExecutorStatus::Starting => "starting",
            ExecutorStatus::Playing => "playing",
            ExecutorStatus::Underrun => "underrun",
            ExecutorStatus::Stopped => "stopped",
        }
    }
}

impl fmt::Display for ExecutorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutorStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "idle" => Ok(ExecutorStatus::Idle),
            "starting" => Ok(ExecutorStatus::Starting),
            "playing" => Ok(ExecutorStatus::Playing),
            "underrun" => Ok(ExecutorStatus::Underrun),
            "stopped" => Ok(ExecutorStatus::Stopped),
            other => Err(format!("unknown executor state: {}", other)),
        }
    }
}

/// Latest telemetry snapshot for one station (latest-wins, no history)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutorState {
    pub station_id: String,
    pub mount_id: String,
    pub state: ExecutorStatus,
    pub current_priority: Option<PriorityLevel>,
    pub current_source_id: Option<String>,
    pub next_source_id: Option<String>,
    /// Left channel RMS level in dBFS (-60 to 0)
    pub audio_level_l: f64,
    /// Right channel RMS level in dBFS (-60 to 0)
    pub audio_level_r: f64,
    pub loudness_lufs: f64,
    pub buffer_depth_ms: i64,
    pub underrun_count: i64,
    pub last_heartbeat: DateTime<Utc>,
    #[serde(default)]
    pub metadata: Metadata,
}

impl ExecutorState {
    /// Heartbeat is younger than `threshold` as seen at `now`
    pub fn is_healthy_at(&self, now: DateTime<Utc>, threshold: std::time::Duration) -> bool {
        match (now - self.last_heartbeat).to_std() {
            Ok(age) => age < threshold,
            // Heartbeat stamped in the future (clock skew): treat as fresh
            Err(_) => true,
        }
    }

    pub fn is_healthy(&self, threshold: std::time::Duration) -> bool {
        self.is_healthy_at(Utc::now(), threshold)
    }

    pub fn is_playing(&self) -> bool {
        self.state == ExecutorStatus::Playing
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn snapshot(state: ExecutorStatus, last_heartbeat: DateTime<Utc>) -> ExecutorState {
        ExecutorState {
            station_id: "station-1".to_string(),
            mount_id: "mount-1".to_string(),
            state,
            current_priority: Some(PriorityLevel::Automation),
            current_source_id: None,
            next_source_id: None,
            audio_level_l: -18.0,
            audio_level_r: -18.5,
            loudness_lufs: -16.0,
            buffer_depth_ms: 2000,
            underrun_count: 0,
            last_heartbeat,
            metadata: Metadata::new(),
        }
    }

    #[test]
    fn test_health_threshold() {
        let beat = Utc::now();
        let s = snapshot(ExecutorStatus::Playing, beat);
        let threshold = std::time::Duration::from_secs(10);

        assert!(s.is_healthy_at(beat + Duration::seconds(9), threshold));
        assert!(!s.is_healthy_at(beat + Duration::seconds(10), threshold));
        assert!(!s.is_healthy_at(beat + Duration::minutes(5), threshold));
    }

    #[test]
    fn test_future_heartbeat_counts_as_healthy() {
        let beat = Utc::now();
        let s = snapshot(ExecutorStatus::Idle, beat + Duration::seconds(3));
        assert!(s.is_healthy_at(beat, std::time::Duration::from_secs(10)));
    }

    #[test]
    fn test_is_playing_only_when_playing() {
        let beat = Utc::now();
        assert!(snapshot(ExecutorStatus::Playing, beat).is_playing());
        for state in [
            ExecutorStatus::Idle,
            ExecutorStatus::Starting,
            ExecutorStatus::Underrun,
            ExecutorStatus::Stopped,
        ] {
            assert!(!snapshot(state, beat).is_playing(), "{} is not playing", state);
        }
    }

    #[test]
    fn test_status_parse() {
        assert_eq!("underrun".parse::<ExecutorStatus>(), Ok(ExecutorStatus::Underrun));
        assert!("fading".parse::<ExecutorStatus>().is_err());
    }
}
