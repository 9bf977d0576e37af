//! Priority transition types carried by events

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::models::{Metadata, PriorityLevel, PrioritySource, SourceType};

/// Kind of priority transition that occurred
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransitionType {
    /// Request denied by priority rules; nothing changed
    None,
    /// Higher priority preempted lower
    Preempt,
    /// Source released, lower priority resumes
    Release,
    /// First source, or same priority level
    Switch,
    /// Emergency activation (immediate cut)
    Emergency,
    /// Nothing left active; safety content takes over
    Fallback,
}

impl TransitionType {
    pub fn as_str(self) -> &'static str {
        match self {
            TransitionType::None => "none",
            TransitionType::Preempt => "preempt",
            TransitionType::Release => "release",
            TransitionType::Switch => "switch",
            TransitionType::Emergency => "emergency",
            TransitionType::Fallback => "fallback",
        }
    }
}

impl fmt::Display for TransitionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Compact view of a priority source row inside an event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRef {
    /// Row id
    pub id: Uuid,
    pub source_id: String,
    pub source_type: SourceType,
    pub priority: PriorityLevel,
    #[serde(default, skip_serializing_if = "Metadata::is_empty")]
    pub metadata: Metadata,
}

impl From<&PrioritySource> for SourceRef {
    fn from(row: &PrioritySource) -> Self {
        Self {
            id: row.id,
            source_id: row.source_id.clone(),
            source_type: row.source_type,
            priority: row.priority,
            metadata: row.metadata.clone(),
        }
    }
}

/// Payload shared by all `priority.*` events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionPayload {
    pub station_id: String,
    pub transition_type: TransitionType,
    pub preempted: bool,
    pub requires_fade: bool,
    pub old_source: Option<SourceRef>,
    pub new_source: Option<SourceRef>,
    pub timestamp: DateTime<Utc>,
}
