//! Event types for the on-air control plane
//!
//! Provides the shared event definitions and the EventBus used by the
//! priority service, the handover manager and the executor state manager.

mod transition_types;

pub use transition_types::{SourceRef, TransitionPayload, TransitionType};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::models::{ExecutorStatus, PriorityLevel};

/// On-air event types
///
/// Events are broadcast via EventBus and serialized as-is for SSE clients.
/// The `type` tag is the dotted event name returned by [`OnAirEvent::event_type`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum OnAirEvent {
    /// Emergency content forced on air
    #[serde(rename = "priority.emergency")]
    PriorityEmergency(TransitionPayload),

    /// DJ override took (or switched) the air
    #[serde(rename = "priority.override")]
    PriorityOverride(TransitionPayload),

    /// Scheduled live or automation transition
    #[serde(rename = "priority.change")]
    PriorityChange(TransitionPayload),

    /// A source was released; next active source (or fallback) resumes
    #[serde(rename = "priority.released")]
    PriorityReleased(TransitionPayload),

    /// Live session acquired priority for its mount
    #[serde(rename = "live.handover")]
    LiveHandover {
        session_id: Uuid,
        station_id: String,
        mount_id: String,
        user_id: String,
        priority: PriorityLevel,
        transition_type: TransitionType,
        requires_fade: bool,
        fade_time_ms: u64,
        /// Source that was on air before the handover
        previous_source_id: Option<String>,
        timestamp: DateTime<Utc>,
    },

    /// Live session gave priority back
    #[serde(rename = "live.released")]
    LiveReleased {
        session_id: Uuid,
        station_id: String,
        transition_type: TransitionType,
        /// Source that resumed, None when falling back
        new_source_id: Option<String>,
        timestamp: DateTime<Utc>,
    },

    /// DJ source connected to a mount
    #[serde(rename = "live.dj_connect")]
    DjConnect {
        session_id: Uuid,
        station_id: String,
        mount_id: String,
        user_id: String,
        username: String,
        priority: PriorityLevel,
        timestamp: DateTime<Utc>,
    },

    /// DJ source disconnected (priority is not released)
    #[serde(rename = "live.dj_disconnect")]
    DjDisconnect {
        session_id: Uuid,
        station_id: String,
        mount_id: String,
        user_id: String,
        /// Connected time in seconds
        duration_secs: i64,
        timestamp: DateTime<Utc>,
    },

    /// Executor health flipped on a heartbeat
    #[serde(rename = "executor.health")]
    ExecutorHealthChanged {
        station_id: String,
        healthy: bool,
        state: ExecutorStatus,
        timestamp: DateTime<Utc>,
    },
}

impl OnAirEvent {
    /// Dotted event name, also used as the SSE event name
    pub fn event_type(&self) -> &'static str {
        match self {
            OnAirEvent::PriorityEmergency(_) => "priority.emergency",
            OnAirEvent::PriorityOverride(_) => "priority.override",
            OnAirEvent::PriorityChange(_) => "priority.change",
            OnAirEvent::PriorityReleased(_) => "priority.released",
            OnAirEvent::LiveHandover { .. } => "live.handover",
            OnAirEvent::LiveReleased { .. } => "live.released",
            OnAirEvent::DjConnect { .. } => "live.dj_connect",
            OnAirEvent::DjDisconnect { .. } => "live.dj_disconnect",
            OnAirEvent::ExecutorHealthChanged { .. } => "executor.health",
        }
    }

    /// Station the event concerns
    pub fn station_id(&self) -> &str {
        match self {
            OnAirEvent::PriorityEmergency(p)
            | OnAirEvent::PriorityOverride(p)
            | OnAirEvent::PriorityChange(p)
            | OnAirEvent::PriorityReleased(p) => &p.station_id,
            OnAirEvent::LiveHandover { station_id, .. }
            | OnAirEvent::LiveReleased { station_id, .. }
            | OnAirEvent::DjConnect { station_id, .. }
            | OnAirEvent::DjDisconnect { station_id, .. }
            | OnAirEvent::ExecutorHealthChanged { station_id, .. } => station_id,
        }
    }
}

/// Central event distribution bus
///
/// Thin wrapper over `tokio::sync::broadcast`. Delivery is lossy: slow
/// subscribers lag and lose the oldest events, and emitting with no
/// subscribers is not an error for [`EventBus::emit_lossy`].
pub struct EventBus {
    tx: broadcast::Sender<OnAirEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// # Examples
    ///
    /// ```
    /// use onair_common::events::EventBus;
    ///
    /// let event_bus = EventBus::new(1000);
    /// assert_eq!(event_bus.capacity(), 1000);
    /// ```
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    ///
    /// Dropping the receiver unsubscribes.
    pub fn subscribe(&self) -> broadcast::Receiver<OnAirEvent> {
        self.tx.subscribe()
    }

    /// Subscribe to future events of the given dotted types only
    ///
    /// An empty list matches every event.
    pub fn subscribe_to<I, S>(&self, event_types: I) -> EventSubscription
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        EventSubscription {
            rx: self.tx.subscribe(),
            event_types: event_types.into_iter().map(Into::into).collect(),
        }
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Ok(subscriber_count)` if at least one subscriber exists.
    /// Returns `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: OnAirEvent,
    ) -> Result<usize, broadcast::error::SendError<OnAirEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: OnAirEvent) {
        let _ = self.tx.send(event);
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Get the configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Receiver filtered to a set of event types
pub struct EventSubscription {
    rx: broadcast::Receiver<OnAirEvent>,
    event_types: Vec<String>,
}

impl EventSubscription {
    fn matches(&self, event: &OnAirEvent) -> bool {
        self.event_types.is_empty() || self.event_types.iter().any(|t| t == event.event_type())
    }

    /// Wait for the next matching event
    ///
    /// Lag and close errors from the underlying channel are passed through.
    pub async fn recv(&mut self) -> Result<OnAirEvent, broadcast::error::RecvError> {
        loop {
            let event = self.rx.recv().await?;
            if self.matches(&event) {
                return Ok(event);
            }
        }
    }

    /// Non-blocking variant of [`EventSubscription::recv`]
    pub fn try_recv(&mut self) -> Result<OnAirEvent, broadcast::error::TryRecvError> {
        loop {
            let event = self.rx.try_recv()?;
            if self.matches(&event) {
                return Ok(event);
            }
        }
    }
}
