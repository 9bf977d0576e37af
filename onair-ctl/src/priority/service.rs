//! Priority service: named operations over the resolver plus event emission

use chrono::Utc;
use onair_common::events::{EventBus, OnAirEvent, SourceRef, TransitionPayload, TransitionType};
use onair_common::models::{Metadata, PriorityLevel, PrioritySource, SourceType};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::resolver::{Resolver, TransitionRequest, TransitionResult};
use crate::error::Result;

/// Which `priority.*` event a transition publishes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PriorityEventKind {
    Emergency,
    Override,
    Change,
    Released,
}

/// Front door for priority changes
///
/// Every operation other than a denied one (`TransitionType::None`) publishes
/// a `priority.*` event. Publication is lossy and never fails the call.
pub struct PriorityService {
    resolver: Arc<Resolver>,
    events: Arc<EventBus>,
}

impl PriorityService {
    pub fn new(resolver: Arc<Resolver>, events: Arc<EventBus>) -> Self {
        Self { resolver, events }
    }

    pub fn resolver(&self) -> &Arc<Resolver> {
        &self.resolver
    }

    /// Emergency content, always preempts and always publishes
    pub async fn insert_emergency(
        &self,
        station_id: &str,
        mount_id: &str,
        media_id: &str,
        metadata: Metadata,
    ) -> Result<TransitionResult> {
        warn!(station_id, media_id, "emergency broadcast requested");

        let result = self
            .resolver
            .insert_emergency(station_id, mount_id, media_id, metadata)
            .await
            .inspect_err(|e| error!(station_id, error = %e, "emergency insertion failed"))?;

        self.publish(PriorityEventKind::Emergency, station_id, &result);
        Ok(result)
    }

    /// DJ override; denied silently when something of equal or higher priority is on
    pub async fn start_override(
        &self,
        station_id: &str,
        mount_id: &str,
        source_type: SourceType,
        source_id: &str,
        metadata: Metadata,
    ) -> Result<TransitionResult> {
        info!(station_id, source_id, "live override requested");
        self.transition_and_publish(
            PriorityEventKind::Override,
            TransitionRequest {
                station_id: station_id.to_string(),
                mount_id: mount_id.to_string(),
                new_priority: PriorityLevel::LiveOverride,
                source_type,
                source_id: source_id.to_string(),
                metadata,
                force_preempt: false,
            },
        )
        .await
    }

    /// Scheduled live show
    pub async fn start_scheduled_live(
        &self,
        station_id: &str,
        mount_id: &str,
        source_id: &str,
        metadata: Metadata,
    ) -> Result<TransitionResult> {
        info!(station_id, source_id, "scheduled live show requested");
        self.transition_and_publish(
            PriorityEventKind::Change,
            TransitionRequest {
                station_id: station_id.to_string(),
                mount_id: mount_id.to_string(),
                new_priority: PriorityLevel::LiveScheduled,
                source_type: SourceType::Live,
                source_id: source_id.to_string(),
                metadata,
                force_preempt: false,
            },
        )
        .await
    }

    /// Automation rotation
    pub async fn activate_automation(
        &self,
        station_id: &str,
        mount_id: &str,
        source_type: SourceType,
        source_id: &str,
        metadata: Metadata,
    ) -> Result<TransitionResult> {
        self.transition_and_publish(
            PriorityEventKind::Change,
            TransitionRequest {
                station_id: station_id.to_string(),
                mount_id: mount_id.to_string(),
                new_priority: PriorityLevel::Automation,
                source_type,
                source_id: source_id.to_string(),
                metadata,
                force_preempt: false,
            },
        )
        .await
    }

    /// Release a source; always publishes `priority.released`
    pub async fn release(&self, station_id: &str, source_id: &str) -> Result<TransitionResult> {
        info!(station_id, source_id, "releasing priority source");

        let result = self
            .resolver
            .release(station_id, source_id)
            .await
            .inspect_err(|e| error!(station_id, source_id, error = %e, "release failed"))?;

        self.publish(PriorityEventKind::Released, station_id, &result);
        Ok(result)
    }

    /// Undo a committed transition; publishes `priority.released`
    pub async fn revert(&self, station_id: &str, applied: &TransitionResult) -> Result<TransitionResult> {
        let result = self
            .resolver
            .revert(station_id, applied)
            .await
            .inspect_err(|e| error!(station_id, error = %e, "revert failed"))?;

        self.publish(PriorityEventKind::Released, station_id, &result);
        Ok(result)
    }

    pub async fn get_current(&self, station_id: &str) -> Result<PrioritySource> {
        self.resolver.get_current_source(station_id).await
    }

    pub async fn get_active(&self, station_id: &str) -> Result<Vec<PrioritySource>> {
        self.resolver.get_active_sources_by_priority(station_id).await
    }

    pub async fn history(&self, station_id: &str, limit: usize) -> Result<Vec<PrioritySource>> {
        self.resolver.history(station_id, limit).await
    }

    async fn transition_and_publish(
        &self,
        kind: PriorityEventKind,
        req: TransitionRequest,
    ) -> Result<TransitionResult> {
        let station_id = req.station_id.clone();
        let result = self
            .resolver
            .transition(req)
            .await
            .inspect_err(|e| error!(station_id = %station_id, error = %e, "priority transition failed"))?;

        if result.transition_type != TransitionType::None {
            self.publish(kind, &station_id, &result);
        }
        Ok(result)
    }

    fn publish(&self, kind: PriorityEventKind, station_id: &str, result: &TransitionResult) {
        let payload = TransitionPayload {
            station_id: station_id.to_string(),
            transition_type: result.transition_type,
            preempted: result.preempted,
            requires_fade: result.requires_fade,
            old_source: result.old_source.as_ref().map(SourceRef::from),
            new_source: result.new_source.as_ref().map(SourceRef::from),
            timestamp: Utc::now(),
        };

        let event = match kind {
            PriorityEventKind::Emergency => OnAirEvent::PriorityEmergency(payload),
            PriorityEventKind::Override => OnAirEvent::PriorityOverride(payload),
            PriorityEventKind::Change => OnAirEvent::PriorityChange(payload),
            PriorityEventKind::Released => OnAirEvent::PriorityReleased(payload),
        };

        debug!(event_type = event.event_type(), station_id, "published priority event");
        self.events.emit_lossy(event);
    }
}
