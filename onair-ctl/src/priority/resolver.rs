//! Priority arbitration and transactional source transitions

use chrono::{DateTime, Utc};
use onair_common::events::TransitionType;
use onair_common::models::{Metadata, PriorityLevel, PrioritySource, SourceType};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::locks::StationLocks;
use crate::error::{Error, Result};
use crate::store::{PriorityStore, PriorityTx};

/// Request to change the active priority source of a station
#[derive(Debug, Clone)]
pub struct TransitionRequest {
    pub station_id: String,
    pub mount_id: String,
    pub new_priority: PriorityLevel,
    pub source_type: SourceType,
    pub source_id: String,
    pub metadata: Metadata,
    /// Skip the preemption check (equal or lower priority may take over)
    pub force_preempt: bool,
}

/// Outcome of a transition or release
///
/// `TransitionType::None` means the request was denied by priority rules and
/// nothing was written.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransitionResult {
    pub transition_type: TransitionType,
    /// A previously active source was deactivated
    pub preempted: bool,
    /// Downstream engine should crossfade rather than cut
    pub requires_fade: bool,
    pub old_source: Option<PrioritySource>,
    pub new_source: Option<PrioritySource>,
}

impl TransitionResult {
    fn denied(current: PrioritySource) -> Self {
        Self {
            transition_type: TransitionType::None,
            preempted: false,
            requires_fade: false,
            old_source: Some(current),
            new_source: None,
        }
    }

    pub fn is_denied(&self) -> bool {
        self.transition_type == TransitionType::None
    }
}

/// Convert a raw priority number, rejecting anything off the ladder
pub fn parse_priority(raw: i64) -> Result<PriorityLevel> {
    PriorityLevel::try_from(raw).map_err(|e| Error::InvalidPriority(e.to_string()))
}

/// Whether `new_priority` may replace `current`
///
/// Strictly higher priority (lower number) is required; equal cannot preempt.
pub fn can_preempt(current: Option<&PrioritySource>, new_priority: PriorityLevel) -> bool {
    match current {
        None => true,
        Some(current) => new_priority < current.priority,
    }
}

/// Classify a committed transition
pub fn classify(old: Option<&PrioritySource>, new_priority: PriorityLevel) -> TransitionType {
    let Some(old) = old else {
        return TransitionType::Switch;
    };

    if new_priority == PriorityLevel::Emergency {
        TransitionType::Emergency
    } else if new_priority < old.priority {
        TransitionType::Preempt
    } else if new_priority == old.priority {
        TransitionType::Switch
    } else {
        TransitionType::Release
    }
}

/// Fade rule: emergencies cut, first sources start cold, everything else fades
pub fn requires_fade(old: Option<&PrioritySource>, transition_type: TransitionType) -> bool {
    transition_type != TransitionType::Emergency && old.is_some()
}

enum Applied {
    Denied(PrioritySource),
    Changed {
        old: Option<PrioritySource>,
        new: PrioritySource,
    },
}

/// Arbitrates which source is on air for each station
pub struct Resolver {
    store: Arc<dyn PriorityStore>,
    locks: StationLocks,
}

impl Resolver {
    pub fn new(store: Arc<dyn PriorityStore>) -> Self {
        Self {
            store,
            locks: StationLocks::new(),
        }
    }

    /// Active source with the lowest priority number
    pub async fn get_current_source(&self, station_id: &str) -> Result<PrioritySource> {
        self.get_active_sources_by_priority(station_id)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| Error::NoActiveSources(station_id.to_string()))
    }

    /// All active sources, highest priority first
    pub async fn get_active_sources_by_priority(&self, station_id: &str) -> Result<Vec<PrioritySource>> {
        self.store
            .active_sources(station_id)
            .await
            .map_err(|e| Error::store("query active sources", e))
    }

    /// Audit trail: every row for the station, newest first
    pub async fn history(&self, station_id: &str, limit: usize) -> Result<Vec<PrioritySource>> {
        self.store
            .history(station_id, limit)
            .await
            .map_err(|e| Error::store("query priority history", e))
    }

    /// Activate a new source, deactivating the current one if allowed
    pub async fn transition(&self, req: TransitionRequest) -> Result<TransitionResult> {
        let _station = self.locks.lock(&req.station_id).await;

        let mut tx = self
            .store
            .begin()
            .await
            .map_err(|e| Error::store("begin transaction", e))?;

        let now = Utc::now();
        let applied = match apply_transition(tx.as_mut(), &req, now).await {
            Ok(applied) => applied,
            Err(e) => {
                abort(tx, &req.station_id).await;
                return Err(e);
            }
        };

        let (old, new) = match applied {
            Applied::Denied(current) => {
                abort(tx, &req.station_id).await;
                debug!(
                    station_id = %req.station_id,
                    current_priority = current.priority.as_i64(),
                    requested_priority = req.new_priority.as_i64(),
                    "priority transition denied"
                );
                return Ok(TransitionResult::denied(current));
            }
            Applied::Changed { old, new } => (old, new),
        };

        tx.commit()
            .await
            .map_err(|e| Error::store("commit transaction", e))?;

        let transition_type = classify(old.as_ref(), new.priority);
        let requires_fade = requires_fade(old.as_ref(), transition_type);

        info!(
            station_id = %req.station_id,
            transition_type = %transition_type,
            new_priority = new.priority.as_i64(),
            preempted = old.is_some(),
            requires_fade,
            "priority transition completed"
        );

        Ok(TransitionResult {
            transition_type,
            preempted: old.is_some(),
            requires_fade,
            old_source: old,
            new_source: Some(new),
        })
    }

    /// Deactivate `source_id` and hand the air to the next active source
    ///
    /// The next source is not revalidated: a stale lower-priority row that is
    /// still marked active resumes as-is. A source that is no longer active
    /// is `SourceNotFound`; its history row is left untouched.
    pub async fn release(&self, station_id: &str, source_id: &str) -> Result<TransitionResult> {
        let _station = self.locks.lock(station_id).await;

        let mut tx = self
            .store
            .begin()
            .await
            .map_err(|e| Error::store("begin transaction", e))?;

        let (released, next) = match apply_release(tx.as_mut(), station_id, source_id, Utc::now()).await {
            Ok(rows) => rows,
            Err(e) => {
                abort(tx, station_id).await;
                return Err(e);
            }
        };

        tx.commit()
            .await
            .map_err(|e| Error::store("commit transaction", e))?;

        let transition_type = if next.is_some() {
            TransitionType::Release
        } else {
            TransitionType::Fallback
        };

        info!(
            station_id,
            released_source_id = source_id,
            transition_type = %transition_type,
            has_next_source = next.is_some(),
            "priority source released"
        );

        Ok(TransitionResult {
            transition_type,
            preempted: false,
            requires_fade: true,
            old_source: Some(released),
            new_source: next,
        })
    }

    /// Force an emergency source on air, cutting whatever is playing
    pub async fn insert_emergency(
        &self,
        station_id: &str,
        mount_id: &str,
        source_id: &str,
        metadata: Metadata,
    ) -> Result<TransitionResult> {
        let mut result = self
            .transition(TransitionRequest {
                station_id: station_id.to_string(),
                mount_id: mount_id.to_string(),
                new_priority: PriorityLevel::Emergency,
                source_type: SourceType::Emergency,
                source_id: source_id.to_string(),
                metadata,
                force_preempt: true,
            })
            .await?;

        result.transition_type = TransitionType::Emergency;
        result.requires_fade = false;
        Ok(result)
    }

    /// Undo a committed transition
    ///
    /// Takes `applied.new_source` off air and reactivates the source it
    /// preempted. Whatever outranks both in the meantime stays current.
    pub async fn revert(&self, station_id: &str, applied: &TransitionResult) -> Result<TransitionResult> {
        let new = applied.new_source.as_ref().ok_or_else(|| Error::SourceNotFound {
            station_id: station_id.to_string(),
            source_id: "<denied transition>".to_string(),
        })?;

        let _station = self.locks.lock(station_id).await;

        let mut tx = self
            .store
            .begin()
            .await
            .map_err(|e| Error::store("begin transaction", e))?;

        let (reverted, on_air) =
            match apply_revert(tx.as_mut(), station_id, new, applied.old_source.as_ref(), Utc::now()).await {
                Ok(rows) => rows,
                Err(e) => {
                    abort(tx, station_id).await;
                    return Err(e);
                }
            };

        tx.commit()
            .await
            .map_err(|e| Error::store("commit transaction", e))?;

        let transition_type = if on_air.is_some() {
            TransitionType::Release
        } else {
            TransitionType::Fallback
        };

        info!(
            station_id,
            reverted_source_id = %reverted.source_id,
            restored_source_id = applied.old_source.as_ref().map(|s| s.source_id.as_str()).unwrap_or("-"),
            transition_type = %transition_type,
            "priority transition reverted"
        );

        Ok(TransitionResult {
            transition_type,
            preempted: false,
            requires_fade: true,
            old_source: Some(reverted),
            new_source: on_air,
        })
    }
}

async fn apply_transition(
    tx: &mut dyn PriorityTx,
    req: &TransitionRequest,
    now: DateTime<Utc>,
) -> Result<Applied> {
    let current = tx
        .current_source(&req.station_id)
        .await
        .map_err(|e| Error::store("get current source", e))?;

    if let Some(current) = current.as_ref() {
        if !req.force_preempt && !can_preempt(Some(current), req.new_priority) {
            return Ok(Applied::Denied(current.clone()));
        }
    }

    let old = match current {
        Some(mut current) => {
            current.deactivate(now);
            tx.deactivate(&current)
                .await
                .map_err(|e| Error::store("deactivate current source", e))?;
            Some(current)
        }
        None => None,
    };

    let new = PrioritySource::activate(
        req.station_id.clone(),
        req.mount_id.clone(),
        req.new_priority,
        req.source_type,
        req.source_id.clone(),
        req.metadata.clone(),
        now,
    );
    tx.insert(&new)
        .await
        .map_err(|e| Error::store("create new source", e))?;

    Ok(Applied::Changed { old, new })
}

async fn apply_release(
    tx: &mut dyn PriorityTx,
    station_id: &str,
    source_id: &str,
    now: DateTime<Utc>,
) -> Result<(PrioritySource, Option<PrioritySource>)> {
    let mut released = tx
        .find_by_source_id(station_id, source_id)
        .await
        .map_err(|e| Error::store("query source", e))?
        .filter(PrioritySource::is_active)
        .ok_or_else(|| Error::SourceNotFound {
            station_id: station_id.to_string(),
            source_id: source_id.to_string(),
        })?;

    released.deactivate(now);
    tx.deactivate(&released)
        .await
        .map_err(|e| Error::store("deactivate source", e))?;

    let next = tx
        .next_active_excluding(station_id, released.id)
        .await
        .map_err(|e| Error::store("query next source", e))?;

    Ok((released, next))
}

async fn apply_revert(
    tx: &mut dyn PriorityTx,
    station_id: &str,
    new: &PrioritySource,
    old: Option<&PrioritySource>,
    now: DateTime<Utc>,
) -> Result<(PrioritySource, Option<PrioritySource>)> {
    let mut reverted = new.clone();
    reverted.deactivate(now);
    tx.deactivate(&reverted)
        .await
        .map_err(|e| Error::store("deactivate source", e))?;

    if let Some(old) = old {
        tx.reactivate(old)
            .await
            .map_err(|e| Error::store("reactivate previous source", e))?;
    }

    let on_air = tx
        .current_source(station_id)
        .await
        .map_err(|e| Error::store("get current source", e))?;

    Ok((reverted, on_air))
}

async fn abort(tx: Box<dyn PriorityTx>, station_id: &str) {
    if let Err(e) = tx.rollback().await {
        warn!(station_id, error = %e, "priority transaction rollback failed");
    }
}
