//! Handover: a live session taking and giving back the air

use chrono::{DateTime, Utc};
use onair_common::events::{OnAirEvent, SourceRef, TransitionType};
use onair_common::models::{LiveSession, Metadata, PriorityLevel, SourceType};
use serde::Serialize;
use serde_json::json;
use std::time::Duration;
use tokio::time::{timeout_at, Instant};
use tracing::{error, info, warn};
use uuid::Uuid;

use super::LiveService;
use crate::error::{Error, Result};
use crate::pipeline::LaunchSpec;
use crate::priority::TransitionResult;

/// Session request to become the on-air source
#[derive(Debug, Clone)]
pub struct HandoverRequest {
    pub session_id: Uuid,
    pub station_id: String,
    pub mount_id: String,
    pub user_id: String,
    pub priority: PriorityLevel,
    /// Cut instead of crossfading
    pub immediate: bool,
    /// Zero selects the configured default
    pub fade_time_ms: u64,
    /// Undo a committed priority change when a later step fails
    pub rollback_on_error: bool,
    /// Deadline for the whole handover; `None` selects the configured one
    pub timeout: Option<Duration>,
}

/// How a handover ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HandoverOutcome {
    Completed,
    /// Priority rules kept the current source on air
    Denied,
    Failed,
    TimedOut,
}

#[derive(Debug, Clone, Serialize)]
pub struct HandoverResult {
    pub session_id: Uuid,
    pub success: bool,
    pub outcome: HandoverOutcome,
    pub handover_at: DateTime<Utc>,
    pub previous_source: Option<SourceRef>,
    pub new_source: Option<SourceRef>,
    pub transition_type: TransitionType,
    pub requires_fade: bool,
    pub fade_time_ms: u64,
    /// The committed priority change was undone
    pub rolled_back: bool,
    pub error: Option<String>,
}

impl HandoverResult {
    fn new(session_id: Uuid, handover_at: DateTime<Utc>, previous: Option<SourceRef>) -> Self {
        Self {
            session_id,
            success: false,
            outcome: HandoverOutcome::Failed,
            handover_at,
            previous_source: previous,
            new_source: None,
            transition_type: TransitionType::None,
            requires_fade: false,
            fade_time_ms: 0,
            rolled_back: false,
            error: None,
        }
    }

    fn fail(mut self, outcome: HandoverOutcome, err: &Error) -> Self {
        self.success = false;
        self.outcome = outcome;
        self.error = Some(err.to_string());
        self
    }
}

impl LiveService {
    /// Acquire priority for a connected session
    ///
    /// Session and authorization problems are returned as errors. Once the
    /// priority step is attempted every outcome is a `HandoverResult`: a
    /// denied transition, a failed or timed-out step, or success. The
    /// priority change and the pipeline call share one deadline. Station,
    /// mount and priority must match what the session's token was issued for.
    pub async fn start_handover(&self, req: HandoverRequest) -> Result<HandoverResult> {
        let handover_at = Utc::now();
        info!(
            session_id = %req.session_id,
            station_id = %req.station_id,
            user_id = %req.user_id,
            priority = req.priority.as_i64(),
            immediate = req.immediate,
            "starting live handover"
        );

        let session = self.load_session(req.session_id).await?;
        if !session.is_active() {
            return Err(Error::SessionInactive(req.session_id));
        }
        if session.user_id != req.user_id {
            warn!(session_id = %req.session_id, user_id = %req.user_id, "handover by another user");
            return Err(Error::Unauthorized(format!(
                "session {} belongs to another user",
                req.session_id
            )));
        }
        if session.station_id != req.station_id || session.mount_id != req.mount_id {
            warn!(
                session_id = %req.session_id,
                station_id = %req.station_id,
                mount_id = %req.mount_id,
                "handover outside the session's token scope"
            );
            return Err(Error::Unauthorized(format!(
                "session {} is scoped to {}/{}",
                req.session_id, session.station_id, session.mount_id
            )));
        }
        if !req.priority.is_live() {
            return Err(Error::InvalidPriority(format!(
                "{} is not a live priority",
                req.priority.as_i64()
            )));
        }
        if req.priority != session.priority {
            return Err(Error::InvalidPriority(format!(
                "session {} was authorized for priority {}, not {}",
                req.session_id,
                session.priority.as_i64(),
                req.priority.as_i64()
            )));
        }

        let previous = match self.priority.get_current(&req.station_id).await {
            Ok(current) => Some(current),
            Err(Error::NoActiveSources(_)) => None,
            Err(e) => {
                warn!(station_id = %req.station_id, error = %e, "failed to read current source");
                None
            }
        };
        let mut result = HandoverResult::new(req.session_id, handover_at, previous.as_ref().map(SourceRef::from));

        let source_id = req.session_id.to_string();
        let mut metadata = Metadata::new();
        metadata.insert("session_id".into(), json!(source_id));
        metadata.insert("user_id".into(), json!(req.user_id));
        metadata.insert("username".into(), json!(session.username));
        metadata.insert("handover_at".into(), json!(handover_at));

        let timeout = req.timeout.unwrap_or(self.settings.handover_timeout);
        let deadline = Instant::now() + timeout;

        let acquire = self.acquire(&req, &source_id, metadata);
        tokio::pin!(acquire);

        let first_attempt = timeout_at(deadline, &mut acquire).await;
        let applied = match first_attempt {
            Ok(Ok(applied)) => applied,
            Ok(Err(e)) => {
                error!(session_id = %req.session_id, error = %e, "priority transition failed");
                return Ok(result.fail(HandoverOutcome::Failed, &e));
            }
            Err(_) => {
                let err = Error::Timeout { op: "handover", after: timeout };
                error!(session_id = %req.session_id, "priority transition timed out");
                if req.rollback_on_error {
                    // Let the step settle so a late commit can be reverted
                    result.rolled_back = match acquire.await {
                        Ok(late) if !late.is_denied() => self.undo(&req.station_id, &late).await,
                        Ok(_) => false,
                        Err(e) => {
                            warn!(session_id = %req.session_id, error = %e, "late priority transition failed");
                            false
                        }
                    };
                }
                return Ok(result.fail(HandoverOutcome::TimedOut, &err));
            }
        };

        result.transition_type = applied.transition_type;
        if applied.is_denied() {
            info!(
                session_id = %req.session_id,
                station_id = %req.station_id,
                "handover denied by a higher or equal priority source"
            );
            result.outcome = HandoverOutcome::Denied;
            result.previous_source = applied.old_source.as_ref().map(SourceRef::from);
            return Ok(result);
        }

        result.new_source = applied.new_source.as_ref().map(SourceRef::from);
        result.requires_fade = !req.immediate && applied.requires_fade;
        result.fade_time_ms = match (result.requires_fade, req.fade_time_ms) {
            (false, _) => 0,
            (true, 0) => self.settings.default_fade_ms,
            (true, ms) => ms,
        };

        if let Some(pipeline) = self.pipeline.as_ref() {
            let spec = LaunchSpec {
                station_id: req.station_id.clone(),
                mount_id: req.mount_id.clone(),
                source_type: SourceType::Live,
                source_id: source_id.clone(),
                priority: req.priority,
                fade_ms: result.fade_time_ms,
                requires_fade: result.requires_fade,
            };

            let failure = match timeout_at(deadline, pipeline.ensure_pipeline(&req.mount_id, &spec)).await {
                Ok(Ok(())) => None,
                Ok(Err(e)) => Some((HandoverOutcome::Failed, e)),
                Err(_) => Some((HandoverOutcome::TimedOut, Error::Timeout { op: "handover", after: timeout })),
            };

            if let Some((outcome, err)) = failure {
                error!(session_id = %req.session_id, mount_id = %req.mount_id, error = %err, "pipeline start failed");
                if req.rollback_on_error {
                    result.rolled_back = self.undo(&req.station_id, &applied).await;
                }
                return Ok(result.fail(outcome, &err));
            }
        }

        self.record_handover(session, &req, &result).await;

        self.events.emit_lossy(OnAirEvent::LiveHandover {
            session_id: req.session_id,
            station_id: req.station_id.clone(),
            mount_id: req.mount_id.clone(),
            user_id: req.user_id.clone(),
            priority: req.priority,
            transition_type: result.transition_type,
            requires_fade: result.requires_fade,
            fade_time_ms: result.fade_time_ms,
            previous_source_id: result.previous_source.as_ref().map(|s| s.source_id.clone()),
            timestamp: Utc::now(),
        });

        result.success = true;
        result.outcome = HandoverOutcome::Completed;

        info!(
            session_id = %req.session_id,
            transition_type = %result.transition_type,
            requires_fade = result.requires_fade,
            elapsed_ms = (Utc::now() - handover_at).num_milliseconds(),
            "live handover completed"
        );
        Ok(result)
    }

    /// Give the session's priority back
    ///
    /// The next active source resumes, or the station falls back when there
    /// is none. Pipeline follow-up failures are logged only.
    pub async fn release_handover(&self, session_id: Uuid) -> Result<TransitionResult> {
        let session = self.load_session(session_id).await?;
        let source_id = session_id.to_string();

        let released = self.priority.release(&session.station_id, &source_id).await?;

        if let Some(pipeline) = self.pipeline.as_ref() {
            let follow_up = match released.new_source.as_ref() {
                Some(next) => {
                    let spec = LaunchSpec {
                        station_id: next.station_id.clone(),
                        mount_id: next.mount_id.clone(),
                        source_type: next.source_type,
                        source_id: next.source_id.clone(),
                        priority: next.priority,
                        fade_ms: self.settings.default_fade_ms,
                        requires_fade: released.requires_fade,
                    };
                    pipeline.ensure_pipeline(&next.mount_id, &spec).await
                }
                None => pipeline.stop_pipeline(&session.mount_id).await,
            };
            if let Err(e) = follow_up {
                warn!(%session_id, error = %e, "pipeline follow-up after release failed");
            }
        }

        self.events.emit_lossy(OnAirEvent::LiveReleased {
            session_id,
            station_id: session.station_id.clone(),
            transition_type: released.transition_type,
            new_source_id: released.new_source.as_ref().map(|s| s.source_id.clone()),
            timestamp: Utc::now(),
        });

        info!(
            %session_id,
            station_id = %session.station_id,
            transition_type = %released.transition_type,
            "live handover released"
        );
        Ok(released)
    }

    async fn undo(&self, station_id: &str, applied: &TransitionResult) -> bool {
        match self.priority.revert(station_id, applied).await {
            Ok(_) => true,
            Err(e) => {
                error!(station_id, error = %e, "handover rollback failed");
                false
            }
        }
    }

    async fn acquire(
        &self,
        req: &HandoverRequest,
        source_id: &str,
        metadata: Metadata,
    ) -> Result<TransitionResult> {
        match req.priority {
            PriorityLevel::LiveOverride => {
                self.priority
                    .start_override(&req.station_id, &req.mount_id, SourceType::Live, source_id, metadata)
                    .await
            }
            _ => {
                self.priority
                    .start_scheduled_live(&req.station_id, &req.mount_id, source_id, metadata)
                    .await
            }
        }
    }

    async fn record_handover(
        &self,
        mut session: LiveSession,
        req: &HandoverRequest,
        result: &HandoverResult,
    ) {
        let mode = if result.requires_fade { "faded" } else { "immediate" };
        session.metadata.insert("handover_completed".into(), json!(true));
        session.metadata.insert("handover_at".into(), json!(result.handover_at));
        session.metadata.insert("priority".into(), json!(req.priority.as_i64()));
        session.metadata.insert("transition_type".into(), json!(mode));

        if let Err(e) = self.store.update_session(&session).await {
            warn!(session_id = %session.id, error = %e, "failed to update session metadata");
        }
    }
}
