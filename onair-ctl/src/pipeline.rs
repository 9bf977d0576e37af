//! Audio pipeline controller port
//!
//! The playout engine lives outside this process. After a handover commits,
//! the handover manager asks the controller to make sure the mount's
//! pipeline is playing the new source.

use async_trait::async_trait;
use onair_common::models::{PriorityLevel, SourceType};
use serde::Serialize;
use tracing::info;

use crate::error::Result;

/// What the engine should put on air for a mount
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LaunchSpec {
    pub station_id: String,
    pub mount_id: String,
    pub source_type: SourceType,
    pub source_id: String,
    pub priority: PriorityLevel,
    pub fade_ms: u64,
    pub requires_fade: bool,
}

#[async_trait]
pub trait PipelineController: Send + Sync {
    /// Start the mount's pipeline, or retarget it to `spec`
    async fn ensure_pipeline(&self, mount_id: &str, spec: &LaunchSpec) -> Result<()>;

    /// Stop whatever the mount is playing
    async fn stop_pipeline(&self, mount_id: &str) -> Result<()>;
}

/// Controller that only records the request in the log
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingPipeline;

#[async_trait]
impl PipelineController for LoggingPipeline {
    async fn ensure_pipeline(&self, mount_id: &str, spec: &LaunchSpec) -> Result<()> {
        info!(
            mount_id,
            station_id = %spec.station_id,
            source_type = %spec.source_type,
            source_id = %spec.source_id,
            priority = spec.priority.as_i64(),
            fade_ms = spec.fade_ms,
            requires_fade = spec.requires_fade,
            "pipeline ensure requested"
        );
        Ok(())
    }

    async fn stop_pipeline(&self, mount_id: &str) -> Result<()> {
        info!(mount_id, "pipeline stop requested");
        Ok(())
    }
}
