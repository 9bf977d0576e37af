//! Live DJ sessions and handover
//!
//! Tokens gate who may connect a source to a mount; sessions record the
//! connection; handover is the session's request to become the on-air
//! priority source. Connection and priority lifecycles are independent.

mod handover;
mod sessions;

pub use handover::{HandoverOutcome, HandoverRequest, HandoverResult};
pub use sessions::{ConnectRequest, GenerateTokenRequest, IssuedToken};

use onair_common::config::OnAirConfig;
use onair_common::events::EventBus;
use std::sync::Arc;
use std::time::Duration;

use crate::pipeline::PipelineController;
use crate::priority::PriorityService;
use crate::store::LiveStore;

/// Tunables for the live manager
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LiveSettings {
    /// TTL applied when a token request asks for zero
    pub default_token_ttl: Duration,
    /// Deadline shared by the priority change and the pipeline call
    pub handover_timeout: Duration,
    pub default_fade_ms: u64,
}

impl Default for LiveSettings {
    fn default() -> Self {
        Self {
            default_token_ttl: Duration::from_secs(3600),
            handover_timeout: Duration::from_secs(15),
            default_fade_ms: 3000,
        }
    }
}

impl From<&OnAirConfig> for LiveSettings {
    fn from(config: &OnAirConfig) -> Self {
        Self {
            default_token_ttl: Duration::from_secs(config.live.default_token_ttl_secs),
            handover_timeout: config.priority.handover_timeout(),
            default_fade_ms: config.live.default_fade_ms,
        }
    }
}

/// Live session and handover manager
pub struct LiveService {
    store: Arc<dyn LiveStore>,
    priority: Arc<PriorityService>,
    events: Arc<EventBus>,
    pipeline: Option<Arc<dyn PipelineController>>,
    settings: LiveSettings,
}

impl LiveService {
    pub fn new(
        store: Arc<dyn LiveStore>,
        priority: Arc<PriorityService>,
        events: Arc<EventBus>,
        settings: LiveSettings,
    ) -> Self {
        Self {
            store,
            priority,
            events,
            pipeline: None,
            settings,
        }
    }

    /// Wire a pipeline controller; handovers then also drive the engine
    pub fn with_pipeline(mut self, pipeline: Arc<dyn PipelineController>) -> Self {
        self.pipeline = Some(pipeline);
        self
    }

    pub fn settings(&self) -> &LiveSettings {
        &self.settings
    }
}
