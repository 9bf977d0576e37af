//! Pipeline controller double

use async_trait::async_trait;
use onair_ctl::pipeline::{LaunchSpec, PipelineController};
use onair_ctl::{Error, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub enum PipelineCall {
    Ensure { mount_id: String, spec: LaunchSpec },
    Stop { mount_id: String },
}

/// Records every call; can fail or stall `ensure_pipeline` on demand
#[derive(Default)]
pub struct ScriptedPipeline {
    calls: Mutex<Vec<PipelineCall>>,
    fail_next: AtomicBool,
    stall: Mutex<Option<Duration>>,
}

impl ScriptedPipeline {
    pub fn fail_next(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    /// Delay every `ensure_pipeline` call by `delay`
    pub fn stall_for(&self, delay: Duration) {
        *self.stall.lock().unwrap() = Some(delay);
    }

    pub fn calls(&self) -> Vec<PipelineCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl PipelineController for ScriptedPipeline {
    async fn ensure_pipeline(&self, mount_id: &str, spec: &LaunchSpec) -> Result<()> {
        self.calls.lock().unwrap().push(PipelineCall::Ensure {
            mount_id: mount_id.to_string(),
            spec: spec.clone(),
        });

        let stall = *self.stall.lock().unwrap();
        if let Some(delay) = stall {
            tokio::time::sleep(delay).await;
        }

        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(Error::Pipeline("encoder refused to start".to_string()));
        }
        Ok(())
    }

    async fn stop_pipeline(&self, mount_id: &str) -> Result<()> {
        self.calls.lock().unwrap().push(PipelineCall::Stop {
            mount_id: mount_id.to_string(),
        });
        Ok(())
    }
}
