//! Executor telemetry and health
//!
//! Passive: the manager caches what audio engines report and flags stale
//! heartbeats. It never drives an engine.

mod state;

pub use state::{ExecutorStateManager, HealthSummary, Heartbeat, StationHealth, Telemetry};
