//! Domain models shared by the control plane

mod executor;
mod live;
mod priority;

pub use executor::{ExecutorState, ExecutorStatus};
pub use live::{LiveSession, LiveToken};
pub use priority::{InvalidPriorityLevel, PriorityLevel, PrioritySource, SourceType};

/// Free-form JSON object attached to sources, sessions and snapshots
pub type Metadata = serde_json::Map<String, serde_json::Value>;
