//! onair-ctl: on-air priority control plane
//!
//! Decides which source each station may put on air, lets live DJ
//! sessions take and give back the air, and tracks the health of each
//! station's audio engine.

pub mod api;
pub mod error;
pub mod executor;
pub mod live;
pub mod pipeline;
pub mod priority;
pub mod store;

pub use error::{Error, Result};
