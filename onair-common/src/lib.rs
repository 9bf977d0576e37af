//! # On-Air Common Library
//!
//! Shared code for the on-air control plane:
//! - Domain models (priority sources, live sessions, executor snapshots)
//! - Event types (OnAirEvent enum) and the EventBus
//! - Bootstrap configuration loading
//! - Database schema initialization
//! - Token and API key helpers

pub mod auth;
pub mod config;
#[cfg(feature = "sqlx")]
pub mod db;
pub mod error;
pub mod events;
pub mod models;
pub mod time;

pub use error::{Error, Result};
pub use models::{Metadata, PriorityLevel, SourceType};
