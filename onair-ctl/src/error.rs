//! Error types for onair-ctl
//!
//! `TransitionType::None` is an outcome, not an error, and never appears here.

use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use crate::store::StoreError;

/// Main error type for the control plane
#[derive(Error, Debug)]
pub enum Error {
    /// Station has no active priority source
    #[error("no active priority sources for station {0}")]
    NoActiveSources(String),

    /// Priority outside the ladder, or not allowed for the operation
    #[error("invalid priority level: {0}")]
    InvalidPriority(String),

    /// Release named a source the station never had
    #[error("priority source not found: {source_id} on station {station_id}")]
    SourceNotFound {
        station_id: String,
        source_id: String,
    },

    /// Token unknown, expired or scoped to another station/mount
    #[error("invalid or expired token")]
    InvalidToken,

    /// Token was already redeemed
    #[error("token already used")]
    TokenAlreadyUsed,

    /// No session for the id, or no session bound to the presented token
    #[error("live session not found: {0}")]
    SessionNotFound(String),

    /// Session exists but has disconnected
    #[error("live session not active: {0}")]
    SessionInactive(Uuid),

    /// Caller does not own the session or lacks the role
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// No heartbeat was ever received for the station
    #[error("no executor state for station {0}")]
    ExecutorNotFound(String),

    /// Caller deadline elapsed
    #[error("{op} timed out after {after:?}")]
    Timeout { op: &'static str, after: Duration },

    /// Audio pipeline controller failure
    #[error("pipeline error: {0}")]
    Pipeline(String),

    /// Persistence failure, wrapped with the operation that hit it
    #[error("{op}: {source}")]
    Store {
        op: &'static str,
        #[source]
        source: StoreError,
    },

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Wrap a store error with operation context
    pub fn store(op: &'static str, source: StoreError) -> Self {
        Error::Store { op, source }
    }
}

impl From<onair_common::Error> for Error {
    fn from(err: onair_common::Error) -> Self {
        match err {
            onair_common::Error::Config(msg) => Error::Config(msg),
            other => Error::store("common", StoreError::Backend(other.to_string())),
        }
    }
}

/// Convenience Result type using the onair-ctl Error
pub type Result<T> = std::result::Result<T, Error>;
