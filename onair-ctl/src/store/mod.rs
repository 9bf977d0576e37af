//! Persistence ports
//!
//! The resolver, handover manager and executor state manager depend on
//! these traits only. `SqliteStore` is the production backend and
//! `MemoryStore` the in-process double used by tests.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use onair_common::models::{ExecutorState, LiveSession, LiveToken, PrioritySource};
use thiserror::Error;
use uuid::Uuid;

/// Persistence failure
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Stored row could not be turned back into a model
    #[error("decode error: {0}")]
    Decode(String),

    /// Any other backend failure
    #[error("store backend error: {0}")]
    Backend(String),
}

impl From<onair_common::Error> for StoreError {
    fn from(err: onair_common::Error) -> Self {
        match err {
            onair_common::Error::Database(e) => StoreError::Database(e),
            onair_common::Error::Decode(msg) => StoreError::Decode(msg),
            other => StoreError::Backend(other.to_string()),
        }
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Priority source rows
#[async_trait]
pub trait PriorityStore: Send + Sync {
    /// Open a transaction for one read-modify-write
    async fn begin(&self) -> StoreResult<Box<dyn PriorityTx>>;

    /// Active rows for a station, highest priority (lowest number) first
    async fn active_sources(&self, station_id: &str) -> StoreResult<Vec<PrioritySource>>;

    /// All rows for a station, newest activation first
    async fn history(&self, station_id: &str, limit: usize) -> StoreResult<Vec<PrioritySource>>;

    /// Insert a row outside any transition (seeding, administration)
    async fn insert_source(&self, row: &PrioritySource) -> StoreResult<()>;
}

/// One priority transaction
///
/// Dropping it without calling `commit` discards every write.
#[async_trait]
pub trait PriorityTx: Send {
    /// Active row with the lowest priority number
    async fn current_source(&mut self, station_id: &str) -> StoreResult<Option<PrioritySource>>;

    /// Row carrying `source_id`, active rows first, then newest
    async fn find_by_source_id(
        &mut self,
        station_id: &str,
        source_id: &str,
    ) -> StoreResult<Option<PrioritySource>>;

    /// Lowest-numbered active row other than `row_id`
    async fn next_active_excluding(
        &mut self,
        station_id: &str,
        row_id: Uuid,
    ) -> StoreResult<Option<PrioritySource>>;

    /// Persist `active = false` and `deactivated_at` for an existing row
    async fn deactivate(&mut self, row: &PrioritySource) -> StoreResult<()>;

    /// Put a previously deactivated row back on air
    async fn reactivate(&mut self, row: &PrioritySource) -> StoreResult<()>;

    async fn insert(&mut self, row: &PrioritySource) -> StoreResult<()>;

    async fn commit(self: Box<Self>) -> StoreResult<()>;

    async fn rollback(self: Box<Self>) -> StoreResult<()>;
}

/// Result of an atomic token redemption
#[derive(Debug, Clone, PartialEq)]
pub enum RedeemOutcome {
    /// This caller won; the token is now marked used
    Redeemed(LiveToken),
    /// Token exists and matches, but someone redeemed it first
    AlreadyUsed,
    /// Unknown, expired or out of scope
    Invalid,
}

/// Live tokens and sessions
#[async_trait]
pub trait LiveStore: Send + Sync {
    async fn insert_token(&self, token: &LiveToken) -> StoreResult<()>;

    /// Token scoped to station and mount, in any state
    async fn find_token(
        &self,
        station_id: &str,
        mount_id: &str,
        token: &str,
    ) -> StoreResult<Option<LiveToken>>;

    /// Mark the token used if and only if it is unused, unexpired and in scope
    async fn redeem_token(
        &self,
        station_id: &str,
        mount_id: &str,
        token: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<RedeemOutcome>;

    /// Insert a session; `false` if the id already exists
    async fn create_session(&self, session: &LiveSession) -> StoreResult<bool>;

    async fn get_session(&self, id: Uuid) -> StoreResult<Option<LiveSession>>;

    async fn update_session(&self, session: &LiveSession) -> StoreResult<()>;

    /// Connected sessions, optionally for one station, newest first
    async fn active_sessions(&self, station_id: Option<&str>) -> StoreResult<Vec<LiveSession>>;
}

/// Executor telemetry snapshots (one per station)
#[async_trait]
pub trait ExecutorStore: Send + Sync {
    /// Replace the station's snapshot unless the stored one is newer
    async fn upsert_state(&self, state: &ExecutorState) -> StoreResult<()>;

    async fn get_state(&self, station_id: &str) -> StoreResult<Option<ExecutorState>>;

    async fn list_states(&self) -> StoreResult<Vec<ExecutorState>>;
}
