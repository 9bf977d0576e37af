//! In-process backend for all three persistence ports
//!
//! Priority transactions hold the table lock for their whole lifetime and
//! work on a private copy that replaces the table on commit. One-shot fault
//! switches let tests fail a specific write.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use onair_common::models::{ExecutorState, LiveSession, LiveToken, PrioritySource};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use uuid::Uuid;

use super::{
    ExecutorStore, LiveStore, PriorityStore, PriorityTx, RedeemOutcome, StoreError, StoreResult,
};

#[derive(Default)]
struct Faults {
    insert: AtomicBool,
    deactivate: AtomicBool,
    commit: AtomicBool,
    commit_stall: Mutex<Option<Duration>>,
    executor_writes: AtomicBool,
}

impl Faults {
    fn take_stall(&self) -> Option<Duration> {
        self.commit_stall.lock().ok().and_then(|mut stall| stall.take())
    }

    fn take(flag: &AtomicBool, op: &str) -> StoreResult<()> {
        if flag.swap(false, Ordering::SeqCst) {
            return Err(StoreError::Backend(format!("injected {} failure", op)));
        }
        Ok(())
    }
}

#[derive(Default)]
struct LiveTables {
    tokens: HashMap<String, LiveToken>,
    sessions: HashMap<Uuid, LiveSession>,
}

/// In-memory store
#[derive(Default)]
pub struct MemoryStore {
    sources: Arc<AsyncMutex<Vec<PrioritySource>>>,
    live: Mutex<LiveTables>,
    executors: RwLock<HashMap<String, ExecutorState>>,
    faults: Arc<Faults>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next priority row insert fail
    pub fn fail_next_insert(&self) {
        self.faults.insert.store(true, Ordering::SeqCst);
    }

    /// Make the next priority row deactivation fail
    pub fn fail_next_deactivate(&self) {
        self.faults.deactivate.store(true, Ordering::SeqCst);
    }

    /// Make the next priority commit fail
    pub fn fail_next_commit(&self) {
        self.faults.commit.store(true, Ordering::SeqCst);
    }

    /// Hold the next priority commit for `delay` before it applies
    pub fn stall_next_commit(&self, delay: Duration) {
        if let Ok(mut stall) = self.faults.commit_stall.lock() {
            *stall = Some(delay);
        }
    }

    /// Make every executor snapshot write fail until switched off
    pub fn fail_executor_writes(&self, fail: bool) {
        self.faults.executor_writes.store(fail, Ordering::SeqCst);
    }

    /// Every priority row ever written, in insertion order
    pub async fn all_sources(&self) -> Vec<PrioritySource> {
        self.sources.lock().await.clone()
    }

    fn live(&self) -> StoreResult<std::sync::MutexGuard<'_, LiveTables>> {
        self.live
            .lock()
            .map_err(|_| StoreError::Backend("live tables lock poisoned".to_string()))
    }
}

fn by_priority(a: &PrioritySource, b: &PrioritySource) -> std::cmp::Ordering {
    a.priority
        .cmp(&b.priority)
        .then_with(|| b.activated_at.cmp(&a.activated_at))
}

fn active_for<'a>(
    rows: &'a [PrioritySource],
    station_id: &'a str,
) -> impl Iterator<Item = &'a PrioritySource> + 'a {
    rows.iter()
        .filter(move |r| r.station_id == station_id && r.active)
}

// ---------------------------------------------------------------------------
// Priority sources
// ---------------------------------------------------------------------------

pub struct MemoryPriorityTx {
    guard: OwnedMutexGuard<Vec<PrioritySource>>,
    working: Vec<PrioritySource>,
    faults: Arc<Faults>,
}

#[async_trait]
impl PriorityTx for MemoryPriorityTx {
    async fn current_source(&mut self, station_id: &str) -> StoreResult<Option<PrioritySource>> {
        Ok(active_for(&self.working, station_id)
            .min_by(|a, b| by_priority(a, b))
            .cloned())
    }

    async fn find_by_source_id(
        &mut self,
        station_id: &str,
        source_id: &str,
    ) -> StoreResult<Option<PrioritySource>> {
        Ok(self
            .working
            .iter()
            .filter(|r| r.station_id == station_id && r.source_id == source_id)
            .max_by(|a, b| a.active.cmp(&b.active).then(a.activated_at.cmp(&b.activated_at)))
            .cloned())
    }

    async fn next_active_excluding(
        &mut self,
        station_id: &str,
        row_id: Uuid,
    ) -> StoreResult<Option<PrioritySource>> {
        Ok(active_for(&self.working, station_id)
            .filter(|r| r.id != row_id)
            .min_by(|a, b| by_priority(a, b))
            .cloned())
    }

    async fn deactivate(&mut self, row: &PrioritySource) -> StoreResult<()> {
        Faults::take(&self.faults.deactivate, "deactivate")?;
        let stored = self
            .working
            .iter_mut()
            .find(|r| r.id == row.id)
            .ok_or_else(|| StoreError::Backend(format!("priority source {} vanished", row.id)))?;
        stored.active = false;
        stored.deactivated_at = row.deactivated_at;
        Ok(())
    }

    async fn reactivate(&mut self, row: &PrioritySource) -> StoreResult<()> {
        let stored = self
            .working
            .iter_mut()
            .find(|r| r.id == row.id)
            .ok_or_else(|| StoreError::Backend(format!("priority source {} vanished", row.id)))?;
        stored.active = true;
        stored.deactivated_at = None;
        Ok(())
    }

    async fn insert(&mut self, row: &PrioritySource) -> StoreResult<()> {
        Faults::take(&self.faults.insert, "insert")?;
        if self.working.iter().any(|r| r.id == row.id) {
            return Err(StoreError::Backend(format!("duplicate priority source {}", row.id)));
        }
        self.working.push(row.clone());
        Ok(())
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        Faults::take(&self.faults.commit, "commit")?;
        if let Some(delay) = self.faults.take_stall() {
            tokio::time::sleep(delay).await;
        }
        let MemoryPriorityTx {
            mut guard, working, ..
        } = *self;
        *guard = working;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> StoreResult<()> {
        Ok(())
    }
}

#[async_trait]
impl PriorityStore for MemoryStore {
    async fn begin(&self) -> StoreResult<Box<dyn PriorityTx>> {
        let guard = self.sources.clone().lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(MemoryPriorityTx {
            guard,
            working,
            faults: self.faults.clone(),
        }))
    }

    async fn active_sources(&self, station_id: &str) -> StoreResult<Vec<PrioritySource>> {
        let rows = self.sources.lock().await;
        let mut active: Vec<PrioritySource> = active_for(&rows, station_id).cloned().collect();
        active.sort_by(by_priority);
        Ok(active)
    }

    async fn history(&self, station_id: &str, limit: usize) -> StoreResult<Vec<PrioritySource>> {
        let rows = self.sources.lock().await;
        let mut history: Vec<PrioritySource> = rows
            .iter()
            .filter(|r| r.station_id == station_id)
            .cloned()
            .collect();
        history.sort_by(|a, b| b.activated_at.cmp(&a.activated_at));
        history.truncate(limit);
        Ok(history)
    }

    async fn insert_source(&self, row: &PrioritySource) -> StoreResult<()> {
        self.sources.lock().await.push(row.clone());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Live tokens and sessions
// ---------------------------------------------------------------------------

#[async_trait]
impl LiveStore for MemoryStore {
    async fn insert_token(&self, token: &LiveToken) -> StoreResult<()> {
        let mut live = self.live()?;
        if live.tokens.contains_key(&token.token) {
            return Err(StoreError::Backend("duplicate token".to_string()));
        }
        live.tokens.insert(token.token.clone(), token.clone());
        Ok(())
    }

    async fn find_token(
        &self,
        station_id: &str,
        mount_id: &str,
        token: &str,
    ) -> StoreResult<Option<LiveToken>> {
        let live = self.live()?;
        Ok(live
            .tokens
            .get(token)
            .filter(|t| t.station_id == station_id && t.mount_id == mount_id)
            .cloned())
    }

    async fn redeem_token(
        &self,
        station_id: &str,
        mount_id: &str,
        token: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<RedeemOutcome> {
        // Check-and-set under one lock acquisition
        let mut live = self.live()?;
        let Some(stored) = live
            .tokens
            .get_mut(token)
            .filter(|t| t.station_id == station_id && t.mount_id == mount_id)
        else {
            return Ok(RedeemOutcome::Invalid);
        };

        if stored.used {
            return Ok(RedeemOutcome::AlreadyUsed);
        }
        if !stored.is_redeemable(station_id, mount_id, now) {
            return Ok(RedeemOutcome::Invalid);
        }

        stored.used = true;
        stored.used_at = Some(now);
        Ok(RedeemOutcome::Redeemed(stored.clone()))
    }

    async fn create_session(&self, session: &LiveSession) -> StoreResult<bool> {
        let mut live = self.live()?;
        if live.sessions.contains_key(&session.id) {
            return Ok(false);
        }
        live.sessions.insert(session.id, session.clone());
        Ok(true)
    }

    async fn get_session(&self, id: Uuid) -> StoreResult<Option<LiveSession>> {
        Ok(self.live()?.sessions.get(&id).cloned())
    }

    async fn update_session(&self, session: &LiveSession) -> StoreResult<()> {
        let mut live = self.live()?;
        match live.sessions.get_mut(&session.id) {
            Some(stored) => {
                *stored = session.clone();
                Ok(())
            }
            None => Err(StoreError::Backend(format!("live session {} not found", session.id))),
        }
    }

    async fn active_sessions(&self, station_id: Option<&str>) -> StoreResult<Vec<LiveSession>> {
        let live = self.live()?;
        let mut sessions: Vec<LiveSession> = live
            .sessions
            .values()
            .filter(|s| s.active && station_id.map_or(true, |id| s.station_id == id))
            .cloned()
            .collect();
        sessions.sort_by(|a, b| b.connected_at.cmp(&a.connected_at));
        Ok(sessions)
    }
}

// ---------------------------------------------------------------------------
// Executor states
// ---------------------------------------------------------------------------

#[async_trait]
impl ExecutorStore for MemoryStore {
    async fn upsert_state(&self, state: &ExecutorState) -> StoreResult<()> {
        if self.faults.executor_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("injected executor write failure".to_string()));
        }
        let mut executors = self
            .executors
            .write()
            .map_err(|_| StoreError::Backend("executor table lock poisoned".to_string()))?;
        match executors.get(&state.station_id) {
            Some(stored) if stored.last_heartbeat > state.last_heartbeat => {}
            _ => {
                executors.insert(state.station_id.clone(), state.clone());
            }
        }
        Ok(())
    }

    async fn get_state(&self, station_id: &str) -> StoreResult<Option<ExecutorState>> {
        let executors = self
            .executors
            .read()
            .map_err(|_| StoreError::Backend("executor table lock poisoned".to_string()))?;
        Ok(executors.get(station_id).cloned())
    }

    async fn list_states(&self) -> StoreResult<Vec<ExecutorState>> {
        let executors = self
            .executors
            .read()
            .map_err(|_| StoreError::Backend("executor table lock poisoned".to_string()))?;
        let mut states: Vec<ExecutorState> = executors.values().cloned().collect();
        states.sort_by(|a, b| a.station_id.cmp(&b.station_id));
        Ok(states)
    }
}
