//! Executor state cache backed by `ExecutorStore`

use chrono::{DateTime, Utc};
use onair_common::events::{EventBus, OnAirEvent};
use onair_common::models::{ExecutorState, ExecutorStatus, Metadata, PriorityLevel};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::store::ExecutorStore;

/// Telemetry report from an audio engine
#[derive(Debug, Clone, Deserialize)]
pub struct Heartbeat {
    #[serde(default)]
    pub mount_id: String,
    pub state: ExecutorStatus,
    #[serde(default)]
    pub current_priority: Option<PriorityLevel>,
    #[serde(default)]
    pub current_source_id: Option<String>,
    #[serde(default)]
    pub next_source_id: Option<String>,
    #[serde(default)]
    pub audio_level_l: f64,
    #[serde(default)]
    pub audio_level_r: f64,
    #[serde(default)]
    pub loudness_lufs: f64,
    #[serde(default)]
    pub buffer_depth_ms: i64,
    #[serde(default)]
    pub underrun_count: i64,
    #[serde(default)]
    pub metadata: Metadata,
}

impl Heartbeat {
    fn into_state(self, station_id: &str, received_at: DateTime<Utc>) -> ExecutorState {
        ExecutorState {
            station_id: station_id.to_string(),
            mount_id: self.mount_id,
            state: self.state,
            current_priority: self.current_priority,
            current_source_id: self.current_source_id,
            next_source_id: self.next_source_id,
            audio_level_l: self.audio_level_l,
            audio_level_r: self.audio_level_r,
            loudness_lufs: self.loudness_lufs,
            buffer_depth_ms: self.buffer_depth_ms,
            underrun_count: self.underrun_count,
            last_heartbeat: received_at,
            metadata: self.metadata,
        }
    }
}

/// Audio telemetry subset of a snapshot
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Telemetry {
    pub station_id: String,
    pub audio_level_l: f64,
    pub audio_level_r: f64,
    pub loudness_lufs: f64,
    pub buffer_depth_ms: i64,
    pub underrun_count: i64,
    pub last_heartbeat: DateTime<Utc>,
}

impl From<&ExecutorState> for Telemetry {
    fn from(state: &ExecutorState) -> Self {
        Self {
            station_id: state.station_id.clone(),
            audio_level_l: state.audio_level_l,
            audio_level_r: state.audio_level_r,
            loudness_lufs: state.loudness_lufs,
            buffer_depth_ms: state.buffer_depth_ms,
            underrun_count: state.underrun_count,
            last_heartbeat: state.last_heartbeat,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StationHealth {
    pub station_id: String,
    pub healthy: bool,
    pub playing: bool,
    pub state: ExecutorStatus,
    pub last_heartbeat: DateTime<Utc>,
    pub heartbeat_age_ms: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthSummary {
    pub total: usize,
    pub healthy: usize,
    pub stale: usize,
    pub playing: usize,
    pub stale_after_ms: u64,
    pub stations: Vec<StationHealth>,
}

struct Cached {
    state: ExecutorState,
    /// Health last published for this station
    healthy: bool,
}

/// Latest-wins executor snapshots with staleness detection
pub struct ExecutorStateManager {
    store: Arc<dyn ExecutorStore>,
    cache: RwLock<HashMap<String, Cached>>,
    events: Arc<EventBus>,
    stale_after: Duration,
}

impl ExecutorStateManager {
    pub fn new(store: Arc<dyn ExecutorStore>, events: Arc<EventBus>, stale_after: Duration) -> Self {
        Self {
            store,
            cache: RwLock::new(HashMap::new()),
            events,
            stale_after,
        }
    }

    pub fn stale_after(&self) -> Duration {
        self.stale_after
    }

    /// Record a heartbeat; `last_heartbeat` is stamped on receipt
    ///
    /// Persistence failures are logged and dropped so telemetry never
    /// blocks anything else.
    pub async fn report_heartbeat(&self, station_id: &str, heartbeat: Heartbeat) -> ExecutorState {
        let (state, was_healthy) = {
            let mut cache = self.cache.write().await;
            // Stamp under the lock so cache order matches receipt order
            let state = heartbeat.into_state(station_id, Utc::now());
            let previous = cache.insert(
                station_id.to_string(),
                Cached {
                    state: state.clone(),
                    healthy: true,
                },
            );
            (state, previous.map(|p| p.healthy))
        };

        // The store keeps the newest stamp if concurrent writes land out of order
        if let Err(e) = self.store.upsert_state(&state).await {
            warn!(station_id, error = %e, "failed to persist executor state");
        }

        debug!(
            station_id,
            state = %state.state,
            buffer_depth_ms = state.buffer_depth_ms,
            underrun_count = state.underrun_count,
            "executor heartbeat"
        );

        if was_healthy != Some(true) {
            info!(station_id, state = %state.state, "executor healthy");
            self.publish_health(&state, true);
        }

        state
    }

    /// Cached snapshot, falling back to the store
    pub async fn get_state(&self, station_id: &str) -> Result<ExecutorState> {
        if let Some(cached) = self.cache.read().await.get(station_id) {
            return Ok(cached.state.clone());
        }

        let stored = self
            .store
            .get_state(station_id)
            .await
            .map_err(|e| Error::store("query executor state", e))?
            .ok_or_else(|| Error::ExecutorNotFound(station_id.to_string()))?;

        let healthy = stored.is_healthy(self.stale_after);
        self.cache
            .write()
            .await
            .entry(station_id.to_string())
            .or_insert_with(|| Cached {
                state: stored.clone(),
                healthy,
            });
        Ok(stored)
    }

    pub async fn get_telemetry(&self, station_id: &str) -> Result<Telemetry> {
        Ok(Telemetry::from(&self.get_state(station_id).await?))
    }

    /// Every known station, ordered by id
    ///
    /// Stored rows are overlaid with cached ones, which are never older.
    pub async fn list_states(&self) -> Result<Vec<ExecutorState>> {
        let stored = self
            .store
            .list_states()
            .await
            .map_err(|e| Error::store("list executor states", e))?;

        let mut merged: BTreeMap<String, ExecutorState> = stored
            .into_iter()
            .map(|s| (s.station_id.clone(), s))
            .collect();
        for (station_id, cached) in self.cache.read().await.iter() {
            merged.insert(station_id.clone(), cached.state.clone());
        }
        Ok(merged.into_values().collect())
    }

    pub async fn health(&self) -> Result<HealthSummary> {
        let now = Utc::now();
        let stations: Vec<StationHealth> = self
            .list_states()
            .await?
            .into_iter()
            .map(|s| StationHealth {
                healthy: s.is_healthy_at(now, self.stale_after),
                playing: s.is_playing(),
                heartbeat_age_ms: (now - s.last_heartbeat).num_milliseconds(),
                station_id: s.station_id,
                state: s.state,
                last_heartbeat: s.last_heartbeat,
            })
            .collect();

        let healthy = stations.iter().filter(|s| s.healthy).count();
        Ok(HealthSummary {
            total: stations.len(),
            healthy,
            stale: stations.len() - healthy,
            playing: stations.iter().filter(|s| s.playing).count(),
            stale_after_ms: self.stale_after.as_millis() as u64,
            stations,
        })
    }

    /// Flag cached stations whose heartbeat went stale
    ///
    /// Publishes `executor.health` once per healthy-to-stale flip and
    /// returns the affected station ids.
    pub async fn sweep_stale(&self) -> Vec<String> {
        let now = Utc::now();
        let mut flipped = Vec::new();
        {
            let mut cache = self.cache.write().await;
            for (station_id, cached) in cache.iter_mut() {
                if cached.healthy && !cached.state.is_healthy_at(now, self.stale_after) {
                    cached.healthy = false;
                    flipped.push(cached.state.clone());
                    warn!(
                        station_id = %station_id,
                        last_heartbeat = %cached.state.last_heartbeat,
                        "executor heartbeat stale"
                    );
                }
            }
        }

        for state in &flipped {
            self.publish_health(state, false);
        }
        flipped.into_iter().map(|s| s.station_id).collect()
    }

    /// Run `sweep_stale` every `period` until the task is aborted
    pub fn spawn_health_monitor(self: Arc<Self>, period: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                self.sweep_stale().await;
            }
        })
    }

    /// Drop a station from the cache; the stored row stays
    pub async fn clear_cache(&self, station_id: &str) {
        self.cache.write().await.remove(station_id);
    }

    fn publish_health(&self, state: &ExecutorState, healthy: bool) {
        self.events.emit_lossy(OnAirEvent::ExecutorHealthChanged {
            station_id: state.station_id.clone(),
            healthy,
            state: state.state,
            timestamp: Utc::now(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn heartbeat(state: ExecutorStatus) -> Heartbeat {
        Heartbeat {
            mount_id: "main".to_string(),
            state,
            current_priority: Some(PriorityLevel::Automation),
            current_source_id: Some("playlist-1".to_string()),
            next_source_id: None,
            audio_level_l: -18.0,
            audio_level_r: -18.5,
            loudness_lufs: -16.0,
            buffer_depth_ms: 500,
            underrun_count: 0,
            metadata: Metadata::new(),
        }
    }

    fn manager(stale_after: Duration) -> (Arc<MemoryStore>, ExecutorStateManager, Arc<EventBus>) {
        let store = Arc::new(MemoryStore::new());
        let events = Arc::new(EventBus::new(16));
        let manager = ExecutorStateManager::new(store.clone(), events.clone(), stale_after);
        (store, manager, events)
    }

    #[tokio::test]
    async fn test_heartbeat_is_latest_wins() {
        let (_store, manager, _events) = manager(Duration::from_secs(10));

        manager.report_heartbeat("s1", heartbeat(ExecutorStatus::Starting)).await;
        manager.report_heartbeat("s1", heartbeat(ExecutorStatus::Playing)).await;

        let state = manager.get_state("s1").await.unwrap();
        assert!(state.is_playing());
        assert_eq!(manager.list_states().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_station_is_not_found() {
        let (_store, manager, _events) = manager(Duration::from_secs(10));
        assert!(matches!(
            manager.get_state("nope").await,
            Err(Error::ExecutorNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_persistence_failure_does_not_fail_heartbeat() {
        let (store, manager, _events) = manager(Duration::from_secs(10));
        store.fail_executor_writes(true);

        let state = manager.report_heartbeat("s1", heartbeat(ExecutorStatus::Playing)).await;
        assert_eq!(state.station_id, "s1");
        assert!(manager.get_state("s1").await.is_ok());
    }

    #[tokio::test]
    async fn test_store_fallback_after_cache_clear() {
        let (_store, manager, _events) = manager(Duration::from_secs(10));
        manager.report_heartbeat("s1", heartbeat(ExecutorStatus::Idle)).await;
        manager.clear_cache("s1").await;

        let state = manager.get_state("s1").await.unwrap();
        assert_eq!(state.state, ExecutorStatus::Idle);
    }

    #[tokio::test]
    async fn test_health_flip_publishes_once() {
        let (_store, manager, events) = manager(Duration::from_millis(20));
        let mut rx = events.subscribe_to(["executor.health"]);

        manager.report_heartbeat("s1", heartbeat(ExecutorStatus::Playing)).await;
        manager.report_heartbeat("s1", heartbeat(ExecutorStatus::Playing)).await;
        match rx.try_recv().unwrap() {
            OnAirEvent::ExecutorHealthChanged { healthy, .. } => assert!(healthy),
            other => panic!("unexpected event {:?}", other),
        }
        assert!(rx.try_recv().is_err());

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(manager.sweep_stale().await, vec!["s1".to_string()]);
        assert!(manager.sweep_stale().await.is_empty());

        match rx.try_recv().unwrap() {
            OnAirEvent::ExecutorHealthChanged { healthy, .. } => assert!(!healthy),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_heartbeats_persist_newest() {
        let (store, manager, _events) = manager(Duration::from_secs(10));
        let manager = Arc::new(manager);

        let tasks: Vec<_> = (0..16)
            .map(|depth| {
                let manager = manager.clone();
                tokio::spawn(async move {
                    let mut hb = heartbeat(ExecutorStatus::Playing);
                    hb.buffer_depth_ms = depth;
                    manager.report_heartbeat("s1", hb).await;
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        let cached = manager.get_state("s1").await.unwrap();
        let stored = store.get_state("s1").await.unwrap().unwrap();
        assert_eq!(stored.last_heartbeat, cached.last_heartbeat);
        assert_eq!(stored.buffer_depth_ms, cached.buffer_depth_ms);
    }
}
