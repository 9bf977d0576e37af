//! SqliteStore against an on-disk database

use chrono::{Duration, Utc};
use onair_common::db::init_database;
use onair_common::events::TransitionType;
use onair_common::models::{
    ExecutorState, ExecutorStatus, LiveSession, LiveToken, Metadata, PriorityLevel,
    PrioritySource, SourceType,
};
use onair_ctl::priority::{Resolver, TransitionRequest};
use onair_ctl::store::{ExecutorStore, LiveStore, PriorityStore, RedeemOutcome, SqliteStore};
use std::sync::Arc;
use tempfile::TempDir;
use uuid::Uuid;

async fn open_store() -> (TempDir, Arc<SqliteStore>) {
    let dir = tempfile::tempdir().unwrap();
    let pool = init_database(&dir.path().join("onair.db")).await.unwrap();
    (dir, Arc::new(SqliteStore::new(pool)))
}

fn token(value: &str, expires_in: Duration) -> LiveToken {
    let now = Utc::now();
    LiveToken {
        token: value.to_string(),
        session_id: Uuid::new_v4(),
        station_id: "s1".to_string(),
        mount_id: "main".to_string(),
        user_id: "dj-7".to_string(),
        username: "Night Owl".to_string(),
        priority: PriorityLevel::LiveOverride,
        expires_at: now + expires_in,
        used: false,
        used_at: None,
        created_at: now,
    }
}

#[tokio::test]
async fn test_source_round_trip_preserves_fields() {
    let (_dir, store) = open_store().await;
    let mut metadata = Metadata::new();
    metadata.insert("playlist".into(), "overnight".into());
    let row = PrioritySource::activate(
        "s1",
        "main",
        PriorityLevel::Automation,
        SourceType::Media,
        "playlist-1",
        metadata,
        Utc::now(),
    );

    store.insert_source(&row).await.unwrap();
    let active = store.active_sources("s1").await.unwrap();

    assert_eq!(active.len(), 1);
    assert_eq!(active[0].id, row.id);
    assert_eq!(active[0].metadata, row.metadata);
    // Stored with microsecond precision
    assert_eq!(
        active[0].activated_at.timestamp_micros(),
        row.activated_at.timestamp_micros()
    );
}

#[tokio::test]
async fn test_transition_and_release_through_resolver() {
    let (_dir, store) = open_store().await;
    let resolver = Resolver::new(store.clone());
    let request = |priority, source_id: &str| TransitionRequest {
        station_id: "s1".to_string(),
        mount_id: "main".to_string(),
        new_priority: priority,
        source_type: SourceType::Media,
        source_id: source_id.to_string(),
        metadata: Metadata::new(),
        force_preempt: false,
    };

    let first = resolver.transition(request(PriorityLevel::Automation, "playlist-1")).await.unwrap();
    assert_eq!(first.transition_type, TransitionType::Switch);

    let second = resolver.transition(request(PriorityLevel::LiveOverride, "dj-1")).await.unwrap();
    assert_eq!(second.transition_type, TransitionType::Preempt);

    let denied = resolver.transition(request(PriorityLevel::Fallback, "silence")).await.unwrap();
    assert!(denied.is_denied());

    let released = resolver.release("s1", "dj-1").await.unwrap();
    assert_eq!(released.transition_type, TransitionType::Fallback);

    let history = store.history("s1", 10).await.unwrap();
    assert_eq!(history.len(), 2);
    assert!(history.iter().all(|s| !s.active && s.deactivated_at.is_some()));
}

#[tokio::test]
async fn test_rolled_back_transaction_writes_nothing() {
    let (_dir, store) = open_store().await;
    let row = PrioritySource::activate(
        "s1",
        "main",
        PriorityLevel::Automation,
        SourceType::Media,
        "playlist-1",
        Metadata::new(),
        Utc::now(),
    );

    let mut tx = store.begin().await.unwrap();
    tx.insert(&row).await.unwrap();
    assert!(tx.current_source("s1").await.unwrap().is_some());
    tx.rollback().await.unwrap();

    assert!(store.active_sources("s1").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_redeem_outcomes() {
    let (_dir, store) = open_store().await;
    store.insert_token(&token("fresh", Duration::hours(1))).await.unwrap();
    store.insert_token(&token("stale", Duration::seconds(-5))).await.unwrap();
    let now = Utc::now();

    assert!(matches!(
        store.redeem_token("s1", "main", "fresh", now).await.unwrap(),
        RedeemOutcome::Redeemed(t) if t.used && t.used_at.is_some()
    ));
    assert_eq!(
        store.redeem_token("s1", "main", "fresh", now).await.unwrap(),
        RedeemOutcome::AlreadyUsed
    );
    assert_eq!(
        store.redeem_token("s1", "main", "stale", now).await.unwrap(),
        RedeemOutcome::Invalid
    );
    assert_eq!(
        store.redeem_token("s2", "main", "fresh", now).await.unwrap(),
        RedeemOutcome::Invalid
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_redeem_single_winner() {
    let (_dir, store) = open_store().await;
    store.insert_token(&token("contested", Duration::hours(1))).await.unwrap();

    let mut handles = Vec::new();
    for _ in 0..6 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            store.redeem_token("s1", "main", "contested", Utc::now()).await.unwrap()
        }));
    }

    let mut winners = 0;
    for handle in handles {
        match handle.await.unwrap() {
            RedeemOutcome::Redeemed(_) => winners += 1,
            RedeemOutcome::AlreadyUsed => {}
            RedeemOutcome::Invalid => panic!("token should be valid"),
        }
    }
    assert_eq!(winners, 1);
}

#[tokio::test]
async fn test_session_lifecycle() {
    let (_dir, store) = open_store().await;
    let now = Utc::now();
    let mut session = LiveSession {
        id: Uuid::new_v4(),
        station_id: "s1".to_string(),
        mount_id: "main".to_string(),
        user_id: "dj-7".to_string(),
        username: "Night Owl".to_string(),
        priority: PriorityLevel::LiveScheduled,
        token: "t".to_string(),
        source_ip: Some("10.0.0.5".to_string()),
        source_port: Some(8000),
        user_agent: None,
        active: true,
        connected_at: now,
        disconnected_at: None,
        metadata: Metadata::new(),
    };

    assert!(store.create_session(&session).await.unwrap());
    assert!(!store.create_session(&session).await.unwrap());
    assert_eq!(store.active_sessions(Some("s1")).await.unwrap().len(), 1);

    session.disconnect(now + Duration::seconds(90));
    session.metadata.insert("handover_completed".into(), true.into());
    store.update_session(&session).await.unwrap();

    let stored = store.get_session(session.id).await.unwrap().unwrap();
    assert!(!stored.active);
    assert_eq!(stored.source_port, Some(8000));
    assert_eq!(stored.duration(Utc::now()).num_seconds(), 90);
    assert_eq!(stored.metadata["handover_completed"], true);
    assert!(store.active_sessions(None).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_executor_upsert_is_latest_wins() {
    let (_dir, store) = open_store().await;
    let mut state = ExecutorState {
        station_id: "s1".to_string(),
        mount_id: "main".to_string(),
        state: ExecutorStatus::Starting,
        current_priority: None,
        current_source_id: None,
        next_source_id: None,
        audio_level_l: -60.0,
        audio_level_r: -60.0,
        loudness_lufs: -70.0,
        buffer_depth_ms: 0,
        underrun_count: 0,
        last_heartbeat: Utc::now(),
        metadata: Metadata::new(),
    };
    store.upsert_state(&state).await.unwrap();

    state.state = ExecutorStatus::Playing;
    state.current_priority = Some(PriorityLevel::Automation);
    state.underrun_count = 2;
    store.upsert_state(&state).await.unwrap();

    let stored = store.get_state("s1").await.unwrap().unwrap();
    assert_eq!(stored.state, ExecutorStatus::Playing);
    assert_eq!(stored.current_priority, Some(PriorityLevel::Automation));
    assert_eq!(stored.underrun_count, 2);
    assert_eq!(store.list_states().await.unwrap().len(), 1);
    assert!(store.get_state("s2").await.unwrap().is_none());
}

#[tokio::test]
async fn test_executor_upsert_ignores_older_snapshot() {
    let (_dir, store) = open_store().await;
    let now = Utc::now();
    let newer = ExecutorState {
        station_id: "s1".to_string(),
        mount_id: "main".to_string(),
        state: ExecutorStatus::Playing,
        current_priority: Some(PriorityLevel::Automation),
        current_source_id: Some("playlist-1".to_string()),
        next_source_id: None,
        audio_level_l: -18.0,
        audio_level_r: -18.0,
        loudness_lufs: -16.0,
        buffer_depth_ms: 480,
        underrun_count: 0,
        last_heartbeat: now,
        metadata: Metadata::new(),
    };
    store.upsert_state(&newer).await.unwrap();

    let mut older = newer.clone();
    older.state = ExecutorStatus::Starting;
    older.buffer_depth_ms = 0;
    older.last_heartbeat = now - Duration::seconds(2);
    store.upsert_state(&older).await.unwrap();

    let stored = store.get_state("s1").await.unwrap().unwrap();
    assert_eq!(stored.state, ExecutorStatus::Playing);
    assert_eq!(stored.buffer_depth_ms, 480);
    assert_eq!(stored.last_heartbeat.timestamp_micros(), now.timestamp_micros());
}
