//! Resolver arbitration and transition tests over the in-memory store

mod helpers;

use chrono::Utc;
use helpers::{Harness, MOUNT, STATION};
use onair_common::events::TransitionType;
use onair_common::models::{Metadata, PriorityLevel, PrioritySource, SourceType};
use onair_ctl::priority::{Resolver, TransitionRequest};
use onair_ctl::store::{MemoryStore, PriorityStore};
use onair_ctl::Error;
use std::sync::Arc;

fn request(priority: PriorityLevel, source_id: &str) -> TransitionRequest {
    TransitionRequest {
        station_id: STATION.to_string(),
        mount_id: MOUNT.to_string(),
        new_priority: priority,
        source_type: SourceType::Media,
        source_id: source_id.to_string(),
        metadata: Metadata::new(),
        force_preempt: false,
    }
}

fn resolver() -> (Arc<MemoryStore>, Resolver) {
    let store = Arc::new(MemoryStore::new());
    let resolver = Resolver::new(store.clone());
    (store, resolver)
}

async fn seed(store: &MemoryStore, priority: PriorityLevel, source_id: &str) -> PrioritySource {
    let row = PrioritySource::activate(
        STATION,
        MOUNT,
        priority,
        SourceType::Media,
        source_id,
        Metadata::new(),
        Utc::now(),
    );
    store.insert_source(&row).await.unwrap();
    row
}

#[tokio::test]
async fn test_switch_from_nothing() {
    let (_store, resolver) = resolver();

    let result = resolver
        .transition(request(PriorityLevel::Automation, "playlist-1"))
        .await
        .unwrap();

    assert_eq!(result.transition_type, TransitionType::Switch);
    assert!(!result.preempted);
    assert!(!result.requires_fade);
    assert!(result.old_source.is_none());
    assert_eq!(result.new_source.unwrap().source_id, "playlist-1");
}

#[tokio::test]
async fn test_live_override_preempts_automation() {
    let (store, resolver) = resolver();
    seed(&store, PriorityLevel::Automation, "playlist-1").await;

    let result = resolver
        .transition(request(PriorityLevel::LiveOverride, "dj-1"))
        .await
        .unwrap();

    assert_eq!(result.transition_type, TransitionType::Preempt);
    assert!(result.preempted);
    assert!(result.requires_fade);
    let old = result.old_source.unwrap();
    assert_eq!(old.source_id, "playlist-1");
    assert!(!old.active);
    assert!(old.deactivated_at.is_some());

    let current = resolver.get_current_source(STATION).await.unwrap();
    assert_eq!(current.source_id, "dj-1");
}

#[tokio::test]
async fn test_denied_transition_leaves_store_unchanged() {
    let (store, resolver) = resolver();
    seed(&store, PriorityLevel::LiveScheduled, "show-1").await;
    let before = store.all_sources().await;

    let result = resolver
        .transition(request(PriorityLevel::Automation, "playlist-1"))
        .await
        .unwrap();

    assert!(result.is_denied());
    assert_eq!(result.transition_type, TransitionType::None);
    assert!(result.new_source.is_none());
    assert_eq!(result.old_source.unwrap().source_id, "show-1");
    assert_eq!(store.all_sources().await, before);
}

#[tokio::test]
async fn test_equal_priority_is_denied_unless_forced() {
    let (store, resolver) = resolver();
    seed(&store, PriorityLevel::Automation, "playlist-1").await;

    let denied = resolver
        .transition(request(PriorityLevel::Automation, "playlist-2"))
        .await
        .unwrap();
    assert!(denied.is_denied());

    let mut forced = request(PriorityLevel::Automation, "playlist-2");
    forced.force_preempt = true;
    let result = resolver.transition(forced).await.unwrap();
    assert_eq!(result.transition_type, TransitionType::Switch);
    assert!(result.preempted);
}

#[tokio::test]
async fn test_emergency_cuts_live_override() {
    let (store, resolver) = resolver();
    seed(&store, PriorityLevel::LiveOverride, "dj-1").await;

    let result = resolver
        .insert_emergency(STATION, MOUNT, "eas-alert", Metadata::new())
        .await
        .unwrap();

    assert_eq!(result.transition_type, TransitionType::Emergency);
    assert!(!result.requires_fade);
    assert!(!result.old_source.unwrap().active);

    let new = result.new_source.unwrap();
    assert_eq!(new.priority, PriorityLevel::Emergency);
    assert_eq!(new.source_type, SourceType::Emergency);
}

#[tokio::test]
async fn test_emergency_over_emergency_still_emergency() {
    let (store, resolver) = resolver();
    seed(&store, PriorityLevel::Emergency, "eas-1").await;

    let result = resolver
        .insert_emergency(STATION, MOUNT, "eas-2", Metadata::new())
        .await
        .unwrap();
    assert_eq!(result.transition_type, TransitionType::Emergency);
    assert!(!result.requires_fade);
    assert_eq!(resolver.get_current_source(STATION).await.unwrap().source_id, "eas-2");
}

#[tokio::test]
async fn test_release_resumes_automation_underneath() {
    let (store, resolver) = resolver();
    seed(&store, PriorityLevel::Automation, "playlist-1").await;
    seed(&store, PriorityLevel::LiveOverride, "dj-1").await;

    let result = resolver.release(STATION, "dj-1").await.unwrap();

    assert_eq!(result.transition_type, TransitionType::Release);
    assert!(result.requires_fade);
    assert!(!result.preempted);
    assert_eq!(result.old_source.unwrap().source_id, "dj-1");
    let next = result.new_source.unwrap();
    assert_eq!(next.priority, PriorityLevel::Automation);
    assert_eq!(next.source_id, "playlist-1");
}

#[tokio::test]
async fn test_release_picks_smallest_remaining_priority() {
    let (store, resolver) = resolver();
    seed(&store, PriorityLevel::Fallback, "silence").await;
    seed(&store, PriorityLevel::Automation, "playlist-1").await;
    seed(&store, PriorityLevel::LiveOverride, "dj-1").await;

    let result = resolver.release(STATION, "dj-1").await.unwrap();
    assert_eq!(result.new_source.unwrap().source_id, "playlist-1");
}

#[tokio::test]
async fn test_release_last_source_falls_back() {
    let (store, resolver) = resolver();
    seed(&store, PriorityLevel::LiveOverride, "dj-1").await;

    let result = resolver.release(STATION, "dj-1").await.unwrap();
    assert_eq!(result.transition_type, TransitionType::Fallback);
    assert!(result.new_source.is_none());
    assert!(matches!(
        resolver.get_current_source(STATION).await,
        Err(Error::NoActiveSources(_))
    ));
}

#[tokio::test]
async fn test_release_unknown_source() {
    let (_store, resolver) = resolver();
    assert!(matches!(
        resolver.release(STATION, "ghost").await,
        Err(Error::SourceNotFound { .. })
    ));
}

#[tokio::test]
async fn test_release_of_inactive_source_keeps_history() {
    let (store, resolver) = resolver();
    seed(&store, PriorityLevel::Automation, "playlist-1").await;
    seed(&store, PriorityLevel::LiveOverride, "dj-1").await;
    resolver.release(STATION, "dj-1").await.unwrap();
    let before = store.all_sources().await;

    assert!(matches!(
        resolver.release(STATION, "dj-1").await,
        Err(Error::SourceNotFound { .. })
    ));
    assert_eq!(store.all_sources().await, before);
}

#[tokio::test]
async fn test_release_resumes_stale_row_as_is() {
    let (store, resolver) = resolver();
    let mut stale = PrioritySource::activate(
        STATION,
        MOUNT,
        PriorityLevel::Automation,
        SourceType::Media,
        "playlist-yesterday",
        Metadata::new(),
        Utc::now() - chrono::Duration::hours(20),
    );
    stale.metadata.insert("note".into(), "left over".into());
    store.insert_source(&stale).await.unwrap();
    seed(&store, PriorityLevel::LiveOverride, "dj-1").await;

    let result = resolver.release(STATION, "dj-1").await.unwrap();
    assert_eq!(result.new_source.unwrap(), stale);
}

#[tokio::test]
async fn test_current_source_is_smallest_priority() {
    let (store, resolver) = resolver();
    seed(&store, PriorityLevel::Fallback, "silence").await;
    seed(&store, PriorityLevel::LiveScheduled, "show-1").await;
    seed(&store, PriorityLevel::Automation, "playlist-1").await;

    assert_eq!(
        resolver.get_current_source(STATION).await.unwrap().source_id,
        "show-1"
    );
    let active: Vec<PriorityLevel> = resolver
        .get_active_sources_by_priority(STATION)
        .await
        .unwrap()
        .into_iter()
        .map(|s| s.priority)
        .collect();
    assert_eq!(
        active,
        vec![PriorityLevel::LiveScheduled, PriorityLevel::Automation, PriorityLevel::Fallback]
    );
}

#[tokio::test]
async fn test_failed_insert_keeps_old_source_active() {
    let (store, resolver) = resolver();
    seed(&store, PriorityLevel::Automation, "playlist-1").await;
    let before = store.all_sources().await;

    store.fail_next_insert();
    let err = resolver
        .transition(request(PriorityLevel::LiveOverride, "dj-1"))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Store { op: "create new source", .. }));
    assert_eq!(store.all_sources().await, before);
    assert_eq!(
        resolver.get_current_source(STATION).await.unwrap().source_id,
        "playlist-1"
    );
}

#[tokio::test]
async fn test_failed_commit_keeps_old_source_active() {
    let (store, resolver) = resolver();
    seed(&store, PriorityLevel::Automation, "playlist-1").await;

    store.fail_next_commit();
    let err = resolver
        .transition(request(PriorityLevel::LiveOverride, "dj-1"))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Store { op: "commit transaction", .. }));
    assert_eq!(
        resolver.get_current_source(STATION).await.unwrap().source_id,
        "playlist-1"
    );
}

#[tokio::test]
async fn test_failed_deactivate_in_release_is_rolled_back() {
    let (store, resolver) = resolver();
    seed(&store, PriorityLevel::LiveOverride, "dj-1").await;

    store.fail_next_deactivate();
    assert!(resolver.release(STATION, "dj-1").await.is_err());
    assert_eq!(
        resolver.get_current_source(STATION).await.unwrap().source_id,
        "dj-1"
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_transitions_preempt_once() {
    let (store, resolver) = resolver();
    seed(&store, PriorityLevel::Automation, "playlist-1").await;
    let resolver = Arc::new(resolver);

    let mut handles = Vec::new();
    for i in 0..8 {
        let resolver = resolver.clone();
        handles.push(tokio::spawn(async move {
            resolver
                .transition(request(PriorityLevel::LiveOverride, &format!("dj-{}", i)))
                .await
                .unwrap()
        }));
    }

    let mut winners = 0;
    for handle in handles {
        let result = handle.await.unwrap();
        if !result.is_denied() {
            winners += 1;
            assert_eq!(result.old_source.unwrap().source_id, "playlist-1");
        }
    }

    assert_eq!(winners, 1);
    let active = resolver.get_active_sources_by_priority(STATION).await.unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].priority, PriorityLevel::LiveOverride);
}

#[tokio::test]
async fn test_stations_are_independent() {
    let (_store, resolver) = resolver();
    resolver
        .transition(request(PriorityLevel::LiveOverride, "dj-1"))
        .await
        .unwrap();

    let mut other = request(PriorityLevel::Automation, "playlist-2");
    other.station_id = "station-2".to_string();
    let result = resolver.transition(other).await.unwrap();
    assert_eq!(result.transition_type, TransitionType::Switch);
}

#[tokio::test]
async fn test_history_keeps_deactivated_rows() {
    let harness = Harness::new();
    harness.seed(PriorityLevel::Automation, SourceType::Media, "playlist-1").await;
    let resolver = harness.ctx.priority.resolver();

    resolver
        .transition(request(PriorityLevel::LiveOverride, "dj-1"))
        .await
        .unwrap();
    resolver.release(STATION, "dj-1").await.unwrap();

    let history = resolver.history(STATION, 10).await.unwrap();
    assert_eq!(history.len(), 2);
    assert!(history.iter().all(|s| !s.active));
}
