//! Router assembly and shared handler context

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use onair_common::config::OnAirConfig;
use onair_common::events::EventBus;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use super::auth::{auth_middleware, KeyRing};
use crate::executor::ExecutorStateManager;
use crate::live::{LiveService, LiveSettings};
use crate::pipeline::PipelineController;
use crate::priority::{PriorityService, Resolver};
use crate::store::{ExecutorStore, LiveStore, PriorityStore};

/// State shared by every handler
#[derive(Clone)]
pub struct AppContext {
    pub priority: Arc<PriorityService>,
    pub live: Arc<LiveService>,
    pub executor: Arc<ExecutorStateManager>,
    pub events: Arc<EventBus>,
    pub keys: Arc<KeyRing>,
}

impl AppContext {
    /// Wire every service over one store implementing all persistence ports
    pub fn wire<S>(store: Arc<S>, config: &OnAirConfig, pipeline: Option<Arc<dyn PipelineController>>) -> Self
    where
        S: PriorityStore + LiveStore + ExecutorStore + 'static,
    {
        let events = Arc::new(EventBus::new(config.events.capacity));
        let resolver = Arc::new(Resolver::new(store.clone()));
        let priority = Arc::new(PriorityService::new(resolver, events.clone()));

        let mut live = LiveService::new(store.clone(), priority.clone(), events.clone(), LiveSettings::from(config));
        if let Some(pipeline) = pipeline {
            live = live.with_pipeline(pipeline);
        }

        let executor = Arc::new(ExecutorStateManager::new(
            store,
            events.clone(),
            config.executor.stale_after(),
        ));

        Self {
            priority,
            live: Arc::new(live),
            executor,
            events,
            keys: Arc::new(KeyRing::new(&config.auth.api_keys)),
        }
    }
}

/// Build the application router
///
/// `/health` is public; everything else passes the API key middleware and
/// then per-handler role checks.
pub fn build_router(ctx: AppContext) -> Router {
    let protected = Router::new()
        // Priority
        .route("/api/v1/priority/emergency", post(super::priority::insert_emergency))
        .route("/api/v1/priority/override", post(super::priority::start_override))
        .route("/api/v1/priority/automation", post(super::priority::activate_automation))
        .route("/api/v1/priority/scheduled", post(super::priority::start_scheduled_live))
        .route("/api/v1/priority/release", post(super::priority::release))
        .route("/api/v1/priority/:station_id/current", get(super::priority::get_current))
        .route("/api/v1/priority/:station_id/active", get(super::priority::get_active))
        .route("/api/v1/priority/:station_id/history", get(super::priority::get_history))
        // Live
        .route("/api/v1/live/tokens", post(super::live::generate_token))
        .route("/api/v1/live/authorize", post(super::live::authorize_source))
        .route("/api/v1/live/connect", post(super::live::connect))
        .route("/api/v1/live/sessions", get(super::live::list_sessions))
        .route("/api/v1/live/sessions/:id", get(super::live::get_session))
        .route("/api/v1/live/sessions/:id/disconnect", post(super::live::disconnect))
        .route("/api/v1/live/handover", post(super::live::start_handover))
        .route("/api/v1/live/handover/:session_id/release", post(super::live::release_handover))
        // Executor
        .route("/api/v1/executor/heartbeat/:station_id", post(super::executor::report_heartbeat))
        .route("/api/v1/executor/states", get(super::executor::list_states))
        .route("/api/v1/executor/states/:station_id", get(super::executor::get_state))
        .route("/api/v1/executor/telemetry/:station_id", get(super::executor::get_telemetry))
        .route("/api/v1/executor/health", get(super::executor::get_health))
        // Events
        .route("/events", get(super::sse::event_stream))
        .layer(middleware::from_fn_with_state(ctx.clone(), auth_middleware));

    Router::new()
        .merge(protected)
        .merge(super::health::health_routes())
        .with_state(ctx)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
