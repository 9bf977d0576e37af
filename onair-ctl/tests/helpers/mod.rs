//! Shared fixtures for onair-ctl integration tests
//!
//! - `Harness`: every service wired over an in-memory store
//! - `ScriptedPipeline`: pipeline controller double with fault injection
//! - `make_request`: one-shot HTTP requests against the router

#![allow(dead_code)]

pub mod pipeline;

pub use pipeline::{PipelineCall, ScriptedPipeline};

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use chrono::Utc;
use http_body_util::BodyExt;
use onair_common::config::OnAirConfig;
use onair_common::models::{LiveSession, Metadata, PriorityLevel, PrioritySource, SourceType};
use onair_ctl::api::{build_router, AppContext, API_KEY_HEADER};
use onair_ctl::live::{ConnectRequest, GenerateTokenRequest};
use onair_ctl::pipeline::PipelineController;
use onair_ctl::store::{MemoryStore, PriorityStore};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

pub const STATION: &str = "station-1";
pub const MOUNT: &str = "main";

/// Config with short deadlines suitable for tests
pub fn test_config() -> OnAirConfig {
    let mut config = OnAirConfig::default();
    config.priority.handover_timeout_ms = 200;
    config.executor.stale_after_ms = 50;
    config.events.capacity = 64;
    config
}

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub pipeline: Arc<ScriptedPipeline>,
    pub ctx: AppContext,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: OnAirConfig) -> Self {
        let store = Arc::new(MemoryStore::new());
        let pipeline = Arc::new(ScriptedPipeline::default());
        let controller: Arc<dyn PipelineController> = pipeline.clone();
        let ctx = AppContext::wire(store.clone(), &config, Some(controller));
        Self { store, pipeline, ctx }
    }

    /// Same wiring, without a pipeline controller
    pub fn without_pipeline() -> Self {
        let store = Arc::new(MemoryStore::new());
        let ctx = AppContext::wire(store.clone(), &test_config(), None);
        Self {
            store,
            pipeline: Arc::new(ScriptedPipeline::default()),
            ctx,
        }
    }

    pub fn router(&self) -> Router {
        build_router(self.ctx.clone())
    }

    /// Insert an active row directly, bypassing arbitration
    pub async fn seed(&self, priority: PriorityLevel, source_type: SourceType, source_id: &str) -> PrioritySource {
        let row = PrioritySource::activate(
            STATION,
            MOUNT,
            priority,
            source_type,
            source_id,
            Metadata::new(),
            Utc::now(),
        );
        self.store.insert_source(&row).await.unwrap();
        row
    }

    /// Issue a token for `user_id` and connect with it
    pub async fn connect_dj(&self, user_id: &str, priority: PriorityLevel) -> LiveSession {
        let issued = self
            .ctx
            .live
            .generate_token(GenerateTokenRequest {
                station_id: STATION.to_string(),
                mount_id: MOUNT.to_string(),
                user_id: user_id.to_string(),
                username: format!("DJ {}", user_id),
                priority,
                ttl: Duration::ZERO,
            })
            .await
            .unwrap();

        self.ctx
            .live
            .handle_connect(ConnectRequest {
                station_id: STATION.to_string(),
                mount_id: MOUNT.to_string(),
                token: issued.token,
                source_ip: Some("10.0.0.5".to_string()),
                source_port: Some(8000),
                user_agent: Some("butt/0.1.40".to_string()),
            })
            .await
            .unwrap()
    }

    /// Active source ids for the station, highest priority first
    pub async fn active_ids(&self) -> Vec<String> {
        self.ctx
            .priority
            .get_active(STATION)
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.source_id)
            .collect()
    }
}

/// Send one request through the router
pub async fn make_request(
    app: &Router,
    method: &str,
    path: &str,
    body: Option<Value>,
    api_key: Option<&str>,
) -> (StatusCode, Option<Value>) {
    let method = match method {
        "GET" => Method::GET,
        "POST" => Method::POST,
        _ => panic!("Unsupported method"),
    };

    let mut request = Request::builder().method(method).uri(path);
    if let Some(key) = api_key {
        request = request.header(API_KEY_HEADER, key);
    }

    let request = match body {
        Some(json_body) => request
            .header("content-type", "application/json")
            .body(Body::from(json_body.to_string()))
            .unwrap(),
        None => request.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();

    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json_body = if body.is_empty() {
        None
    } else {
        serde_json::from_slice(&body).ok()
    };

    (status, json_body)
}
