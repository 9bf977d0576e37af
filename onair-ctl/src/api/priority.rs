//! Priority endpoints
//!
//! A denied transition is answered with 409 and the unchanged current
//! source in the body.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use onair_common::auth::Role;
use onair_common::models::{Metadata, PrioritySource, SourceType};
use serde::Deserialize;

use super::auth::Caller;
use super::error::ApiResult;
use super::server::AppContext;
use crate::priority::TransitionResult;

const DEFAULT_HISTORY_LIMIT: usize = 50;
const MAX_HISTORY_LIMIT: usize = 500;

const OPERATORS: &[Role] = &[Role::Admin, Role::Manager];
const OPERATORS_AND_DJS: &[Role] = &[Role::Admin, Role::Manager, Role::Dj];
const ANY_ROLE: &[Role] = &[Role::Admin, Role::Manager, Role::Dj, Role::Executor];

fn live_source() -> SourceType {
    SourceType::Live
}

fn media_source() -> SourceType {
    SourceType::Media
}

#[derive(Debug, Deserialize)]
pub struct EmergencyRequest {
    pub station_id: String,
    pub mount_id: String,
    pub media_id: String,
    #[serde(default)]
    pub metadata: Metadata,
}

#[derive(Debug, Deserialize)]
pub struct OverrideRequest {
    pub station_id: String,
    pub mount_id: String,
    #[serde(default = "live_source")]
    pub source_type: SourceType,
    pub source_id: String,
    #[serde(default)]
    pub metadata: Metadata,
}

#[derive(Debug, Deserialize)]
pub struct AutomationRequest {
    pub station_id: String,
    pub mount_id: String,
    #[serde(default = "media_source")]
    pub source_type: SourceType,
    pub source_id: String,
    #[serde(default)]
    pub metadata: Metadata,
}

#[derive(Debug, Deserialize)]
pub struct ScheduledLiveRequest {
    pub station_id: String,
    pub mount_id: String,
    pub source_id: String,
    #[serde(default)]
    pub metadata: Metadata,
}

#[derive(Debug, Deserialize)]
pub struct ReleaseRequest {
    pub station_id: String,
    pub source_id: String,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<usize>,
}

fn transition_response(result: TransitionResult) -> (StatusCode, Json<TransitionResult>) {
    let status = if result.is_denied() {
        StatusCode::CONFLICT
    } else {
        StatusCode::OK
    };
    (status, Json(result))
}

/// POST /api/v1/priority/emergency
pub async fn insert_emergency(
    State(ctx): State<AppContext>,
    Extension(caller): Extension<Caller>,
    Json(req): Json<EmergencyRequest>,
) -> ApiResult<(StatusCode, Json<TransitionResult>)> {
    caller.require(OPERATORS)?;
    let result = ctx
        .priority
        .insert_emergency(&req.station_id, &req.mount_id, &req.media_id, req.metadata)
        .await?;
    Ok(transition_response(result))
}

/// POST /api/v1/priority/override
pub async fn start_override(
    State(ctx): State<AppContext>,
    Extension(caller): Extension<Caller>,
    Json(req): Json<OverrideRequest>,
) -> ApiResult<(StatusCode, Json<TransitionResult>)> {
    caller.require(OPERATORS_AND_DJS)?;
    let result = ctx
        .priority
        .start_override(&req.station_id, &req.mount_id, req.source_type, &req.source_id, req.metadata)
        .await?;
    Ok(transition_response(result))
}

/// POST /api/v1/priority/automation
pub async fn activate_automation(
    State(ctx): State<AppContext>,
    Extension(caller): Extension<Caller>,
    Json(req): Json<AutomationRequest>,
) -> ApiResult<(StatusCode, Json<TransitionResult>)> {
    caller.require(OPERATORS)?;
    let result = ctx
        .priority
        .activate_automation(&req.station_id, &req.mount_id, req.source_type, &req.source_id, req.metadata)
        .await?;
    Ok(transition_response(result))
}

/// POST /api/v1/priority/scheduled
pub async fn start_scheduled_live(
    State(ctx): State<AppContext>,
    Extension(caller): Extension<Caller>,
    Json(req): Json<ScheduledLiveRequest>,
) -> ApiResult<(StatusCode, Json<TransitionResult>)> {
    caller.require(OPERATORS)?;
    let result = ctx
        .priority
        .start_scheduled_live(&req.station_id, &req.mount_id, &req.source_id, req.metadata)
        .await?;
    Ok(transition_response(result))
}

/// POST /api/v1/priority/release
pub async fn release(
    State(ctx): State<AppContext>,
    Extension(caller): Extension<Caller>,
    Json(req): Json<ReleaseRequest>,
) -> ApiResult<Json<TransitionResult>> {
    caller.require(OPERATORS_AND_DJS)?;
    let result = ctx.priority.release(&req.station_id, &req.source_id).await?;
    Ok(Json(result))
}

/// GET /api/v1/priority/:station_id/current
pub async fn get_current(
    State(ctx): State<AppContext>,
    Extension(caller): Extension<Caller>,
    Path(station_id): Path<String>,
) -> ApiResult<Json<PrioritySource>> {
    caller.require(ANY_ROLE)?;
    Ok(Json(ctx.priority.get_current(&station_id).await?))
}

/// GET /api/v1/priority/:station_id/active
pub async fn get_active(
    State(ctx): State<AppContext>,
    Extension(caller): Extension<Caller>,
    Path(station_id): Path<String>,
) -> ApiResult<Json<Vec<PrioritySource>>> {
    caller.require(ANY_ROLE)?;
    Ok(Json(ctx.priority.get_active(&station_id).await?))
}

/// GET /api/v1/priority/:station_id/history?limit=N
pub async fn get_history(
    State(ctx): State<AppContext>,
    Extension(caller): Extension<Caller>,
    Path(station_id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<Json<Vec<PrioritySource>>> {
    caller.require(OPERATORS)?;
    let limit = query
        .limit
        .unwrap_or(DEFAULT_HISTORY_LIMIT)
        .clamp(1, MAX_HISTORY_LIMIT);
    Ok(Json(ctx.priority.history(&station_id, limit).await?))
}
