//! Live session and handover endpoints

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use onair_common::auth::Role;
use onair_common::models::LiveSession;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

use super::auth::Caller;
use super::error::{ApiError, ApiResult};
use super::server::AppContext;
use crate::error::Error;
use crate::live::{ConnectRequest, GenerateTokenRequest, HandoverOutcome, HandoverRequest, HandoverResult, IssuedToken};
use crate::priority::{parse_priority, TransitionResult};

const OPERATORS_AND_DJS: &[Role] = &[Role::Admin, Role::Manager, Role::Dj];
/// Ingest servers authenticate with the executor role
const INGEST: &[Role] = &[Role::Admin, Role::Manager, Role::Executor];

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub struct TokenRequest {
    pub station_id: String,
    pub mount_id: String,
    /// Taken from the API key for DJs
    pub user_id: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    pub priority: i64,
    /// Absent or zero selects the configured default
    #[serde(default)]
    pub ttl_secs: u64,
}

#[derive(Debug, Deserialize)]
pub struct AuthorizeRequest {
    pub station_id: String,
    pub mount_id: String,
    pub token: String,
}

#[derive(Debug, Serialize)]
pub struct AuthorizeResponse {
    pub authorized: bool,
}

#[derive(Debug, Deserialize)]
pub struct ConnectBody {
    pub station_id: String,
    pub mount_id: String,
    pub token: String,
    pub source_ip: Option<String>,
    pub source_port: Option<u16>,
    pub user_agent: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SessionsQuery {
    pub station_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct HandoverBody {
    pub session_id: Uuid,
    pub station_id: String,
    pub mount_id: String,
    /// Defaults to the caller (DJs) or the session owner (operators)
    pub user_id: Option<String>,
    pub priority: i64,
    #[serde(default)]
    pub immediate: bool,
    #[serde(default)]
    pub fade_time_ms: u64,
    #[serde(default = "default_true")]
    pub rollback_on_error: bool,
    /// Absent or zero selects the configured handover timeout
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

/// POST /api/v1/live/tokens
pub async fn generate_token(
    State(ctx): State<AppContext>,
    Extension(caller): Extension<Caller>,
    Json(req): Json<TokenRequest>,
) -> ApiResult<(StatusCode, Json<IssuedToken>)> {
    caller.require(OPERATORS_AND_DJS)?;
    let priority = parse_priority(req.priority)?;

    let user_id = match (caller.role, req.user_id) {
        (Role::Dj, requested) => {
            let own = caller
                .user_id
                .clone()
                .ok_or_else(|| ApiError::Forbidden("DJ key has no user id".to_string()))?;
            if requested.as_deref().is_some_and(|u| u != own) {
                return Err(ApiError::Forbidden("DJs may only request their own tokens".to_string()));
            }
            own
        }
        (_, Some(user_id)) => user_id,
        (_, None) => return Err(ApiError::BadRequest("user_id is required".to_string())),
    };

    let issued = ctx
        .live
        .generate_token(GenerateTokenRequest {
            station_id: req.station_id,
            mount_id: req.mount_id,
            username: req.username.unwrap_or_else(|| user_id.clone()),
            user_id,
            priority,
            ttl: Duration::from_secs(req.ttl_secs),
        })
        .await?;

    Ok((StatusCode::CREATED, Json(issued)))
}

/// POST /api/v1/live/authorize
pub async fn authorize_source(
    State(ctx): State<AppContext>,
    Extension(caller): Extension<Caller>,
    Json(req): Json<AuthorizeRequest>,
) -> ApiResult<Json<AuthorizeResponse>> {
    caller.require(INGEST)?;
    let authorized = ctx
        .live
        .authorize_source(&req.station_id, &req.mount_id, &req.token)
        .await?;
    Ok(Json(AuthorizeResponse { authorized }))
}

/// POST /api/v1/live/connect
pub async fn connect(
    State(ctx): State<AppContext>,
    Extension(caller): Extension<Caller>,
    Json(req): Json<ConnectBody>,
) -> ApiResult<(StatusCode, Json<LiveSession>)> {
    caller.require(INGEST)?;
    let session = ctx
        .live
        .handle_connect(ConnectRequest {
            station_id: req.station_id,
            mount_id: req.mount_id,
            token: req.token,
            source_ip: req.source_ip,
            source_port: req.source_port,
            user_agent: req.user_agent,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(session)))
}

/// POST /api/v1/live/sessions/:id/disconnect
pub async fn disconnect(
    State(ctx): State<AppContext>,
    Extension(caller): Extension<Caller>,
    Path(session_id): Path<Uuid>,
) -> ApiResult<Json<LiveSession>> {
    caller.require(INGEST)?;
    Ok(Json(ctx.live.handle_disconnect(session_id).await?))
}

/// GET /api/v1/live/sessions?station_id=
pub async fn list_sessions(
    State(ctx): State<AppContext>,
    Extension(caller): Extension<Caller>,
    Query(query): Query<SessionsQuery>,
) -> ApiResult<Json<Vec<LiveSession>>> {
    caller.require(OPERATORS_AND_DJS)?;
    Ok(Json(ctx.live.active_sessions(query.station_id.as_deref()).await?))
}

/// GET /api/v1/live/sessions/:id
pub async fn get_session(
    State(ctx): State<AppContext>,
    Extension(caller): Extension<Caller>,
    Path(session_id): Path<Uuid>,
) -> ApiResult<Json<LiveSession>> {
    caller.require(OPERATORS_AND_DJS)?;
    let session = ctx.live.get_session(session_id).await?;
    if !caller.may_act_for(&session.user_id) {
        return Err(ApiError::Forbidden("session belongs to another user".to_string()));
    }
    Ok(Json(session))
}

/// POST /api/v1/live/handover
///
/// 200 on success, 409 when priority rules deny it, 504 on deadline and
/// 500 on any other failure. The body is always the handover result.
pub async fn start_handover(
    State(ctx): State<AppContext>,
    Extension(caller): Extension<Caller>,
    Json(req): Json<HandoverBody>,
) -> ApiResult<(StatusCode, Json<HandoverResult>)> {
    caller.require(OPERATORS_AND_DJS)?;
    let priority = parse_priority(req.priority)?;

    let user_id = match (caller.role, req.user_id) {
        (Role::Dj, requested) => {
            let own = caller
                .user_id
                .clone()
                .ok_or_else(|| ApiError::Forbidden("DJ key has no user id".to_string()))?;
            if requested.as_deref().is_some_and(|u| u != own) {
                return Err(Error::Unauthorized("handover on behalf of another user".to_string()).into());
            }
            own
        }
        (_, Some(user_id)) => user_id,
        (_, None) => ctx.live.get_session(req.session_id).await?.user_id,
    };

    let result = ctx
        .live
        .start_handover(HandoverRequest {
            session_id: req.session_id,
            station_id: req.station_id,
            mount_id: req.mount_id,
            user_id,
            priority,
            immediate: req.immediate,
            fade_time_ms: req.fade_time_ms,
            rollback_on_error: req.rollback_on_error,
            timeout: req.timeout_ms.filter(|ms| *ms > 0).map(Duration::from_millis),
        })
        .await?;

    let status = match result.outcome {
        HandoverOutcome::Completed => StatusCode::OK,
        HandoverOutcome::Denied => StatusCode::CONFLICT,
        HandoverOutcome::TimedOut => StatusCode::GATEWAY_TIMEOUT,
        HandoverOutcome::Failed => StatusCode::INTERNAL_SERVER_ERROR,
    };
    Ok((status, Json(result)))
}

/// POST /api/v1/live/handover/:session_id/release
pub async fn release_handover(
    State(ctx): State<AppContext>,
    Extension(caller): Extension<Caller>,
    Path(session_id): Path<Uuid>,
) -> ApiResult<Json<TransitionResult>> {
    caller.require(OPERATORS_AND_DJS)?;
    let session = ctx.live.get_session(session_id).await?;
    if !caller.may_act_for(&session.user_id) {
        return Err(Error::Unauthorized("session belongs to another user".to_string()).into());
    }

    let result = ctx.live.release_handover(session_id).await?;
    info!(%session_id, role = %caller.role, "handover released via API");
    Ok(Json(result))
}
