//! Executor telemetry endpoints

use axum::{
    extract::{Path, State},
    Extension, Json,
};
use onair_common::auth::Role;
use onair_common::models::ExecutorState;

use super::auth::Caller;
use super::error::ApiResult;
use super::server::AppContext;
use crate::executor::{HealthSummary, Heartbeat, Telemetry};

const REPORTERS: &[Role] = &[Role::Admin, Role::Executor];
const ANY_ROLE: &[Role] = &[Role::Admin, Role::Manager, Role::Dj, Role::Executor];

/// POST /api/v1/executor/heartbeat/:station_id
pub async fn report_heartbeat(
    State(ctx): State<AppContext>,
    Extension(caller): Extension<Caller>,
    Path(station_id): Path<String>,
    Json(heartbeat): Json<Heartbeat>,
) -> ApiResult<Json<ExecutorState>> {
    caller.require(REPORTERS)?;
    Ok(Json(ctx.executor.report_heartbeat(&station_id, heartbeat).await))
}

/// GET /api/v1/executor/states
pub async fn list_states(
    State(ctx): State<AppContext>,
    Extension(caller): Extension<Caller>,
) -> ApiResult<Json<Vec<ExecutorState>>> {
    caller.require(ANY_ROLE)?;
    Ok(Json(ctx.executor.list_states().await?))
}

/// GET /api/v1/executor/states/:station_id
pub async fn get_state(
    State(ctx): State<AppContext>,
    Extension(caller): Extension<Caller>,
    Path(station_id): Path<String>,
) -> ApiResult<Json<ExecutorState>> {
    caller.require(ANY_ROLE)?;
    Ok(Json(ctx.executor.get_state(&station_id).await?))
}

/// GET /api/v1/executor/telemetry/:station_id
pub async fn get_telemetry(
    State(ctx): State<AppContext>,
    Extension(caller): Extension<Caller>,
    Path(station_id): Path<String>,
) -> ApiResult<Json<Telemetry>> {
    caller.require(ANY_ROLE)?;
    Ok(Json(ctx.executor.get_telemetry(&station_id).await?))
}

/// GET /api/v1/executor/health
pub async fn get_health(
    State(ctx): State<AppContext>,
    Extension(caller): Extension<Caller>,
) -> ApiResult<Json<HealthSummary>> {
    caller.require(ANY_ROLE)?;
    Ok(Json(ctx.executor.health().await?))
}
