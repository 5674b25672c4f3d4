//! Device-token-authenticated routes plus enrollment (§6). Auth is carried
//! in the JSON body (or query string for the artifact download) and
//! checked by [`crate::service::Service`], not by middleware.

use axum::extract::{Path, State};
use axum::http::header;
use axum::response::IntoResponse;
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::FleetResult;
use crate::middleware::{ApiJson, ApiQuery};
use crate::state::{AppState, Command, CommandResult, LocationSample, TelemetrySample};

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterRequest {
    #[serde(default)]
    enroll_key: String,
    device_id: String,
    #[serde(default)]
    hw_uid: String,
    #[serde(default)]
    modem_imei: String,
    #[serde(default)]
    sim_iccid: String,
    #[serde(default)]
    firmware_version: String,
}

#[derive(Serialize)]
pub struct RegisterResponse {
    device_token: String,
    poll_interval_sec: u64,
    heartbeat_interval_sec: u64,
}

pub async fn register(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<RegisterRequest>,
) -> FleetResult<impl IntoResponse> {
    let outcome = state.service.register_device(
        &body.enroll_key,
        &body.device_id,
        &body.hw_uid,
        &body.modem_imei,
        &body.sim_iccid,
        &body.firmware_version,
        Utc::now(),
    )?;
    Ok(Json(RegisterResponse {
        device_token: outcome.device_token,
        poll_interval_sec: outcome.poll_interval_sec,
        heartbeat_interval_sec: outcome.heartbeat_interval_sec,
    }))
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeviceAuthRequest {
    device_id: String,
    device_token: String,
}

#[derive(Serialize)]
pub struct OkResponse {
    status: &'static str,
}

pub async fn heartbeat(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<DeviceAuthRequest>,
) -> FleetResult<impl IntoResponse> {
    state.service.device_heartbeat(&body.device_id, &body.device_token, Utc::now())?;
    Ok(Json(OkResponse { status: "ok" }))
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TelemetryRequest {
    device_id: String,
    device_token: String,
    data: TelemetrySample,
}

pub async fn telemetry(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<TelemetryRequest>,
) -> FleetResult<impl IntoResponse> {
    state
        .service
        .device_telemetry(&body.device_id, &body.device_token, body.data, Utc::now())?;
    Ok(Json(OkResponse { status: "ok" }))
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LocationRequest {
    device_id: String,
    device_token: String,
    data: LocationSample,
}

pub async fn location(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<LocationRequest>,
) -> FleetResult<impl IntoResponse> {
    state
        .service
        .device_location(&body.device_id, &body.device_token, body.data, Utc::now())?;
    Ok(Json(OkResponse { status: "ok" }))
}

#[derive(Serialize)]
pub struct PullCommandResponse {
    command: Option<Command>,
}

pub async fn pull_command(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<DeviceAuthRequest>,
) -> FleetResult<impl IntoResponse> {
    let command = state
        .service
        .device_pull_command(&body.device_id, &body.device_token, Utc::now())?;
    Ok(Json(PullCommandResponse { command }))
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CommandResultRequest {
    device_id: String,
    device_token: String,
    status: String,
    #[serde(default)]
    message: String,
    #[serde(default)]
    metrics: Value,
    #[serde(default)]
    data: Value,
}

pub async fn command_result(
    State(state): State<AppState>,
    Path(command_id): Path<String>,
    ApiJson(body): ApiJson<CommandResultRequest>,
) -> FleetResult<impl IntoResponse> {
    let result = CommandResult {
        status: body.status,
        message: body.message,
        metrics: body.metrics,
        data: body.data,
    };
    let command = state.service.device_command_result(
        &body.device_id,
        &body.device_token,
        &command_id,
        result,
        Utc::now(),
    )?;
    Ok(Json(command))
}

#[derive(Deserialize)]
pub struct ArtifactDownloadQuery {
    device_id: String,
    device_token: String,
}

pub async fn get_artifact(
    State(state): State<AppState>,
    Path(artifact_id): Path<String>,
    ApiQuery(q): ApiQuery<ArtifactDownloadQuery>,
) -> FleetResult<impl IntoResponse> {
    let artifact = state
        .service
        .device_get_artifact(&q.device_id, &q.device_token, &artifact_id, Utc::now())?;
    let disposition = format!("attachment; filename=\"{}\"", artifact.name.replace('"', ""));
    Ok((
        [
            (header::CONTENT_TYPE, artifact.content_type.clone()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        artifact.payload,
    ))
}

