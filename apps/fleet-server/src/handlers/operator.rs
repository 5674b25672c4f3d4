//! Operator-authenticated routes (§6): fleet reads, command dispatch,
//! artifact management.

use axum::extract::{ConnectInfo, Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{FleetError, FleetResult};
use crate::middleware::{ApiJson, ApiQuery, ArtifactJson};
use crate::state::{AppState, DeviceView};

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoginRequest {
    password: String,
}

#[derive(Serialize)]
pub struct LoginResponse {
    token: String,
    expires_at: chrono::DateTime<Utc>,
}

pub async fn login(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<std::net::SocketAddr>,
    headers: HeaderMap,
    ApiJson(body): ApiJson<LoginRequest>,
) -> impl IntoResponse {
    let now = Utc::now();
    let ip = crate::security::resolve_client_ip(&headers, &addr.ip().to_string(), state.config.trust_proxy_headers);

    if let Err(retry_after_secs) = state.login_guard.check(&ip, now) {
        return FleetError::LoginRateExceeded { retry_after_secs }.into_response();
    }

    match state.service.login_operator(&body.password, now) {
        Ok(outcome) => {
            state.login_guard.record_success(&ip, now);
            Json(LoginResponse {
                token: outcome.token,
                expires_at: outcome.expires_at,
            })
            .into_response()
        }
        Err(e) => {
            state.login_guard.record_failure(&ip, now);
            e.into_response()
        }
    }
}

#[derive(Serialize)]
pub struct CapabilitiesResponse {
    supported_commands: Vec<&'static str>,
}

pub async fn capabilities(State(state): State<AppState>) -> impl IntoResponse {
    Json(CapabilitiesResponse {
        supported_commands: state.service.supported_command_types(),
    })
}

#[derive(Serialize)]
pub struct DevicesResponse {
    items: Vec<DeviceView>,
}

pub async fn list_devices(State(state): State<AppState>) -> FleetResult<impl IntoResponse> {
    let devices = state.service.list_devices(Utc::now())?;
    Ok(Json(DevicesResponse {
        items: devices.iter().map(DeviceView::from).collect(),
    }))
}

pub async fn get_device(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
) -> FleetResult<impl IntoResponse> {
    let device = state.service.get_device(&device_id, Utc::now())?;
    Ok(Json(DeviceView::from(&device)))
}

#[derive(Deserialize)]
pub struct LimitQuery {
    #[serde(default)]
    limit: Option<usize>,
}

#[derive(Serialize)]
pub struct TelemetryResponse {
    items: Vec<crate::state::TelemetrySample>,
}

pub async fn list_telemetry(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
    ApiQuery(q): ApiQuery<LimitQuery>,
) -> FleetResult<impl IntoResponse> {
    let items = state.service.list_telemetry(&device_id, q.limit.unwrap_or(usize::MAX))?;
    Ok(Json(TelemetryResponse { items }))
}

#[derive(Serialize)]
pub struct CommandsResponse {
    items: Vec<crate::state::Command>,
}

pub async fn list_commands(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
    ApiQuery(q): ApiQuery<LimitQuery>,
) -> FleetResult<impl IntoResponse> {
    let items = state.service.list_commands(&device_id, q.limit.unwrap_or(usize::MAX))?;
    Ok(Json(CommandsResponse { items }))
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateCommandRequest {
    device_id: String,
    #[serde(rename = "type")]
    command_type: String,
    #[serde(default)]
    payload: Option<Value>,
}

pub async fn create_command(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<CreateCommandRequest>,
) -> FleetResult<impl IntoResponse> {
    if body.device_id.is_empty() {
        return Err(FleetError::MissingRequiredField);
    }
    let command = state.service.create_command(
        &body.device_id,
        &body.command_type,
        body.payload,
        "operator",
        Utc::now(),
    )?;
    Ok((StatusCode::CREATED, Json(command)))
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UploadArtifactRequest {
    name: String,
    #[serde(default)]
    content_type: Option<String>,
    base64_data: String,
}

pub async fn upload_artifact(
    State(state): State<AppState>,
    ArtifactJson(body): ArtifactJson<UploadArtifactRequest>,
) -> FleetResult<impl IntoResponse> {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;

    if body.name.is_empty() || body.base64_data.is_empty() {
        return Err(FleetError::MissingRequiredField);
    }
    let payload = STANDARD.decode(&body.base64_data).map_err(|_| FleetError::InvalidBase64)?;
    let artifact = state.service.upload_artifact(
        &body.name,
        body.content_type.as_deref(),
        payload,
        "operator",
        Utc::now(),
    )?;
    Ok((StatusCode::CREATED, Json(crate::state::ArtifactSummary::from(&artifact))))
}

pub async fn get_artifact(
    State(state): State<AppState>,
    Path(artifact_id): Path<String>,
) -> FleetResult<impl IntoResponse> {
    let artifact = state.service.get_artifact(&artifact_id)?;
    let disposition = format!("attachment; filename=\"{}\"", artifact.name.replace('"', ""));
    Ok((
        [
            (header::CONTENT_TYPE, artifact.content_type.clone()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        artifact.payload,
    ))
}
